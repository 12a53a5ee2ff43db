//! Committee descriptors handed to the node by the upstream chain.

use num_bigint::BigUint;
use num_traits::ToPrimitive;

/// A single committee member as announced by the upstream chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitteeMember {
    /// IP the member listens on.
    pub ip: String,
    /// P2P port of the member.
    pub port: u16,
    /// Compressed BLS public key of the member.
    pub public_key: Vec<u8>,
}

impl CommitteeMember {
    pub fn new(ip: impl Into<String>, port: u16, public_key: Vec<u8>) -> Self {
        Self {
            ip: ip.into(),
            port,
            public_key,
        }
    }
}

/// [`CommitteeInfo`] describes a committee: its identifier, the height it starts
/// producing blocks at, and its ordered membership.
#[derive(Clone, Debug, Default)]
pub struct CommitteeInfo {
    /// Committee identifier. `None` is never a valid committee.
    pub id: Option<BigUint>,
    /// First height the committee is responsible for.
    pub start_height: u64,
    /// Ordered committee members.
    pub members: Vec<CommitteeMember>,
}

impl CommitteeInfo {
    pub fn new(id: impl Into<BigUint>, start_height: u64, members: Vec<CommitteeMember>) -> Self {
        Self {
            id: Some(id.into()),
            start_height,
            members,
        }
    }

    /// The committee id as used internally, if present and representable in 64 bits.
    pub fn committee_id(&self) -> Option<u64> {
        self.id.as_ref().and_then(committee_id)
    }

    /// Last height committed before this committee took over.
    ///
    /// Clamped at zero for a committee starting at genesis.
    pub fn base_height(&self) -> u64 {
        self.start_height.saturating_sub(1)
    }
}

/// Narrow a big-integer committee identifier to its internal 64-bit form.
pub fn committee_id(id: &BigUint) -> Option<u64> {
    id.to_u64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_committee_id_fits_u64() {
        let info = CommitteeInfo::new(7u64, 10, vec![]);
        assert_eq!(info.committee_id(), Some(7));
    }

    #[test]
    fn test_committee_id_too_large() {
        let id = BigUint::from(u64::MAX) + 1u32;
        assert_eq!(committee_id(&id), None);
    }

    #[test]
    fn test_committee_id_missing() {
        let info = CommitteeInfo::default();
        assert_eq!(info.committee_id(), None);
    }

    #[test]
    fn test_base_height() {
        assert_eq!(CommitteeInfo::new(1u64, 100, vec![]).base_height(), 99);
        assert_eq!(CommitteeInfo::new(1u64, 1, vec![]).base_height(), 0);
        assert_eq!(CommitteeInfo::new(1u64, 0, vec![]).base_height(), 0);
    }
}

//! Validator sets built from committee membership.

use crate::{
    crypto::{Address, aggregated::BlsPublicKey},
    state::committee::CommitteeInfo,
};

/// Voting power assigned to every member of a freshly built validator set.
pub const DEFAULT_VOTING_POWER: u64 = 1;

/// [`Validator`] is a committee member eligible to vote.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Validator {
    /// The validator's address, derived from its public key
    pub address: Address,
    /// The validator's public key
    pub public_key: BlsPublicKey,
    /// The validator's voting power
    pub voting_power: u64,
}

impl Validator {
    pub fn new(public_key: BlsPublicKey, voting_power: u64) -> Self {
        Self {
            address: public_key.address(),
            public_key,
            voting_power,
        }
    }
}

/// [`ValidatorSet`] is the ordered, immutable set of validators of one committee.
#[derive(Clone, Debug)]
pub struct ValidatorSet {
    validators: Vec<Validator>,
    total_voting_power: u64,
}

impl ValidatorSet {
    /// Creates a validator set, preserving the given order.
    pub fn new(validators: Vec<Validator>) -> Self {
        let total_voting_power = validators.iter().map(|v| v.voting_power).sum();
        Self {
            validators,
            total_voting_power,
        }
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Validator> {
        self.validators.iter()
    }

    pub fn get_by_index(&self, index: usize) -> Option<&Validator> {
        self.validators.get(index)
    }

    pub fn get_by_address(&self, address: &Address) -> Option<(usize, &Validator)> {
        self.validators
            .iter()
            .enumerate()
            .find(|(_, v)| &v.address == address)
    }

    pub fn total_voting_power(&self) -> u64 {
        self.total_voting_power
    }

    /// Minimum voting power for a +2/3 quorum.
    pub fn quorum_threshold(&self) -> u64 {
        self.total_voting_power * 2 / 3 + 1
    }
}

/// Builds the validator set of a committee.
///
/// Returns `None` if the committee has no identifier, no members, or a member
/// whose public key cannot be parsed. Every member gets [`DEFAULT_VOTING_POWER`].
pub fn make_validators(committee: &CommitteeInfo) -> Option<ValidatorSet> {
    committee.id.as_ref()?;
    if committee.members.is_empty() {
        return None;
    }

    let validators = committee
        .members
        .iter()
        .map(|m| BlsPublicKey::from_bytes(&m.public_key).ok())
        .map(|pk| pk.map(|pk| Validator::new(pk, DEFAULT_VOTING_POWER)))
        .collect::<Option<Vec<_>>>()?;

    Some(ValidatorSet::new(validators))
}

//! Per-committee consensus state handle.
//!
//! The voting state machine itself runs elsewhere; this type owns what the
//! node wires into it: configuration, the committee's [`StateAgent`], its
//! [`BlockStore`], the local [`PrivValidator`] and the shared [`EventBus`].

use std::{collections::BTreeMap, sync::Arc};

use parking_lot::RwLock;

use crate::{
    consensus_manager::{config::ConsensusConfig, state_agent::StateAgent},
    crypto::{
        Address,
        aggregated::{BlsPublicKey, BlsSecretKey, BlsSignature},
    },
    events::EventBus,
};

/// In-memory store of committed blocks, indexed by height.
#[derive(Default)]
pub struct BlockStore {
    blocks: RwLock<BTreeMap<u64, Vec<u8>>>,
}

impl BlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest stored height, or zero when empty.
    pub fn height(&self) -> u64 {
        self.blocks
            .read()
            .last_key_value()
            .map(|(h, _)| *h)
            .unwrap_or(0)
    }

    pub fn save_block(&self, height: u64, block: Vec<u8>) {
        self.blocks.write().insert(height, block);
    }

    pub fn load_block(&self, height: u64) -> Option<Vec<u8>> {
        self.blocks.read().get(&height).cloned()
    }
}

/// The local node's signing identity in every committee it belongs to.
#[derive(Clone)]
pub struct PrivValidator {
    secret_key: BlsSecretKey,
    public_key: BlsPublicKey,
}

impl PrivValidator {
    pub fn new(secret_key: BlsSecretKey) -> Self {
        let public_key = secret_key.public_key();
        Self {
            secret_key,
            public_key,
        }
    }

    pub fn public_key(&self) -> &BlsPublicKey {
        &self.public_key
    }

    pub fn address(&self) -> Address {
        self.public_key.address()
    }

    pub fn sign(&self, message: &[u8]) -> BlsSignature {
        self.secret_key.sign(message)
    }
}

/// [`ConsensusState`] is the handle a committee's consensus reactor drives.
pub struct ConsensusState {
    config: ConsensusConfig,
    state: Arc<StateAgent>,
    store: BlockStore,
    priv_validator: RwLock<Option<PrivValidator>>,
    event_bus: RwLock<Option<Arc<EventBus>>>,
}

impl ConsensusState {
    pub fn new(config: ConsensusConfig, state: Arc<StateAgent>, store: BlockStore) -> Self {
        Self {
            config,
            state,
            store,
            priv_validator: RwLock::new(None),
            event_bus: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    pub fn state_agent(&self) -> &Arc<StateAgent> {
        &self.state
    }

    pub fn block_store(&self) -> &BlockStore {
        &self.store
    }

    pub fn set_priv_validator(&self, priv_validator: PrivValidator) {
        *self.priv_validator.write() = Some(priv_validator);
    }

    /// Address of the local validator, if one has been set.
    pub fn priv_validator_address(&self) -> Option<Address> {
        self.priv_validator.read().as_ref().map(|pv| pv.address())
    }

    /// Whether the local validator is a member of this committee.
    pub fn is_validator(&self) -> bool {
        self.priv_validator_address()
            .is_some_and(|address| self.state.validators().get_by_address(&address).is_some())
    }

    pub fn set_event_bus(&self, event_bus: Arc<EventBus>) {
        *self.event_bus.write() = Some(event_bus);
    }

    pub fn event_bus(&self) -> Option<Arc<EventBus>> {
        self.event_bus.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus_manager::state_agent::AgentProxy;
    use crate::state::committee::{CommitteeInfo, CommitteeMember};
    use crate::state::validator::make_validators;
    use rand::thread_rng;

    struct NoopProxy;

    impl AgentProxy for NoopProxy {
        fn fetch_block(&self, _: u64, _: u64) -> anyhow::Result<Vec<u8>> {
            Ok(vec![])
        }
        fn verify_block(&self, _: u64, _: &[u8]) -> anyhow::Result<()> {
            Ok(())
        }
        fn commit_block(&self, _: u64, _: u64, _: &[u8]) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn consensus_state(member_key: &BlsPublicKey) -> ConsensusState {
        let member = CommitteeMember::new("127.0.0.1", 30303, member_key.to_bytes().to_vec());
        let validators = make_validators(&CommitteeInfo::new(1u64, 1, vec![member])).unwrap();
        let agent = StateAgent::new(Arc::new(NoopProxy), "truechain", validators, 0, 1).unwrap();
        ConsensusState::new(ConsensusConfig::default(), Arc::new(agent), BlockStore::new())
    }

    #[test]
    fn test_block_store_height() {
        let store = BlockStore::new();
        assert_eq!(store.height(), 0);

        store.save_block(3, b"b3".to_vec());
        store.save_block(1, b"b1".to_vec());
        assert_eq!(store.height(), 3);
        assert_eq!(store.load_block(1), Some(b"b1".to_vec()));
        assert_eq!(store.load_block(2), None);
    }

    #[test]
    fn test_priv_validator_membership() {
        let sk = BlsSecretKey::generate(&mut thread_rng());
        let cs = consensus_state(&sk.public_key());
        assert!(!cs.is_validator());

        cs.set_priv_validator(PrivValidator::new(sk));
        assert!(cs.is_validator());

        let outsider = BlsSecretKey::generate(&mut thread_rng());
        cs.set_priv_validator(PrivValidator::new(outsider));
        assert!(!cs.is_validator());
    }

    #[test]
    fn test_priv_validator_signs() {
        let pv = PrivValidator::new(BlsSecretKey::generate(&mut thread_rng()));
        let signature = pv.sign(b"vote");
        assert!(pv.public_key().verify(b"vote", &signature));
    }

    #[test]
    fn test_event_bus_wiring() {
        let sk = BlsSecretKey::generate(&mut thread_rng());
        let cs = consensus_state(&sk.public_key());
        assert!(cs.event_bus().is_none());

        let bus = Arc::new(EventBus::new());
        cs.set_event_bus(Arc::clone(&bus));
        assert!(Arc::ptr_eq(&cs.event_bus().unwrap(), &bus));
    }
}

//! Consensus reactor: binds a committee's consensus state to its switch.
//!
//! The reactor owns the consensus channels (state, data, vote and vote set
//! bits) and keeps track of which peers the switch has connected for it.

use std::{collections::HashSet, sync::Arc};

use consensus::{consensus_manager::consensus_state::ConsensusState, events::EventBus};
use parking_lot::RwLock;

use crate::{
    identity::NodeId,
    message::{ChannelId, channels},
    switch::Reactor,
};

/// Name the consensus reactor is registered under on a switch.
pub const REACTOR_NAME: &str = "CONSENSUS";

pub struct ConsensusReactor {
    state: Arc<ConsensusState>,
    fast_sync: bool,
    peers: RwLock<HashSet<NodeId>>,
}

impl ConsensusReactor {
    pub fn new(state: Arc<ConsensusState>, fast_sync: bool) -> Self {
        Self {
            state,
            fast_sync,
            peers: RwLock::new(HashSet::new()),
        }
    }

    /// Attach the node's event bus to the reactor and its consensus state.
    pub fn set_event_bus(&self, event_bus: Arc<EventBus>) {
        self.state.set_event_bus(event_bus);
    }

    pub fn consensus_state(&self) -> &Arc<ConsensusState> {
        &self.state
    }

    pub fn fast_sync(&self) -> bool {
        self.fast_sync
    }

    pub fn peer_count(&self) -> usize {
        self.peers.read().len()
    }

    pub fn has_peer(&self, peer: &NodeId) -> bool {
        self.peers.read().contains(peer)
    }
}

impl Reactor for ConsensusReactor {
    fn channels(&self) -> Vec<ChannelId> {
        channels::CONSENSUS.to_vec()
    }

    fn add_peer(&self, peer: &NodeId) {
        self.peers.write().insert(*peer);
    }

    fn remove_peer(&self, peer: &NodeId) {
        self.peers.write().remove(peer);
    }
}

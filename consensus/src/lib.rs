//! Consensus-side building blocks of a multi-committee node.
//!
//! - [`crypto`]: BLS keys and the address hashing that keys validators and peers
//! - [`state`]: committee descriptors and validator set construction
//! - [`consensus_manager`]: the per-committee consensus collaborators
//!   (state agent, consensus state, block store, local validator)
//! - [`events`]: the node-wide event bus

pub mod consensus_manager;
pub mod crypto;
pub mod events;
pub mod state;

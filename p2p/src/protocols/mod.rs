//! Protocol reactors attached to a committee's switch.

pub mod consensus;

pub use consensus::{ConsensusReactor, REACTOR_NAME};

pub mod config;
pub mod consensus_state;
pub mod state_agent;

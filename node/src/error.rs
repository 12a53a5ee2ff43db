use consensus::{consensus_manager::state_agent::StateAgentError, events::EventBusError};
use p2p::P2PError;

/// Errors returned by the node's caller-facing operations.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("committee {0} not found")]
    NotFound(u64),

    #[error("committee {0} already exists")]
    Duplicate(u64),

    #[error("node is not started")]
    NotStarted,

    #[error("already started")]
    AlreadyStarted,

    #[error("committee {0} has been stopped and cannot be restarted")]
    ServiceStopped(u64),

    #[error("failed to start switch: {0}")]
    SwitchStart(#[source] P2PError),

    #[error("P2P error: {0}")]
    P2P(#[from] P2PError),

    #[error("state agent error: {0}")]
    StateAgent(#[from] StateAgentError),

    #[error("event bus error: {0}")]
    EventBus(#[from] EventBusError),
}

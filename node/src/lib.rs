//! Node crate - hosts several consensus committees in one process.
//!
//! The [`Node`] registers committees handed to it by the upstream chain, feeds
//! each committee's peer registry, and starts or stops committees on request:
//!
//! ```ignore
//! use node::{CommitteeAction, NodeBuilder, NodeConfig};
//!
//! let node = NodeBuilder::new()
//!     .with_config(NodeConfig::from_path("config.toml")?)
//!     .with_secret_key(secret_key)
//!     .with_agent(agent)
//!     .with_logger(logger)
//!     .build()?;
//! node.start()?;
//!
//! node.put_committee(&committee)?;
//! node.put_nodes(&committee_id, &members)?;
//! node.notify(&committee_id, CommitteeAction::Start)?;
//!
//! // At the end of the epoch
//! node.set_committee_stop(&committee_id, end_height)?;
//! node.notify(&committee_id, CommitteeAction::Stop)?;
//!
//! node.stop();
//! ```

pub mod committee;
pub mod config;
pub mod error;
pub mod node;

// Re-export main types at crate root
pub use committee::{CommitteeService, NodeContext, ServiceState};
pub use config::NodeConfig;
pub use error::NodeError;
pub use node::{CommitteeAction, Node, NodeBuilder};

//! Networking layer for committee nodes.
//!
//! A node runs one [`switch::Switch`] per committee. The committee's peers are
//! tracked in a [`peer::PeerRegistry`] and dialed by a background
//! [`dispatcher::Dispatcher`]; the [`protocols::ConsensusReactor`] binds the
//! committee's consensus state to its switch.

pub mod addr_book;
pub mod address;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod identity;
pub mod message;
pub mod peer;
pub mod protocols;
pub mod switch;
pub mod tcp;

pub use addr_book::{AddrBook, MemAddrBook};
pub use address::NetAddress;
pub use config::P2PConfig;
pub use dispatcher::{DispatchNotifier, Dispatcher, NotifyOutcome};
pub use error::P2PError;
pub use identity::{NodeId, NodeInfo, NodeKey};
pub use peer::{PeerInfo, PeerRegistry};
pub use protocols::ConsensusReactor;
pub use switch::{Listener, Reactor, Switch, SwitchFactory};
pub use tcp::{TcpSwitch, TcpSwitchFactory};

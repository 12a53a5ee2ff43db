//! The switch: per-committee connection manager.
//!
//! A switch owns a committee's listeners and peer connections and routes
//! channels to the reactors registered on it. Each committee gets its own
//! switch from a [`SwitchFactory`]; the node's address book is shared.

use std::{net::SocketAddr, sync::Arc};

use slog::Logger;

use crate::{
    addr_book::AddrBook,
    address::{NetAddress, protocol_and_address},
    config::P2PConfig,
    error::P2PError,
    identity::{NodeId, NodeInfo, NodeKey},
    message::ChannelId,
};

/// A protocol handler attached to a switch.
pub trait Reactor: Send + Sync {
    /// Channels this reactor receives messages on.
    fn channels(&self) -> Vec<ChannelId>;

    /// Called after a connection to `peer` is established.
    fn add_peer(&self, peer: &NodeId);

    /// Called after the connection to `peer` is torn down.
    fn remove_peer(&self, peer: &NodeId);
}

/// Listener configuration attached to a switch before it starts.
#[derive(Clone)]
pub struct Listener {
    listen_address: String,
    external_address: Option<String>,
    upnp: bool,
    logger: Logger,
}

impl Listener {
    pub fn new(
        listen_address: impl Into<String>,
        external_address: Option<String>,
        upnp: bool,
        logger: Logger,
    ) -> Self {
        Self {
            listen_address: listen_address.into(),
            external_address,
            upnp,
            logger,
        }
    }

    pub fn listen_address(&self) -> &str {
        &self.listen_address
    }

    /// Socket to bind, with any `tcp://` prefix removed.
    pub fn bind_addr(&self) -> Result<SocketAddr, P2PError> {
        parse_socket(&self.listen_address)
    }

    /// Address advertised to peers: the external address if configured, else the bind address.
    pub fn external_addr(&self) -> Result<SocketAddr, P2PError> {
        match &self.external_address {
            Some(external) if !external.is_empty() => parse_socket(external),
            _ => self.bind_addr(),
        }
    }

    pub fn upnp(&self) -> bool {
        self.upnp
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }
}

fn parse_socket(address: &str) -> Result<SocketAddr, P2PError> {
    let (_, addr) = protocol_and_address(address);
    addr.parse()
        .map_err(|e| P2PError::InvalidAddress(format!("{address}: {e}")))
}

/// Connection manager of one committee.
///
/// Setters are called while wiring a committee, before [`Switch::start`];
/// all methods take `&self` so a switch can be shared with the committee's
/// connection dispatcher.
pub trait Switch: Send + Sync {
    fn add_listener(&self, listener: Listener);

    fn add_reactor(&self, name: &str, reactor: Arc<dyn Reactor>);

    fn set_addr_book(&self, addr_book: Arc<dyn AddrBook>);

    fn set_node_info(&self, node_info: NodeInfo);

    fn set_node_key(&self, node_key: NodeKey);

    /// Bind listeners and begin accepting connections.
    fn start(&self) -> Result<(), P2PError>;

    /// Close listeners and drop all peer connections.
    fn stop(&self);

    fn is_running(&self) -> bool;

    /// Connect to `addr`, recording whether the peer is persistent. Connecting to
    /// an already connected peer succeeds without dialing again.
    fn dial_peer_with_address(&self, addr: &NetAddress, persistent: bool)
    -> Result<(), P2PError>;
}

/// Builds a fresh switch for every committee.
pub trait SwitchFactory: Send + Sync {
    fn new_switch(&self, config: &P2PConfig, logger: Logger) -> Arc<dyn Switch>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    #[test]
    fn test_listener_bind_addr_strips_protocol() {
        let listener = Listener::new("tcp://127.0.0.1:26656", None, false, logger());
        assert_eq!(
            listener.bind_addr().unwrap(),
            "127.0.0.1:26656".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(listener.external_addr().unwrap(), listener.bind_addr().unwrap());
    }

    #[test]
    fn test_listener_external_addr() {
        let listener = Listener::new(
            "tcp://0.0.0.0:26656",
            Some("1.2.3.4:26656".to_string()),
            true,
            logger(),
        );
        assert_eq!(
            listener.external_addr().unwrap(),
            "1.2.3.4:26656".parse::<SocketAddr>().unwrap()
        );
        assert!(listener.upnp());
    }

    #[test]
    fn test_listener_rejects_bad_address() {
        let listener = Listener::new("tcp://nowhere", None, false, logger());
        assert!(matches!(
            listener.bind_addr(),
            Err(P2PError::InvalidAddress(_))
        ));
    }
}

//! Network addresses of peers: `<node id>@<ip>:<port>`.

use std::{
    fmt,
    net::{IpAddr, SocketAddr},
    str::FromStr,
};

use crate::{error::P2PError, identity::NodeId};

/// Address of a peer, pairing its node id with the socket it listens on.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NetAddress {
    pub id: NodeId,
    pub ip: IpAddr,
    pub port: u16,
}

impl NetAddress {
    pub fn new(id: NodeId, ip: IpAddr, port: u16) -> Self {
        Self { id, ip, port }
    }

    /// Build an address from a node id and a `host:port` string.
    pub fn from_host_port(id: NodeId, host_port: &str) -> Result<Self, P2PError> {
        let socket: SocketAddr = host_port
            .parse()
            .map_err(|e| P2PError::InvalidAddress(format!("{host_port}: {e}")))?;
        Ok(Self::new(id, socket.ip(), socket.port()))
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// Whether the address is reachable from the public internet.
    pub fn is_routable(&self) -> bool {
        if self.ip.is_unspecified() || self.ip.is_loopback() || self.ip.is_multicast() {
            return false;
        }
        match self.ip {
            IpAddr::V4(ip) => !(ip.is_private() || ip.is_link_local() || ip.is_broadcast()),
            IpAddr::V6(ip) => !ip.is_unicast_link_local(),
        }
    }
}

impl fmt::Display for NetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.socket_addr())
    }
}

impl FromStr for NetAddress {
    type Err = P2PError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (_, addr) = protocol_and_address(s);
        let (id, host_port) = addr
            .split_once('@')
            .ok_or_else(|| P2PError::InvalidAddress(format!("{s}: missing node id")))?;
        let id = NodeId::from_str(id)?;
        Self::from_host_port(id, host_port)
    }
}

/// Split `tcp://0.0.0.0:26656` into `("tcp", "0.0.0.0:26656")`.
///
/// Addresses without a scheme default to `tcp`.
pub fn protocol_and_address(listen_addr: &str) -> (&str, &str) {
    match listen_addr.split_once("://") {
        Some((protocol, address)) => (protocol, address),
        None => ("tcp", listen_addr),
    }
}

//! Node identity on the network.
//!
//! The node id is the hex encoding of the address hash of a BLS public key, so
//! a peer's id can be computed by anyone holding its public key. The node key
//! is the same BLS key the node validates with.

use std::{fmt, str::FromStr};

use consensus::crypto::{
    ADDRESS_LENGTH, Address,
    aggregated::{BlsPublicKey, BlsSecretKey},
};
use serde::{Deserialize, Serialize};

use crate::{
    address::{NetAddress, protocol_and_address},
    error::P2PError,
    message::ChannelId,
};

/// Protocol version announced in [`NodeInfo`].
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Identifier of a node on the network.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct NodeId(Address);

impl NodeId {
    pub fn from_bytes(bytes: Address) -> Self {
        Self(bytes)
    }

    pub fn from_public_key(public_key: &BlsPublicKey) -> Self {
        Self(public_key.address())
    }

    /// Parse a compressed public key and derive its node id.
    pub fn from_public_key_bytes(bytes: &[u8]) -> Result<Self, P2PError> {
        let public_key = BlsPublicKey::from_bytes(bytes)
            .map_err(|e| P2PError::InvalidPublicKey(format!("{e:#}")))?;
        Ok(Self::from_public_key(&public_key))
    }

    pub fn as_bytes(&self) -> &Address {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({self})")
    }
}

impl FromStr for NodeId {
    type Err = P2PError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes =
            hex::decode(s).map_err(|e| P2PError::InvalidAddress(format!("node id {s}: {e}")))?;
        let bytes: Address = bytes.try_into().map_err(|_| {
            P2PError::InvalidAddress(format!("node id {s}: expected {ADDRESS_LENGTH} bytes"))
        })?;
        Ok(Self(bytes))
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for NodeId {
    type Error = P2PError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Key authenticating this node on peer connections.
#[derive(Clone)]
pub struct NodeKey {
    secret_key: BlsSecretKey,
    public_key: BlsPublicKey,
}

impl NodeKey {
    pub fn new(secret_key: BlsSecretKey) -> Self {
        let public_key = secret_key.public_key();
        Self {
            secret_key,
            public_key,
        }
    }

    pub fn id(&self) -> NodeId {
        NodeId::from_public_key(&self.public_key)
    }

    pub fn public_key(&self) -> &BlsPublicKey {
        &self.public_key
    }

    pub fn secret_key(&self) -> &BlsSecretKey {
        &self.secret_key
    }
}

/// What a node announces about itself to peers during the handshake.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: NodeId,
    /// `ip:port` the node listens on
    pub listen_addr: String,
    /// Chain the node participates in
    pub network: String,
    pub version: String,
    pub channels: Vec<ChannelId>,
    pub moniker: String,
    pub other: Vec<String>,
}

impl NodeInfo {
    /// Build node info, normalizing a `tcp://ip:port` listen address to `ip:port`.
    pub fn new(
        id: NodeId,
        network: impl Into<String>,
        moniker: impl Into<String>,
        listen_address: &str,
        channels: Vec<ChannelId>,
    ) -> Result<Self, P2PError> {
        let (_, addr) = protocol_and_address(listen_address);
        let socket: std::net::SocketAddr = addr
            .parse()
            .map_err(|e| P2PError::InvalidAddress(format!("{listen_address}: {e}")))?;
        Ok(Self {
            id,
            listen_addr: format!("{}:{}", socket.ip(), socket.port()),
            network: network.into(),
            version: PROTOCOL_VERSION.to_string(),
            channels,
            moniker: moniker.into(),
            other: vec![
                format!("p2p_version={PROTOCOL_VERSION}"),
                format!("consensus_version={PROTOCOL_VERSION}"),
            ],
        })
    }

    /// The address peers reach this node at.
    pub fn net_address(&self) -> Result<NetAddress, P2PError> {
        NetAddress::from_host_port(self.id, &self.listen_addr)
    }
}

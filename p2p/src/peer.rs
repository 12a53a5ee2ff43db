//! Per-committee peer registry.
//!
//! Peers are keyed by the node id derived from their public key, never by
//! `ip:port`: a peer re-announced under a new address is still the same entry,
//! and the existing entry keeps its original address. Once an entry is marked
//! connected it stays connected.

use std::collections::BTreeMap;

use consensus::state::committee::CommitteeMember;
use parking_lot::Mutex;
use slog::Logger;

use crate::{address::NetAddress, error::P2PError, identity::NodeId};

/// A known peer of a committee and whether we are connected to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: NodeId,
    pub address: NetAddress,
    pub ip: String,
    pub port: u16,
    pub connected: bool,
}

impl PeerInfo {
    /// Build a disconnected entry from a committee member.
    pub fn from_member(member: &CommitteeMember) -> Result<Self, P2PError> {
        let id = NodeId::from_public_key_bytes(&member.public_key)?;
        let address = NetAddress::from_host_port(id, &format!("{}:{}", member.ip, member.port))?;
        Ok(Self {
            id,
            address,
            ip: member.ip.clone(),
            port: member.port,
            connected: false,
        })
    }
}

/// Outcome of one pass over the disconnected peers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConnectPass {
    pub attempted: usize,
    pub connected: usize,
}

/// Registry of a committee's peers behind a single per-committee lock.
pub struct PeerRegistry {
    table: Mutex<BTreeMap<NodeId, PeerInfo>>,
    logger: Logger,
}

impl PeerRegistry {
    pub fn new(logger: Logger) -> Self {
        Self {
            table: Mutex::new(BTreeMap::new()),
            logger,
        }
    }

    /// Insert every candidate whose id is not yet known.
    ///
    /// Candidates with an unparsable public key or address are logged and
    /// skipped. Returns `true` if at least one new entry was added.
    pub fn insert(&self, candidates: &[CommitteeMember]) -> bool {
        let mut table = self.table.lock();
        let mut added = false;
        for candidate in candidates {
            let peer = match PeerInfo::from_member(candidate) {
                Ok(peer) => peer,
                Err(e) => {
                    slog::warn!(
                        self.logger,
                        "Skipping malformed peer";
                        "ip" => &candidate.ip,
                        "port" => candidate.port,
                        "error" => %e,
                    );
                    continue;
                }
            };
            if table.contains_key(&peer.id) {
                continue;
            }
            slog::debug!(self.logger, "Registered peer"; "peer" => %peer.address);
            table.insert(peer.id, peer);
            added = true;
        }
        added
    }

    /// Whether any entry is still waiting to be connected.
    pub fn has_pending(&self) -> bool {
        self.table.lock().values().any(|p| !p.connected)
    }

    /// Mark `id` connected. Returns `false` if the id is unknown.
    pub fn mark_connected(&self, id: &NodeId) -> bool {
        match self.table.lock().get_mut(id) {
            Some(peer) => {
                peer.connected = true;
                true
            }
            None => false,
        }
    }

    /// Run `dial` on every disconnected entry while holding the registry lock.
    ///
    /// Successful dials mark the entry connected; failures are logged and the
    /// entry stays disconnected for the next pass.
    pub fn connect_pending<F>(&self, mut dial: F) -> ConnectPass
    where
        F: FnMut(&PeerInfo) -> Result<(), P2PError>,
    {
        let mut table = self.table.lock();
        let mut pass = ConnectPass::default();
        for peer in table.values_mut().filter(|p| !p.connected) {
            pass.attempted += 1;
            match dial(peer) {
                Ok(()) => {
                    peer.connected = true;
                    pass.connected += 1;
                }
                Err(e) => {
                    slog::error!(self.logger, "Failed to dial peer"; "peer" => %peer.address, "error" => %e);
                }
            }
        }
        pass
    }

    pub fn get(&self, id: &NodeId) -> Option<PeerInfo> {
        self.table.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }

    pub fn num_connected(&self) -> usize {
        self.table.lock().values().filter(|p| p.connected).count()
    }
}

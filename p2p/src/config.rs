//! P2P configuration types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// P2P layer configuration, shared by every committee switch on the node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct P2PConfig {
    /// Address to listen on for incoming connections, e.g. `tcp://0.0.0.0:26656`.
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Address to advertise to peers.
    /// May differ from listen_address if behind NAT.
    #[serde(default)]
    pub external_address: Option<String>,

    /// Attempt UPnP port forwarding for the listener.
    #[serde(default)]
    pub upnp: bool,

    /// Comma separated list of peer ids that must never be gossiped.
    #[serde(default)]
    pub private_peer_ids: String,

    /// Path to the address book file.
    #[serde(default = "default_addr_book_file")]
    pub addr_book_file: String,

    /// Only accept routable addresses into the address book.
    #[serde(default = "default_addr_book_strict")]
    pub addr_book_strict: bool,

    /// Timeout for a single outbound dial.
    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,

    /// Maximum number of connected peers per switch.
    #[serde(default = "default_max_num_peers")]
    pub max_num_peers: usize,
}

fn default_listen_address() -> String {
    "tcp://0.0.0.0:26656".to_string()
}

fn default_addr_book_file() -> String {
    "config/addrbook.json".to_string()
}

fn default_addr_book_strict() -> bool {
    true
}

fn default_dial_timeout_ms() -> u64 {
    3_000
}

fn default_max_num_peers() -> usize {
    50
}

impl Default for P2PConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            external_address: None,
            upnp: false,
            private_peer_ids: String::new(),
            addr_book_file: default_addr_book_file(),
            addr_book_strict: default_addr_book_strict(),
            dial_timeout_ms: default_dial_timeout_ms(),
            max_num_peers: default_max_num_peers(),
        }
    }
}

impl P2PConfig {
    /// Peer ids that must never be gossiped, parsed from `private_peer_ids`.
    pub fn private_peer_ids(&self) -> Vec<String> {
        split_and_trim(&self.private_peer_ids, ',', " ")
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }
}

/// Split `s` on `sep`, trim every piece of the characters in `cutset`, and drop empty pieces.
pub fn split_and_trim(s: &str, sep: char, cutset: &str) -> Vec<String> {
    s.split(sep)
        .map(|piece| piece.trim_matches(|c| cutset.contains(c)))
        .filter(|piece| !piece.is_empty())
        .map(str::to_string)
        .collect()
}

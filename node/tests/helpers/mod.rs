//! Test helpers for node integration tests.
//!
//! Provides an in-memory switch that records dials and can be programmed to
//! refuse peers or fail to start, plus committee and logger builders.

#![allow(dead_code)]

use std::{
    collections::HashSet,
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use consensus::{
    consensus_manager::state_agent::AgentProxy,
    crypto::aggregated::BlsSecretKey,
    state::committee::{CommitteeInfo, CommitteeMember},
};
use node::{Node, NodeBuilder, NodeConfig};
use p2p::{
    AddrBook, Listener, NetAddress, NodeId, NodeInfo, NodeKey, P2PConfig, P2PError, Reactor,
    Switch, SwitchFactory,
};
use parking_lot::Mutex;
use rand::thread_rng;
use slog::{Drain, Level, Logger, o};

/// Creates a logger for integration tests.
///
/// Respects the `RUST_LOG` environment variable (`error`, `warn`, `info`,
/// `debug`); logs nothing above `warn` by default.
pub fn create_test_logger() -> Logger {
    let log_level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|env_str| Level::from_str(&env_str).ok())
        .unwrap_or(Level::Warning);

    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain)
        .build()
        .fuse()
        .filter_level(log_level)
        .fuse();

    slog::Logger::root(drain, o!())
}

/// Behaviour shared by every switch a [`MockSwitchFactory`] creates.
#[derive(Default)]
pub struct MockNetwork {
    pub fail_start: AtomicBool,
    refused: Mutex<HashSet<NodeId>>,
}

impl MockNetwork {
    pub fn refuse(&self, id: NodeId) {
        self.refused.lock().insert(id);
    }

    pub fn accept(&self, id: &NodeId) {
        self.refused.lock().remove(id);
    }

    fn is_refused(&self, id: &NodeId) -> bool {
        self.refused.lock().contains(id)
    }
}

pub struct MockSwitch {
    network: Arc<MockNetwork>,
    running: AtomicBool,
    dials: Mutex<Vec<NodeId>>,
    listeners: Mutex<Vec<String>>,
    reactors: Mutex<Vec<(String, Arc<dyn Reactor>)>>,
    addr_book: Mutex<Option<Arc<dyn AddrBook>>>,
    node_info: Mutex<Option<NodeInfo>>,
    node_key: Mutex<Option<NodeId>>,
}

impl MockSwitch {
    fn new(network: Arc<MockNetwork>) -> Self {
        Self {
            network,
            running: AtomicBool::new(false),
            dials: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            reactors: Mutex::new(Vec::new()),
            addr_book: Mutex::new(None),
            node_info: Mutex::new(None),
            node_key: Mutex::new(None),
        }
    }

    /// Every dial attempt, in order, including refused ones.
    pub fn dials(&self) -> Vec<NodeId> {
        self.dials.lock().clone()
    }

    pub fn dial_count(&self, id: &NodeId) -> usize {
        self.dials.lock().iter().filter(|d| *d == id).count()
    }

    pub fn listeners(&self) -> Vec<String> {
        self.listeners.lock().clone()
    }

    pub fn reactor_names(&self) -> Vec<String> {
        self.reactors.lock().iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn has_addr_book(&self) -> bool {
        self.addr_book.lock().is_some()
    }

    pub fn node_info(&self) -> Option<NodeInfo> {
        self.node_info.lock().clone()
    }

    pub fn node_key_id(&self) -> Option<NodeId> {
        *self.node_key.lock()
    }
}

impl Switch for MockSwitch {
    fn add_listener(&self, listener: Listener) {
        self.listeners
            .lock()
            .push(listener.listen_address().to_string());
    }

    fn add_reactor(&self, name: &str, reactor: Arc<dyn Reactor>) {
        self.reactors.lock().push((name.to_string(), reactor));
    }

    fn set_addr_book(&self, addr_book: Arc<dyn AddrBook>) {
        *self.addr_book.lock() = Some(addr_book);
    }

    fn set_node_info(&self, node_info: NodeInfo) {
        *self.node_info.lock() = Some(node_info);
    }

    fn set_node_key(&self, node_key: NodeKey) {
        *self.node_key.lock() = Some(node_key.id());
    }

    fn start(&self) -> Result<(), P2PError> {
        if self.network.fail_start.load(Ordering::SeqCst) {
            return Err(P2PError::Connection("listener unavailable".into()));
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(P2PError::AlreadyStarted);
        }
        Ok(())
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn dial_peer_with_address(&self, addr: &NetAddress, _persistent: bool) -> Result<(), P2PError> {
        let refused = self.network.is_refused(&addr.id);
        self.dials.lock().push(addr.id);
        if refused {
            return Err(P2PError::Connection(format!("connection refused by {addr}")));
        }
        for (_, reactor) in self.reactors.lock().iter() {
            reactor.add_peer(&addr.id);
        }
        Ok(())
    }
}

/// Switch factory handing out [`MockSwitch`]es and keeping them for inspection.
#[derive(Default)]
pub struct MockSwitchFactory {
    pub network: Arc<MockNetwork>,
    switches: Mutex<Vec<Arc<MockSwitch>>>,
}

impl MockSwitchFactory {
    /// Switches in creation order, one per registered committee.
    pub fn switch(&self, index: usize) -> Arc<MockSwitch> {
        self.switches.lock()[index].clone()
    }

    pub fn num_switches(&self) -> usize {
        self.switches.lock().len()
    }
}

impl SwitchFactory for MockSwitchFactory {
    fn new_switch(&self, _config: &P2PConfig, _logger: Logger) -> Arc<dyn Switch> {
        let switch = Arc::new(MockSwitch::new(self.network.clone()));
        self.switches.lock().push(switch.clone());
        switch
    }
}

/// Application proxy that hands out empty blocks.
pub struct NoopAgent;

impl AgentProxy for NoopAgent {
    fn fetch_block(&self, _committee_id: u64, _height: u64) -> anyhow::Result<Vec<u8>> {
        Ok(Vec::new())
    }

    fn verify_block(&self, _committee_id: u64, _block: &[u8]) -> anyhow::Result<()> {
        Ok(())
    }

    fn commit_block(&self, _committee_id: u64, _height: u64, _block: &[u8]) -> anyhow::Result<()> {
        Ok(())
    }
}

pub fn test_config() -> NodeConfig {
    let mut config = NodeConfig::default();
    config.chain_id = "test-chain".to_string();
    config.moniker = "test-node".to_string();
    config.p2p.listen_address = "tcp://127.0.0.1:26656".to_string();
    config
}

/// A node backed by a [`MockSwitchFactory`].
pub fn mock_node() -> (Node, Arc<MockSwitchFactory>) {
    let factory = Arc::new(MockSwitchFactory::default());
    let node = NodeBuilder::new()
        .with_config(test_config())
        .with_secret_key(BlsSecretKey::generate(&mut thread_rng()))
        .with_agent(Arc::new(NoopAgent))
        .with_switch_factory(factory.clone())
        .with_logger(create_test_logger())
        .build()
        .expect("build node");
    (node, factory)
}

/// A member with a fresh key, and the node id peers derive for it.
pub fn new_member(ip: &str, port: u16) -> (CommitteeMember, NodeId) {
    let pk = BlsSecretKey::generate(&mut thread_rng()).public_key();
    (
        CommitteeMember::new(ip, port, pk.to_bytes().to_vec()),
        NodeId::from_public_key(&pk),
    )
}

pub fn committee(id: u64, start_height: u64, size: usize) -> CommitteeInfo {
    let members = (0..size)
        .map(|i| new_member(&format!("10.0.0.{}", i + 1), 30303).0)
        .collect();
    CommitteeInfo::new(id, start_height, members)
}

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}

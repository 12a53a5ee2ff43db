//! Node - orchestrator for every committee hosted by this process.
//!
//! A single [`Node`] owns the node-wide identity (node key, private validator
//! and announced [`NodeInfo`]), the shared address book and event bus, and the
//! map from committee id to [`CommitteeService`].
//!
//! ## Committee Lifecycle
//!
//! ```text
//! put_committee(info)        ─── build validators, state agent, consensus state,
//!        ↓                       switch; register service (Created)
//! put_nodes(id, members)     ─── add peers to the committee's registry
//!        ↓
//! notify(id, Start)          ─── listener + identity on switch, start switch,
//!        ↓                       spawn dispatcher (Running)
//! set_committee_stop(id, h)  ─── mark the committee's terminal height
//!        ↓
//! notify(id, Stop)           ─── terminate dispatcher, stop switch (Stopped)
//! ```
//!
//! Registering a committee and starting it are separate steps. Marking the end
//! height does not stop the committee either.
//!
//! ## Locking
//!
//! The committee map sits behind its own lock, separate from each committee's
//! registry lock. Map lookups clone the service handle and release the map
//! lock before calling into the service, so calls for different committees
//! never wait on each other.
//!
//! Node start and stop take the lifecycle lock exclusively, while committee
//! starts hold it shared for their whole duration. A committee start therefore
//! either completes before a node stop cascades, or observes the stopped node
//! and fails with [`NodeError::NotStarted`].

use std::{
    collections::{HashMap, hash_map::Entry},
    sync::Arc,
};

use anyhow::Result;
use consensus::{
    consensus_manager::{
        consensus_state::{BlockStore, ConsensusState, PrivValidator},
        state_agent::{AgentProxy, StateAgent},
    },
    crypto::aggregated::BlsSecretKey,
    events::{CommitteeEvent, EventBus},
    state::{
        committee::{CommitteeInfo, CommitteeMember, committee_id},
        validator::make_validators,
    },
};
use num_bigint::BigUint;
use p2p::{
    AddrBook, MemAddrBook, NodeId, NodeInfo, NodeKey, SwitchFactory, TcpSwitchFactory,
    message::channels,
};
use parking_lot::RwLock;
use slog::{Logger, o};
use validator::Validate;

use crate::{
    committee::{CommitteeService, NodeContext},
    config::NodeConfig,
    error::NodeError,
};

/// Lifecycle request for a committee, as delivered by the upstream chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitteeAction {
    Start,
    Stop,
    /// Reserved for network topology changes; accepted and ignored.
    Switch,
}

pub struct Node {
    config: NodeConfig,
    agent: Arc<dyn AgentProxy>,
    node_key: NodeKey,
    priv_validator: PrivValidator,
    addr_book: Arc<dyn AddrBook>,
    event_bus: Arc<EventBus>,
    switch_factory: Arc<dyn SwitchFactory>,
    /// Set on start, cleared on stop.
    node_info: RwLock<Option<NodeInfo>>,
    services: RwLock<HashMap<u64, Arc<CommitteeService>>>,
    /// Whether the node is running.
    lifecycle: RwLock<bool>,
    logger: Logger,
}

impl Node {
    /// Create a node. The node key and the private validator are both derived
    /// from `secret_key`, so the node id equals the id peers derive from the
    /// node's committee public key.
    pub fn new(
        config: NodeConfig,
        secret_key: BlsSecretKey,
        agent: Arc<dyn AgentProxy>,
        switch_factory: Arc<dyn SwitchFactory>,
        logger: Logger,
    ) -> Self {
        let node_key = NodeKey::new(secret_key.clone());
        let addr_book: Arc<dyn AddrBook> = Arc::new(MemAddrBook::new(
            config.p2p.addr_book_file.clone(),
            config.p2p.addr_book_strict,
        ));

        Self {
            logger: logger.new(o!("node" => node_key.id().to_string())),
            config,
            agent,
            node_key,
            priv_validator: PrivValidator::new(secret_key),
            addr_book,
            event_bus: Arc::new(EventBus::new()),
            switch_factory,
            node_info: RwLock::new(None),
            services: RwLock::new(HashMap::new()),
            lifecycle: RwLock::new(false),
        }
    }

    /// Start the event bus, compute the node's announced identity, and register
    /// our own address and the private peer ids with the address book.
    pub fn start(&self) -> Result<(), NodeError> {
        let mut running = self.lifecycle.write();
        if *running {
            return Err(NodeError::AlreadyStarted);
        }
        self.start_inner()?;
        *running = true;
        Ok(())
    }

    fn start_inner(&self) -> Result<(), NodeError> {
        let node_info = self.make_node_info()?;
        let our_address = node_info.net_address()?;

        self.event_bus.start()?;
        self.addr_book.add_our_address(&our_address);
        self.addr_book
            .add_private_ids(self.config.p2p.private_peer_ids());

        slog::info!(
            self.logger,
            "Node started";
            "listen_addr" => &node_info.listen_addr,
            "network" => &node_info.network,
            "moniker" => &node_info.moniker,
        );
        *self.node_info.write() = Some(node_info);
        Ok(())
    }

    /// Stop every running committee, then the event bus. Idempotent.
    ///
    /// Committees registered but not started stay `Created` and cannot be
    /// started until the node is started again.
    pub fn stop(&self) {
        let mut running = self.lifecycle.write();
        if !*running {
            return;
        }
        *running = false;
        *self.node_info.write() = None;

        let services: Vec<_> = self.services.read().values().cloned().collect();
        for service in services {
            if service.stop() {
                self.event_bus.publish(CommitteeEvent::Stopped {
                    committee_id: service.committee_id(),
                });
            }
        }

        self.event_bus.stop();
        slog::info!(self.logger, "Node stopped");
    }

    pub fn is_running(&self) -> bool {
        *self.lifecycle.read()
    }

    /// Deliver a lifecycle action to a committee.
    pub fn notify(&self, id: &BigUint, action: CommitteeAction) -> Result<(), NodeError> {
        if action == CommitteeAction::Switch {
            return Ok(());
        }

        let id = to_committee_id(id)?;
        let service = self.service(id)?;
        match action {
            CommitteeAction::Start => {
                let running = self.lifecycle.read();
                if !*running {
                    return Err(NodeError::NotStarted);
                }
                let ctx = self.node_context()?;
                service.start(&ctx)?;
                self.event_bus
                    .publish(CommitteeEvent::Started { committee_id: id });
            }
            CommitteeAction::Stop => {
                if service.stop() {
                    self.event_bus
                        .publish(CommitteeEvent::Stopped { committee_id: id });
                }
            }
            CommitteeAction::Switch => {}
        }
        Ok(())
    }

    /// Build and register the service for a new committee without starting it.
    pub fn put_committee(&self, info: &CommitteeInfo) -> Result<(), NodeError> {
        let id = info
            .id
            .as_ref()
            .ok_or_else(|| NodeError::InvalidArgument("committee id is missing".into()))
            .and_then(to_committee_id)?;
        if info.members.is_empty() {
            return Err(NodeError::InvalidArgument(format!(
                "committee {id} has no members"
            )));
        }
        if self.services.read().contains_key(&id) {
            return Err(NodeError::Duplicate(id));
        }

        let validators = make_validators(info).ok_or_else(|| {
            NodeError::InvalidArgument(format!("committee {id} has a malformed member key"))
        })?;
        let base_height = info.base_height();
        let state_agent = StateAgent::new(
            self.agent.clone(),
            self.config.chain_id.clone(),
            validators,
            base_height,
            id,
        )?;
        let consensus_state = Arc::new(ConsensusState::new(
            self.config.consensus.clone(),
            Arc::new(state_agent),
            BlockStore::new(),
        ));

        let logger = self.logger.new(o!("committee" => id));
        let switch = self
            .switch_factory
            .new_switch(&self.config.p2p, logger.new(o!("component" => "switch")));
        let service = Arc::new(CommitteeService::new(
            id,
            consensus_state,
            switch,
            self.addr_book.clone(),
            self.event_bus.clone(),
            logger,
        ));

        match self.services.write().entry(id) {
            Entry::Occupied(_) => return Err(NodeError::Duplicate(id)),
            Entry::Vacant(entry) => {
                entry.insert(service);
            }
        }

        slog::info!(
            self.logger,
            "Committee registered";
            "committee" => id,
            "members" => info.members.len(),
            "base_height" => base_height,
        );
        self.event_bus.publish(CommitteeEvent::Registered {
            committee_id: id,
            base_height,
        });
        Ok(())
    }

    /// Feed newly announced members to a committee's peer registry.
    pub fn put_nodes(&self, id: &BigUint, members: &[CommitteeMember]) -> Result<(), NodeError> {
        let id = to_committee_id(id)?;
        if members.is_empty() {
            return Err(NodeError::InvalidArgument(format!(
                "no members given for committee {id}"
            )));
        }
        self.service(id)?.put_nodes(members);
        Ok(())
    }

    /// Mark the last height a committee is responsible for. The committee keeps
    /// running until it is stopped with [`CommitteeAction::Stop`].
    pub fn set_committee_stop(&self, id: &BigUint, end_height: u64) -> Result<(), NodeError> {
        let id = to_committee_id(id)?;
        self.service(id)?.state_agent().set_end_height(end_height);

        slog::info!(self.logger, "Committee end height set"; "committee" => id, "end_height" => end_height);
        self.event_bus.publish(CommitteeEvent::EndHeight {
            committee_id: id,
            height: end_height,
        });
        Ok(())
    }

    /// Status of a committee. No status fields are reported yet.
    pub fn get_committee_status(&self, _id: &BigUint) -> HashMap<String, String> {
        HashMap::new()
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.event_bus.clone()
    }

    pub fn addr_book(&self) -> Arc<dyn AddrBook> {
        self.addr_book.clone()
    }

    pub fn node_id(&self) -> NodeId {
        self.node_key.id()
    }

    /// The identity announced to peers, once the node has started.
    pub fn node_info(&self) -> Option<NodeInfo> {
        self.node_info.read().clone()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Ids of every registered committee, ascending.
    pub fn committee_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.services.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn committee(&self, id: u64) -> Option<Arc<CommitteeService>> {
        self.services.read().get(&id).cloned()
    }

    fn service(&self, id: u64) -> Result<Arc<CommitteeService>, NodeError> {
        self.committee(id).ok_or(NodeError::NotFound(id))
    }

    fn node_context(&self) -> Result<NodeContext, NodeError> {
        let node_info = self.node_info().ok_or(NodeError::NotStarted)?;
        Ok(NodeContext {
            p2p: self.config.p2p.clone(),
            node_info,
            node_key: self.node_key.clone(),
            priv_validator: self.priv_validator.clone(),
        })
    }

    fn make_node_info(&self) -> Result<NodeInfo, NodeError> {
        Ok(NodeInfo::new(
            self.node_key.id(),
            self.config.chain_id.clone(),
            self.config.moniker.clone(),
            &self.config.p2p.listen_address,
            channels::CONSENSUS.to_vec(),
        )?)
    }
}

fn to_committee_id(id: &BigUint) -> Result<u64, NodeError> {
    committee_id(id)
        .ok_or_else(|| NodeError::InvalidArgument(format!("committee id {id} exceeds 64 bits")))
}

/// Builder for [`Node`] with fluent configuration.
pub struct NodeBuilder {
    config: Option<NodeConfig>,
    secret_key: Option<BlsSecretKey>,
    agent: Option<Arc<dyn AgentProxy>>,
    switch_factory: Option<Arc<dyn SwitchFactory>>,
    logger: Option<Logger>,
}

impl Default for NodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            secret_key: None,
            agent: None,
            switch_factory: None,
            logger: None,
        }
    }

    /// Sets the node configuration. Defaults to [`NodeConfig::default`].
    pub fn with_config(mut self, config: NodeConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the node's BLS secret key.
    pub fn with_secret_key(mut self, secret_key: BlsSecretKey) -> Self {
        self.secret_key = Some(secret_key);
        self
    }

    /// Sets the proxy used by every committee to reach the application.
    pub fn with_agent(mut self, agent: Arc<dyn AgentProxy>) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Sets the switch factory. Defaults to [`TcpSwitchFactory`].
    pub fn with_switch_factory(mut self, switch_factory: Arc<dyn SwitchFactory>) -> Self {
        self.switch_factory = Some(switch_factory);
        self
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Builds the node.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret key or agent is missing, or if the
    /// configuration does not validate.
    pub fn build(self) -> Result<Node> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let secret_key = self
            .secret_key
            .ok_or_else(|| anyhow::anyhow!("secret_key is required"))?;
        let agent = self
            .agent
            .ok_or_else(|| anyhow::anyhow!("agent is required"))?;
        let switch_factory = self
            .switch_factory
            .unwrap_or_else(|| Arc::new(TcpSwitchFactory));
        let logger = self
            .logger
            .unwrap_or_else(|| Logger::root(slog::Discard, o!()));

        Ok(Node::new(config, secret_key, agent, switch_factory, logger))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::thread_rng;

    struct NoopAgent;

    impl AgentProxy for NoopAgent {
        fn fetch_block(&self, _: u64, _: u64) -> anyhow::Result<Vec<u8>> {
            Ok(Vec::new())
        }
        fn verify_block(&self, _: u64, _: &[u8]) -> anyhow::Result<()> {
            Ok(())
        }
        fn commit_block(&self, _: u64, _: u64, _: &[u8]) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn builder() -> NodeBuilder {
        NodeBuilder::new()
            .with_secret_key(BlsSecretKey::generate(&mut thread_rng()))
            .with_agent(Arc::new(NoopAgent))
    }

    #[test]
    fn test_builder_requires_secret_key_and_agent() {
        assert!(NodeBuilder::new().with_agent(Arc::new(NoopAgent)).build().is_err());
        assert!(
            NodeBuilder::new()
                .with_secret_key(BlsSecretKey::generate(&mut thread_rng()))
                .build()
                .is_err()
        );
        assert!(builder().build().is_ok());
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let config = NodeConfig {
            chain_id: String::new(),
            ..NodeConfig::default()
        };
        assert!(builder().with_config(config).build().is_err());
    }

    #[test]
    fn test_start_publishes_node_info_and_our_address() {
        let mut config = NodeConfig::default();
        config.moniker = "node-a".into();
        config.chain_id = "chain-a".into();
        config.p2p.listen_address = "tcp://127.0.0.1:26656".into();
        config.p2p.private_peer_ids = "deadbeef, cafe".into();
        let node = builder().with_config(config).build().unwrap();

        assert!(node.node_info().is_none());
        node.start().unwrap();
        assert!(node.is_running());
        assert!(node.event_bus().is_running());

        let info = node.node_info().unwrap();
        assert_eq!(info.id, node.node_id());
        assert_eq!(info.network, "chain-a");
        assert_eq!(info.moniker, "node-a");
        assert_eq!(info.listen_addr, "127.0.0.1:26656");
        assert_eq!(info.channels, channels::CONSENSUS.to_vec());
        assert!(node.addr_book().our_address(&info.net_address().unwrap()));

        assert!(matches!(node.start(), Err(NodeError::AlreadyStarted)));
        node.stop();
        assert!(!node.is_running());
        assert!(!node.event_bus().is_running());
        assert!(node.node_info().is_none());
    }

    #[test]
    fn test_start_fails_on_bad_listen_address() {
        let mut config = NodeConfig::default();
        config.p2p.listen_address = "tcp://not-an-address".into();
        let node = builder().with_config(config).build().unwrap();

        assert!(matches!(node.start(), Err(NodeError::P2P(_))));
        assert!(!node.is_running());
        assert!(!node.event_bus().is_running());
    }

    #[test]
    fn test_oversized_committee_id_is_invalid() {
        let node = builder().build().unwrap();
        let id = BigUint::from(u64::MAX) + 1u32;
        assert!(matches!(
            node.put_nodes(&id, &[]),
            Err(NodeError::InvalidArgument(_))
        ));
        assert!(node.notify(&id, CommitteeAction::Switch).is_ok());
    }
}

//! Committee service: everything one committee runs on this node.
//!
//! A [`CommitteeService`] bundles the committee's switch, consensus state and
//! reactor, peer registry and connection dispatcher. It moves through three
//! states and never goes back:
//!
//! ```text
//! Created ──start()──► Running ──stop()──► Stopped
//!    ▲          │
//!    └─ failed ─┘
//! ```
//!
//! A failed start leaves the service in `Created` so it can be retried.
//! `stop` is idempotent.

use std::sync::Arc;

use consensus::{
    consensus_manager::{
        consensus_state::{ConsensusState, PrivValidator},
        state_agent::StateAgent,
    },
    events::EventBus,
    state::committee::CommitteeMember,
};
use p2p::{
    AddrBook, DispatchNotifier, Dispatcher, Listener, NodeInfo, NodeKey, NotifyOutcome,
    P2PConfig, PeerRegistry, Switch,
    protocols::{ConsensusReactor, REACTOR_NAME},
};
use parking_lot::{Mutex, RwLock};
use slog::{Logger, o};

use crate::error::NodeError;

/// Lifecycle state of a [`CommitteeService`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceState {
    /// Registered, not yet started.
    Created,
    /// Switch listening and dispatcher active.
    Running,
    /// Switch and dispatcher terminated.
    Stopped,
}

/// Node-wide identity and settings a committee needs to start.
#[derive(Clone)]
pub struct NodeContext {
    pub p2p: P2PConfig,
    pub node_info: NodeInfo,
    pub node_key: NodeKey,
    pub priv_validator: PrivValidator,
}

struct Lifecycle {
    state: ServiceState,
    dispatcher: Option<Dispatcher>,
}

pub struct CommitteeService {
    committee_id: u64,
    switch: Arc<dyn Switch>,
    consensus_state: Arc<ConsensusState>,
    reactor: Arc<ConsensusReactor>,
    registry: Arc<PeerRegistry>,
    lifecycle: Mutex<Lifecycle>,
    /// Set while running. Kept apart from `lifecycle` so that `put_nodes`
    /// never waits behind a start or stop in progress.
    notifier: RwLock<Option<DispatchNotifier>>,
    logger: Logger,
}

impl CommitteeService {
    /// Wire a new committee: the consensus reactor is registered on the switch,
    /// and the switch shares the node's address book and event bus.
    pub fn new(
        committee_id: u64,
        consensus_state: Arc<ConsensusState>,
        switch: Arc<dyn Switch>,
        addr_book: Arc<dyn AddrBook>,
        event_bus: Arc<EventBus>,
        logger: Logger,
    ) -> Self {
        let reactor = Arc::new(ConsensusReactor::new(consensus_state.clone(), false));
        reactor.set_event_bus(event_bus);
        switch.add_reactor(REACTOR_NAME, reactor.clone());
        switch.set_addr_book(addr_book);

        Self {
            committee_id,
            switch,
            consensus_state,
            reactor,
            registry: Arc::new(PeerRegistry::new(logger.new(o!("component" => "peers")))),
            lifecycle: Mutex::new(Lifecycle {
                state: ServiceState::Created,
                dispatcher: None,
            }),
            notifier: RwLock::new(None),
            logger,
        }
    }

    /// Attach a listener and the node identity to the switch, start it, and
    /// spawn the connection dispatcher.
    pub fn start(&self, ctx: &NodeContext) -> Result<(), NodeError> {
        let mut lifecycle = self.lifecycle.lock();
        match lifecycle.state {
            ServiceState::Created => {}
            ServiceState::Running => return Err(NodeError::AlreadyStarted),
            ServiceState::Stopped => return Err(NodeError::ServiceStopped(self.committee_id)),
        }

        self.switch.add_listener(Listener::new(
            ctx.p2p.listen_address.clone(),
            ctx.p2p.external_address.clone(),
            ctx.p2p.upnp,
            self.logger.new(o!("component" => "listener")),
        ));
        self.switch.set_node_info(ctx.node_info.clone());
        self.switch.set_node_key(ctx.node_key.clone());
        self.consensus_state
            .set_priv_validator(ctx.priv_validator.clone());

        if let Err(e) = self.switch.start() {
            slog::error!(self.logger, "Failed to start switch"; "error" => %e);
            return Err(NodeError::SwitchStart(e));
        }

        let dispatcher = match Dispatcher::spawn(
            &self.committee_id.to_string(),
            self.registry.clone(),
            self.switch.clone(),
            self.logger.new(o!("component" => "dispatcher")),
        ) {
            Ok(dispatcher) => dispatcher,
            Err(e) => {
                self.switch.stop();
                return Err(e.into());
            }
        };

        // Publish the notifier before looking for pending peers: a concurrent
        // put_nodes either sees the notifier or inserted before this check.
        let notifier = dispatcher.notifier();
        *self.notifier.write() = Some(notifier.clone());
        if self.registry.has_pending() {
            notifier.notify();
        }

        lifecycle.dispatcher = Some(dispatcher);
        lifecycle.state = ServiceState::Running;
        slog::info!(self.logger, "Committee service started"; "peers" => self.registry.len());
        Ok(())
    }

    /// Terminate the dispatcher and stop the switch.
    ///
    /// Returns `true` if the service was running and is now stopped; calling
    /// it again, or on a service that never started, does nothing.
    pub fn stop(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state != ServiceState::Running {
            return false;
        }

        self.notifier.write().take();
        if let Some(dispatcher) = lifecycle.dispatcher.take() {
            dispatcher.shutdown_and_wait();
        }
        self.switch.stop();

        lifecycle.state = ServiceState::Stopped;
        slog::info!(self.logger, "Committee service stopped");
        true
    }

    /// Add newly announced members to the peer registry and, if any were new,
    /// request a connect pass without waiting for it.
    ///
    /// Peers added before the service starts are dialed once it starts.
    pub fn put_nodes(&self, members: &[CommitteeMember]) -> bool {
        if !self.registry.insert(members) {
            return false;
        }

        let outcome = self.notifier.read().as_ref().map(DispatchNotifier::notify);
        match outcome {
            Some(NotifyOutcome::Queued) => {
                slog::debug!(self.logger, "Connect pass requested");
            }
            Some(NotifyOutcome::Coalesced) => {
                slog::debug!(self.logger, "Connect pass already pending");
            }
            Some(NotifyOutcome::Closed) => {
                slog::warn!(self.logger, "Dispatcher has exited, connect request dropped");
            }
            None => {
                slog::debug!(self.logger, "Committee not running, peers queued until start");
            }
        }
        true
    }

    pub fn committee_id(&self) -> u64 {
        self.committee_id
    }

    pub fn state(&self) -> ServiceState {
        self.lifecycle.lock().state
    }

    pub fn state_agent(&self) -> &Arc<StateAgent> {
        self.consensus_state.state_agent()
    }

    pub fn consensus_state(&self) -> &Arc<ConsensusState> {
        &self.consensus_state
    }

    pub fn consensus_reactor(&self) -> &Arc<ConsensusReactor> {
        &self.reactor
    }

    pub fn peer_registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    pub fn switch(&self) -> &Arc<dyn Switch> {
        &self.switch
    }
}

//! TCP-backed [`Switch`].
//!
//! Each started switch owns a tokio runtime driven from a dedicated thread.
//! Listeners accept on that runtime, and every open connection is watched by a
//! task that forgets the connection once the remote end closes it. Stopping the
//! switch shuts the runtime down, which closes every listener and stream.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread::JoinHandle,
    time::Duration,
};

use parking_lot::{Mutex, RwLock};
use slog::{Logger, o};
use tokio::{
    io::AsyncReadExt,
    net::{TcpListener, TcpStream},
    runtime::{Builder, Handle, Runtime},
    sync::Notify,
};

use crate::{
    addr_book::AddrBook,
    address::NetAddress,
    config::P2PConfig,
    error::P2PError,
    identity::{NodeId, NodeInfo, NodeKey},
    switch::{Listener, Reactor, Switch, SwitchFactory},
};

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Time given to in-flight tasks when the switch runtime shuts down.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

#[derive(Default)]
struct Wiring {
    listeners: Vec<Listener>,
    reactors: Vec<(String, Arc<dyn Reactor>)>,
    addr_book: Option<Arc<dyn AddrBook>>,
    node_info: Option<NodeInfo>,
    node_key: Option<NodeKey>,
}

struct Peer {
    persistent: bool,
    conn: u64,
}

/// Connection tables shared with the tasks running on the switch runtime.
struct Connections {
    peers: Mutex<HashMap<NodeId, Peer>>,
    inbound: Mutex<HashMap<u64, SocketAddr>>,
    next_conn: AtomicU64,
    max_num_peers: usize,
}

impl Connections {
    fn next_conn(&self) -> u64 {
        self.next_conn.fetch_add(1, Ordering::Relaxed)
    }

    /// Inbound and outbound connections currently held.
    fn occupied(&self) -> usize {
        let inbound = self.inbound.lock().len();
        inbound + self.peers.lock().len()
    }

    /// Forget `id` if it is still bound to connection `conn`.
    fn remove_peer(&self, id: &NodeId, conn: u64) -> bool {
        let mut peers = self.peers.lock();
        if peers.get(id).is_some_and(|p| p.conn == conn) {
            peers.remove(id);
            true
        } else {
            false
        }
    }
}

/// Runtime state of a started switch.
struct Running {
    handle: Handle,
    shutdown: Arc<Notify>,
    thread: JoinHandle<()>,
    local_addrs: Vec<SocketAddr>,
}

/// A [`Switch`] over plain TCP connections.
pub struct TcpSwitch {
    config: P2PConfig,
    wiring: Mutex<Wiring>,
    connections: Arc<Connections>,
    running: RwLock<Option<Running>>,
    logger: Logger,
}

impl TcpSwitch {
    pub fn new(config: P2PConfig, logger: Logger) -> Self {
        let connections = Arc::new(Connections {
            peers: Mutex::new(HashMap::new()),
            inbound: Mutex::new(HashMap::new()),
            next_conn: AtomicU64::new(0),
            max_num_peers: config.max_num_peers,
        });
        Self {
            config,
            wiring: Mutex::new(Wiring::default()),
            connections,
            running: RwLock::new(None),
            logger,
        }
    }

    /// Ids of the peers we dialed successfully.
    pub fn peers(&self) -> Vec<NodeId> {
        self.connections.peers.lock().keys().copied().collect()
    }

    pub fn num_peers(&self) -> usize {
        self.connections.peers.lock().len()
    }

    /// Accepted connections whose remote end has not closed yet.
    pub fn num_inbound(&self) -> usize {
        self.connections.inbound.lock().len()
    }

    pub fn is_persistent(&self, id: &NodeId) -> bool {
        self.connections
            .peers
            .lock()
            .get(id)
            .is_some_and(|p| p.persistent)
    }

    /// Addresses the listeners are bound to, empty while stopped.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.running
            .read()
            .as_ref()
            .map(|r| r.local_addrs.clone())
            .unwrap_or_default()
    }
}

fn build_runtime() -> std::io::Result<Runtime> {
    Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("p2p-switch-worker")
        .enable_all()
        .build()
}

/// Read from `stream` until the remote end closes it or the read fails.
async fn read_until_closed(mut stream: TcpStream) {
    let mut buf = [0u8; 1024];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

async fn accept_loop(listener: TcpListener, connections: Arc<Connections>, logger: Logger) {
    slog::debug!(logger, "Accept loop started");
    loop {
        let (stream, remote) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                slog::warn!(logger, "Accept failed"; "error" => %e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };

        if connections.occupied() >= connections.max_num_peers {
            slog::debug!(
                logger,
                "Rejecting inbound connection, connection limit reached";
                "remote" => %remote,
                "max_num_peers" => connections.max_num_peers,
            );
            continue;
        }

        let conn = connections.next_conn();
        connections.inbound.lock().insert(conn, remote);
        slog::debug!(logger, "Accepted inbound connection"; "remote" => %remote);

        let connections = Arc::clone(&connections);
        let logger = logger.clone();
        tokio::spawn(async move {
            read_until_closed(stream).await;
            connections.inbound.lock().remove(&conn);
            slog::debug!(logger, "Inbound connection closed"; "remote" => %remote);
        });
    }
}

impl Switch for TcpSwitch {
    fn add_listener(&self, listener: Listener) {
        let mut wiring = self.wiring.lock();
        // A committee retrying a failed start attaches the same listener again.
        if wiring
            .listeners
            .iter()
            .any(|l| l.listen_address() == listener.listen_address())
        {
            return;
        }
        wiring.listeners.push(listener);
    }

    fn add_reactor(&self, name: &str, reactor: Arc<dyn Reactor>) {
        self.wiring.lock().reactors.push((name.to_string(), reactor));
    }

    fn set_addr_book(&self, addr_book: Arc<dyn AddrBook>) {
        self.wiring.lock().addr_book = Some(addr_book);
    }

    fn set_node_info(&self, node_info: NodeInfo) {
        self.wiring.lock().node_info = Some(node_info);
    }

    fn set_node_key(&self, node_key: NodeKey) {
        self.wiring.lock().node_key = Some(node_key);
    }

    fn start(&self) -> Result<(), P2PError> {
        let mut running = self.running.write();
        if running.is_some() {
            return Err(P2PError::AlreadyStarted);
        }
        let wiring = self.wiring.lock();
        let node_info = wiring
            .node_info
            .as_ref()
            .ok_or_else(|| P2PError::Config("node info not set".to_string()))?;
        if wiring.node_key.is_none() {
            return Err(P2PError::Config("node key not set".to_string()));
        }

        // Bind everything before spawning so a failed bind leaves nothing running.
        let mut bound = Vec::with_capacity(wiring.listeners.len());
        for listener in &wiring.listeners {
            let addr = listener.bind_addr()?;
            let bind_err = |source| P2PError::Bind {
                addr: addr.to_string(),
                source,
            };
            let tcp = std::net::TcpListener::bind(addr).map_err(bind_err)?;
            tcp.set_nonblocking(true).map_err(bind_err)?;
            let local = tcp.local_addr().map_err(bind_err)?;
            if listener.upnp() {
                slog::warn!(
                    listener.logger(),
                    "UPnP port mapping is not supported, listener is reachable at its external address only"
                );
            }
            bound.push((tcp, local, listener.external_addr()?));
        }

        let runtime = build_runtime().map_err(|e| {
            P2PError::Anyhow(anyhow::Error::new(e).context("Failed to build switch runtime"))
        })?;
        let handle = runtime.handle().clone();

        let mut listeners = Vec::with_capacity(bound.len());
        let mut local_addrs = Vec::with_capacity(bound.len());
        {
            let _guard = runtime.enter();
            for (tcp, local, external) in bound {
                let tcp = TcpListener::from_std(tcp).map_err(|source| P2PError::Bind {
                    addr: local.to_string(),
                    source,
                })?;
                listeners.push((tcp, external));
                local_addrs.push(local);
            }
        }

        let shutdown = Arc::new(Notify::new());
        let shutdown_clone = Arc::clone(&shutdown);
        let connections = Arc::clone(&self.connections);
        let logger = self.logger.clone();
        let thread_name = match local_addrs.first() {
            Some(addr) => format!("p2p-switch-{}", addr.port()),
            None => "p2p-switch".to_string(),
        };

        let thread = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                runtime.block_on(async move {
                    for (listener, external) in listeners {
                        let logger = logger.new(o!("listener" => external.to_string()));
                        tokio::spawn(accept_loop(listener, Arc::clone(&connections), logger));
                    }
                    shutdown_clone.notified().await;
                    slog::debug!(logger, "Switch runtime received shutdown signal");
                });
                runtime.shutdown_timeout(SHUTDOWN_GRACE);
            })
            .map_err(|e| {
                P2PError::Anyhow(anyhow::Error::new(e).context("Failed to spawn switch thread"))
            })?;

        slog::info!(
            self.logger,
            "Switch started";
            "node_id" => %node_info.id,
            "listeners" => wiring.listeners.len(),
            "reactors" => wiring.reactors.len(),
        );

        *running = Some(Running {
            handle,
            shutdown,
            thread,
            local_addrs,
        });
        Ok(())
    }

    fn stop(&self) {
        let mut guard = self.running.write();
        let Some(running) = guard.take() else {
            return;
        };
        running.shutdown.notify_one();
        if running.thread.join().is_err() {
            slog::error!(self.logger, "Switch thread panicked");
        }

        let reactors = self.wiring.lock().reactors.clone();
        let dropped: Vec<NodeId> = self
            .connections
            .peers
            .lock()
            .drain()
            .map(|(id, _)| id)
            .collect();
        for id in &dropped {
            for (_, reactor) in &reactors {
                reactor.remove_peer(id);
            }
        }
        self.connections.inbound.lock().clear();

        slog::info!(self.logger, "Switch stopped"; "dropped_peers" => dropped.len());
    }

    fn is_running(&self) -> bool {
        self.running.read().is_some()
    }

    /// Blocks the calling thread for at most the configured dial timeout. Must
    /// not be called from within an async context.
    fn dial_peer_with_address(
        &self,
        addr: &NetAddress,
        persistent: bool,
    ) -> Result<(), P2PError> {
        let guard = self.running.read();
        let Some(running) = guard.as_ref() else {
            return Err(P2PError::NotStarted);
        };

        let (reactors, addr_book, own_id) = {
            let wiring = self.wiring.lock();
            (
                wiring.reactors.clone(),
                wiring.addr_book.clone(),
                wiring.node_info.as_ref().map(|info| info.id),
            )
        };

        let is_self = own_id == Some(addr.id)
            || addr_book.as_ref().is_some_and(|book| book.our_address(addr));
        if is_self {
            return Err(P2PError::Connection(format!("refusing to dial self at {addr}")));
        }

        if self.connections.peers.lock().contains_key(&addr.id) {
            return Ok(());
        }
        if self.connections.occupied() >= self.config.max_num_peers {
            return Err(P2PError::Connection(format!(
                "max peers ({}) reached",
                self.config.max_num_peers
            )));
        }

        let socket = addr.socket_addr();
        let stream = running
            .handle
            .block_on(async {
                tokio::time::timeout(self.config.dial_timeout(), TcpStream::connect(socket)).await
            })
            .map_err(|_| P2PError::Connection(format!("dial {addr}: timed out")))?
            .map_err(|e| P2PError::Connection(format!("dial {addr}: {e}")))?;

        let conn = self.connections.next_conn();
        self.connections
            .peers
            .lock()
            .insert(addr.id, Peer { persistent, conn });
        for (_, reactor) in &reactors {
            reactor.add_peer(&addr.id);
        }
        if let Some(book) = addr_book {
            book.mark_good(addr);
        }

        let connections = Arc::clone(&self.connections);
        let id = addr.id;
        let logger = self.logger.new(o!("peer" => addr.to_string()));
        running.handle.spawn(async move {
            read_until_closed(stream).await;
            if connections.remove_peer(&id, conn) {
                for (_, reactor) in &reactors {
                    reactor.remove_peer(&id);
                }
                slog::info!(logger, "Peer closed the connection");
            }
        });

        slog::debug!(self.logger, "Dialed peer"; "peer" => %addr, "persistent" => persistent);
        Ok(())
    }
}

impl Drop for TcpSwitch {
    fn drop(&mut self) {
        self.stop();
    }
}

/// [`SwitchFactory`] producing [`TcpSwitch`]es.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpSwitchFactory;

impl SwitchFactory for TcpSwitchFactory {
    fn new_switch(&self, config: &P2PConfig, logger: Logger) -> Arc<dyn Switch> {
        Arc::new(TcpSwitch::new(config.clone(), logger))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr_book::MemAddrBook;
    use consensus::crypto::aggregated::BlsSecretKey;
    use rand::thread_rng;
    use std::{net::TcpStream as StdTcpStream, time::Instant};

    #[derive(Default)]
    struct CountingReactor {
        peers: Mutex<Vec<NodeId>>,
    }

    impl Reactor for CountingReactor {
        fn channels(&self) -> Vec<u8> {
            vec![0x20]
        }
        fn add_peer(&self, peer: &NodeId) {
            self.peers.lock().push(*peer);
        }
        fn remove_peer(&self, peer: &NodeId) {
            self.peers.lock().retain(|p| p != peer);
        }
    }

    fn logger() -> Logger {
        Logger::root(slog::Discard, o!())
    }

    fn wired_switch_with(config: P2PConfig, listen: &str) -> (TcpSwitch, NodeKey) {
        let switch = TcpSwitch::new(config, logger());
        let key = NodeKey::new(BlsSecretKey::generate(&mut thread_rng()));
        let info = NodeInfo::new(key.id(), "test", "node", listen, vec![]).unwrap();
        switch.add_listener(Listener::new(listen, None, false, logger()));
        switch.set_node_info(info);
        switch.set_node_key(key.clone());
        (switch, key)
    }

    fn wired_switch(listen: &str) -> (TcpSwitch, NodeKey) {
        wired_switch_with(P2PConfig::default(), listen)
    }

    fn peer_addr(port: u16) -> NetAddress {
        let id = NodeKey::new(BlsSecretKey::generate(&mut thread_rng())).id();
        NetAddress::from_host_port(id, &format!("127.0.0.1:{port}")).unwrap()
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        cond()
    }

    #[test]
    fn test_start_requires_node_info() {
        let switch = TcpSwitch::new(P2PConfig::default(), logger());
        assert!(matches!(switch.start(), Err(P2PError::Config(_))));
        assert!(!switch.is_running());
    }

    #[test]
    fn test_start_and_stop() {
        let (switch, _) = wired_switch("tcp://127.0.0.1:0");
        switch.start().unwrap();
        assert!(switch.is_running());
        assert_eq!(switch.local_addrs().len(), 1);
        assert!(matches!(switch.start(), Err(P2PError::AlreadyStarted)));

        switch.stop();
        assert!(!switch.is_running());
        assert!(switch.local_addrs().is_empty());
        // Stopping twice is harmless.
        switch.stop();
    }

    #[test]
    fn test_stop_releases_listen_port() {
        let (switch, _) = wired_switch("tcp://127.0.0.1:0");
        switch.start().unwrap();
        let local = switch.local_addrs()[0];
        switch.stop();

        assert!(std::net::TcpListener::bind(local).is_ok());
    }

    #[test]
    fn test_bind_conflict_fails_start() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let (switch, _) = wired_switch(&format!("tcp://127.0.0.1:{port}"));
        assert!(matches!(switch.start(), Err(P2PError::Bind { .. })));
        assert!(!switch.is_running());
    }

    #[test]
    fn test_dial_requires_running_switch() {
        let (switch, _) = wired_switch("tcp://127.0.0.1:0");
        let err = switch.dial_peer_with_address(&peer_addr(1), true).unwrap_err();
        assert!(matches!(err, P2PError::NotStarted));
    }

    #[test]
    fn test_dial_connects_and_notifies_reactors() {
        let remote = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = remote.local_addr().unwrap().port();

        let (switch, _) = wired_switch("tcp://127.0.0.1:0");
        let reactor = Arc::new(CountingReactor::default());
        let book = Arc::new(MemAddrBook::new("addrbook.json", false));
        switch.add_reactor("CONSENSUS", reactor.clone());
        switch.set_addr_book(book.clone());
        switch.start().unwrap();

        let addr = peer_addr(port);
        switch.dial_peer_with_address(&addr, true).unwrap();

        assert_eq!(switch.peers(), vec![addr.id]);
        assert!(switch.is_persistent(&addr.id));
        assert_eq!(reactor.peers.lock().as_slice(), &[addr.id]);
        assert!(book.has_address(&addr));

        // Redialing a connected peer is a no-op.
        switch.dial_peer_with_address(&addr, true).unwrap();
        assert_eq!(switch.num_peers(), 1);

        switch.stop();
        assert_eq!(switch.num_peers(), 0);
        assert!(reactor.peers.lock().is_empty());
    }

    #[test]
    fn test_peer_closing_connection_is_removed() {
        let remote = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = remote.local_addr().unwrap().port();

        let (switch, _) = wired_switch("tcp://127.0.0.1:0");
        let reactor = Arc::new(CountingReactor::default());
        switch.add_reactor("CONSENSUS", reactor.clone());
        switch.start().unwrap();

        let addr = peer_addr(port);
        switch.dial_peer_with_address(&addr, false).unwrap();
        let (accepted, _) = remote.accept().unwrap();
        assert_eq!(switch.num_peers(), 1);

        drop(accepted);
        assert!(wait_until(|| switch.num_peers() == 0));
        assert!(wait_until(|| reactor.peers.lock().is_empty()));

        // The peer can be dialed again once it is gone.
        switch.dial_peer_with_address(&addr, false).unwrap();
        assert_eq!(switch.peers(), vec![addr.id]);
    }

    #[test]
    fn test_dial_refused() {
        let port = {
            let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            closed.local_addr().unwrap().port()
        };

        let (switch, _) = wired_switch("tcp://127.0.0.1:0");
        switch.start().unwrap();

        let err = switch
            .dial_peer_with_address(&peer_addr(port), true)
            .unwrap_err();
        assert!(matches!(err, P2PError::Connection(_)));
        assert_eq!(switch.num_peers(), 0);
    }

    #[test]
    fn test_dial_self_refused() {
        let (switch, key) = wired_switch("tcp://127.0.0.1:0");
        switch.start().unwrap();

        let me = NetAddress::from_host_port(key.id(), "127.0.0.1:1").unwrap();
        let err = switch.dial_peer_with_address(&me, false).unwrap_err();
        assert!(err.to_string().contains("refusing to dial self"));
    }

    #[test]
    fn test_closed_inbound_connections_are_evicted() {
        let (switch, _) = wired_switch("tcp://127.0.0.1:0");
        switch.start().unwrap();
        let local = switch.local_addrs()[0];

        let open: Vec<_> = (0..3).map(|_| StdTcpStream::connect(local).unwrap()).collect();
        assert!(wait_until(|| switch.num_inbound() == 3));

        drop(open);
        assert!(wait_until(|| switch.num_inbound() == 0));

        // Connection churn does not accumulate state.
        for _ in 0..20 {
            drop(StdTcpStream::connect(local).unwrap());
        }
        assert!(wait_until(|| switch.num_inbound() == 0));
    }

    #[test]
    fn test_inbound_connections_are_capped() {
        let config = P2PConfig {
            max_num_peers: 2,
            ..P2PConfig::default()
        };
        let (switch, _) = wired_switch_with(config, "tcp://127.0.0.1:0");
        switch.start().unwrap();
        let local = switch.local_addrs()[0];

        let _open: Vec<_> = (0..4).map(|_| StdTcpStream::connect(local).unwrap()).collect();
        assert!(wait_until(|| switch.num_inbound() == 2));
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(switch.num_inbound(), 2);

        // The inbound connections also count against outbound dials.
        let remote = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = remote.local_addr().unwrap().port();
        let err = switch
            .dial_peer_with_address(&peer_addr(port), false)
            .unwrap_err();
        assert!(err.to_string().contains("max peers"));
    }

    #[test]
    fn test_add_listener_deduplicates() {
        let (switch, _) = wired_switch("tcp://127.0.0.1:0");
        switch.add_listener(Listener::new("tcp://127.0.0.1:0", None, false, logger()));
        assert_eq!(switch.wiring.lock().listeners.len(), 1);
    }
}

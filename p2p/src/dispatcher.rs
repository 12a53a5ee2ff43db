//! Connection dispatcher: one background worker per committee that dials the
//! committee's not-yet-connected peers whenever it is signalled.
//!
//! ## Signalling
//!
//! The worker reads [`DispatchSignal`]s from a channel of capacity one.
//! Producers never block: [`DispatchNotifier::notify`] uses `try_send`, so a
//! full channel means a pass is already pending and the new request folds into
//! it. Passes are idempotent over "not yet connected", so coalescing loses
//! nothing. Once the worker has exited the channel is disconnected and further
//! notifications are dropped.
//!
//! ```text
//! put_nodes ──notify()──► [cap 1] ──► worker ──► PeerRegistry::connect_pending
//!                                                      │
//!                                                      └──► Switch::dial_peer_with_address
//! ```

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use slog::Logger;

use crate::{
    error::P2PError,
    peer::{ConnectPass, PeerRegistry},
    switch::Switch,
};

/// Message understood by the dispatcher worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchSignal {
    /// Attempt to connect every pending peer now.
    Connect,
    /// Exit the worker.
    Terminate,
}

/// Result of a non-blocking notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// A new pass was queued.
    Queued,
    /// A pass was already queued; this request is folded into it.
    Coalesced,
    /// The worker has exited.
    Closed,
}

/// Cloneable, non-blocking handle for requesting a connect pass.
#[derive(Clone)]
pub struct DispatchNotifier {
    tx: Sender<DispatchSignal>,
}

impl DispatchNotifier {
    pub fn notify(&self) -> NotifyOutcome {
        match self.tx.try_send(DispatchSignal::Connect) {
            Ok(()) => NotifyOutcome::Queued,
            Err(TrySendError::Full(_)) => NotifyOutcome::Coalesced,
            Err(TrySendError::Disconnected(_)) => NotifyOutcome::Closed,
        }
    }
}

/// Handle to a running dispatcher worker.
pub struct Dispatcher {
    tx: Sender<DispatchSignal>,
    thread_handle: Option<JoinHandle<()>>,
    logger: Logger,
}

impl Dispatcher {
    /// Spawn the worker thread for one committee.
    pub fn spawn(
        name: &str,
        registry: Arc<PeerRegistry>,
        switch: Arc<dyn Switch>,
        logger: Logger,
    ) -> Result<Self, P2PError> {
        let (tx, rx) = channel::bounded(1);
        let thread_logger = logger.clone();
        let thread_handle = thread::Builder::new()
            .name(format!("dispatcher-{name}"))
            .spawn(move || run_dispatcher(rx, registry, switch, thread_logger))
            .map_err(|e| {
                P2PError::Anyhow(anyhow::Error::new(e).context("Failed to spawn dispatcher thread"))
            })?;

        Ok(Self {
            tx,
            thread_handle: Some(thread_handle),
            logger,
        })
    }

    pub fn notifier(&self) -> DispatchNotifier {
        DispatchNotifier {
            tx: self.tx.clone(),
        }
    }

    /// Request a connect pass without blocking.
    pub fn notify(&self) -> NotifyOutcome {
        self.notifier().notify()
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Signal the worker to exit and wait for it.
    ///
    /// Waits for an in-flight pass to finish; passes are not cancellable.
    pub fn shutdown_and_wait(mut self) {
        self.terminate();
    }

    fn terminate(&mut self) {
        let Some(handle) = self.thread_handle.take() else {
            return;
        };
        // Fails only if the worker already exited.
        let _ = self.tx.send(DispatchSignal::Terminate);
        if handle.join().is_err() {
            slog::error!(self.logger, "Dispatcher thread panicked");
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn run_dispatcher(
    rx: Receiver<DispatchSignal>,
    registry: Arc<PeerRegistry>,
    switch: Arc<dyn Switch>,
    logger: Logger,
) {
    slog::info!(logger, "Dispatcher started");
    while let Ok(signal) = rx.recv() {
        match signal {
            DispatchSignal::Connect => {
                let pass = connect_pass(&registry, switch.as_ref());
                slog::debug!(
                    logger,
                    "Connect pass finished";
                    "attempted" => pass.attempted,
                    "connected" => pass.connected,
                    "pending" => pass.attempted - pass.connected,
                );
            }
            DispatchSignal::Terminate => break,
        }
    }
    slog::info!(logger, "Dispatcher stopped");
}

/// Dial every disconnected peer of `registry` through `switch` as persistent peers.
pub fn connect_pass(registry: &PeerRegistry, switch: &dyn Switch) -> ConnectPass {
    registry.connect_pending(|peer| switch.dial_peer_with_address(&peer.address, true))
}

//! Request/reply bridge for one service instance.
//!
//! An [`RpcBridge`] ties together everything a service needs on the bus:
//! a [`Producer`] for calls and events, a reply listener that feeds the
//! correlation tracker, the deadline reaper, and (when handlers are
//! registered) a dispatcher that answers requests on the service's own
//! request topics.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::listener::ListenerHandle;
use crate::tracker::CorrelationTracker;
use crate::{
    // ---
    log_info,
    FailurePolicy,
    Producer,
    Result,
    Topic,
    TopicRegistry,
    TransportPtr,
};

/// Acquire mutex guard, ignoring poisoning
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Point-in-time view of a bridge, suitable for a status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStatus {
    pub service: String,
    pub node_id: String,
    /// False once the bridge has been shut down.
    pub producer_available: bool,
    pub pending_requests: usize,
    pub failure_policy: String,
    pub request_topics: Vec<String>,
    pub reply_topics: Vec<String>,
}

/// Running bridge. Clones share the same instance.
#[derive(Clone)]
pub struct RpcBridge {
    inner: Arc<Inner>,
}

pub(crate) struct BridgeParts {
    pub transport: TransportPtr,
    pub registry: TopicRegistry,
    pub producer: Producer,
    pub tracker: Arc<CorrelationTracker>,
    pub policy: FailurePolicy,
    pub handled_topics: Vec<Topic>,
    pub reply_listener: ListenerHandle,
    pub request_listener: Option<ListenerHandle>,
    pub reaper: JoinHandle<()>,
}

struct Inner {
    parts: BridgeParts,
    running: Mutex<bool>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    shutdown_rx: Mutex<Option<oneshot::Receiver<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // ---
        self.parts.reply_listener.abort();
        if let Some(listener) = &self.parts.request_listener {
            listener.abort();
        }
        self.parts.reaper.abort();
    }
}

impl RpcBridge {
    pub(crate) fn new(parts: BridgeParts) -> Self {
        // ---
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        log_info!(
            "{}: bridge for service {} started ({} handler topic(s))",
            parts.transport.transport_id(),
            parts.registry.service(),
            parts.handled_topics.len()
        );

        Self {
            inner: Arc::new(Inner {
                parts,
                running: Mutex::new(true),
                shutdown_tx: Mutex::new(Some(shutdown_tx)),
                shutdown_rx: Mutex::new(Some(shutdown_rx)),
            }),
        }
    }

    /// The producer for calls and events.
    pub fn producer(&self) -> &Producer {
        &self.inner.parts.producer
    }

    /// This service's topic registry.
    pub fn registry(&self) -> &TopicRegistry {
        &self.inner.parts.registry
    }

    /// The transport the bridge runs on.
    pub fn transport(&self) -> &TransportPtr {
        &self.inner.parts.transport
    }

    /// Current status.
    pub fn status(&self) -> BridgeStatus {
        // ---
        let parts = &self.inner.parts;
        BridgeStatus {
            service: parts.registry.service().to_string(),
            node_id: parts.transport.transport_id().to_string(),
            producer_available: *lock_ignore_poison(&self.inner.running),
            pending_requests: parts.tracker.len(),
            failure_policy: format!("{:?}", parts.policy),
            request_topics: parts.handled_topics.iter().map(Topic::to_string).collect(),
            reply_topics: parts.producer.reply_topics().map(Topic::to_string).collect(),
        }
    }

    /// Wait until [`shutdown`](Self::shutdown) is called.
    ///
    /// Only the first caller waits; later calls return immediately.
    pub async fn run(&self) -> Result<()> {
        // ---
        let shutdown_rx = lock_ignore_poison(&self.inner.shutdown_rx).take();
        if let Some(rx) = shutdown_rx {
            let _ = rx.await;
        }
        Ok(())
    }

    /// Stop listening, release waiting callers and close the transport.
    ///
    /// Callers still waiting on a reply receive
    /// [`RpcError::Abandoned`](crate::RpcError::Abandoned). Calling this more
    /// than once is harmless.
    pub async fn shutdown(&self) -> Result<()> {
        // ---
        {
            let mut running = lock_ignore_poison(&self.inner.running);
            if !*running {
                return Ok(());
            }
            *running = false;
        }

        if let Some(tx) = lock_ignore_poison(&self.inner.shutdown_tx).take() {
            let _ = tx.send(());
        }

        let parts = &self.inner.parts;
        if let Some(listener) = &parts.request_listener {
            listener.abort();
        }
        parts.reply_listener.abort();
        parts.reaper.abort();

        let abandoned = parts.tracker.abandon_all();
        log_info!(
            "{}: bridge shut down, {abandoned} waiting caller(s) released",
            parts.transport.transport_id()
        );

        parts.transport.close().await
    }
}

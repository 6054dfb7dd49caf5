//! Listener plumbing.
//!
//! Glue between a [`Transport`](crate::Transport) subscription and the code
//! that consumes it. [`run`] subscribes on behalf of a [`TransportConsumer`],
//! then drives a pump task that hands each received envelope to one of a
//! fixed pool of workers.
//!
//! ## Ordering
//!
//! Keyed envelopes always go to the same worker (chosen by key hash), so
//! envelopes that share a key are handled in arrival order. Unkeyed envelopes
//! are spread round-robin and may be handled in any order.
//!
//! ## Error handling
//!
//! Errors returned by [`TransportConsumer::handle_envelope`] are logged and do
//! not stop the worker. A panic inside the consumer is caught at the worker
//! boundary, logged, and processing continues with the next envelope.
//!
//! ## Lifecycle
//!
//! The loop ends when the transport closes the subscription inbox, or when
//! [`ListenerHandle::abort`] is called.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{
    // ---
    log_debug,
    log_error,
    log_warn,
    Envelope,
    Result,
    RpcError,
    Subscription,
    TransportPtr,
};

/// Envelopes buffered per worker before the pump waits.
const WORKER_QUEUE_DEPTH: usize = 64;

/// A consumer of transport-delivered envelopes.
///
/// Implementations should assume envelopes with different keys may arrive
/// in any order, and that a broker transport may redeliver.
#[async_trait::async_trait]
pub trait TransportConsumer: Send + Sync {
    /// The subscription used to receive incoming envelopes.
    fn subscription(&self) -> Subscription;

    /// Handle a single incoming envelope.
    ///
    /// Returning an error does not terminate the receive loop.
    async fn handle_envelope(&self, env: Envelope) -> Result<()>;
}

/// Running receive loop returned by [`run`].
pub struct ListenerHandle {
    pump: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

impl ListenerHandle {
    /// Number of workers in the pool.
    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    /// Stop the pump and every worker immediately.
    pub fn abort(&self) {
        // ---
        self.pump.abort();
        for worker in &self.workers {
            worker.abort();
        }
    }

    /// True once the pump and all workers have exited.
    pub fn is_finished(&self) -> bool {
        self.pump.is_finished() && self.workers.iter().all(JoinHandle::is_finished)
    }

    /// Wait for the loop to finish, normally after the transport closed.
    pub async fn join(self) {
        // ---
        let _ = self.pump.await;
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

/// Start a receive loop with `workers` workers for `consumer`.
///
/// Once this returns, envelopes published to the consumer's subscription are
/// deliverable.
///
/// # Errors
///
/// - [`RpcError::InvalidConfig`] if `workers` is zero
/// - any error from [`Transport::subscribe`](crate::Transport::subscribe)
pub async fn run<T>(
    transport: TransportPtr,
    consumer: Arc<T>,
    workers: usize,
) -> Result<ListenerHandle>
where
    T: TransportConsumer + 'static,
{
    // ---
    if workers == 0 {
        return Err(RpcError::InvalidConfig(
            "listener needs at least one worker".into(),
        ));
    }

    let sub = consumer.subscription();
    log_debug!(
        "{}: starting {workers} worker(s) for {:?}",
        transport.transport_id(),
        sub.topics
    );

    let mut handle = transport.subscribe(sub).await?;

    let mut queues = Vec::with_capacity(workers);
    let mut worker_tasks = Vec::with_capacity(workers);

    for index in 0..workers {
        let (tx, rx) = mpsc::channel(WORKER_QUEUE_DEPTH);
        queues.push(tx);
        worker_tasks.push(tokio::spawn(worker_loop(index, rx, Arc::clone(&consumer))));
    }

    let pump = tokio::spawn(async move {
        // ---
        let mut next = 0usize;

        while let Some(env) = handle.inbox.recv().await {
            let index = worker_for(env.key.as_deref(), &mut next, queues.len());
            if queues[index].send(env).await.is_err() {
                log_error!("listener worker {index} is gone, stopping pump");
                break;
            }
        }

        log_debug!("transport closed or subscription dropped");
    });

    Ok(ListenerHandle {
        pump,
        workers: worker_tasks,
    })
}

async fn worker_loop<T>(index: usize, mut rx: mpsc::Receiver<Envelope>, consumer: Arc<T>)
where
    T: TransportConsumer + 'static,
{
    // ---
    while let Some(env) = rx.recv().await {
        let topic = env.topic.clone();

        match AssertUnwindSafe(consumer.handle_envelope(env))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                log_warn!("worker {index}: envelope on {topic} failed: {err}");
            }
            Err(_panic) => {
                log_error!("worker {index}: consumer panicked on envelope from {topic}");
            }
        }
    }
}

/// Pick the worker for an envelope: keyed envelopes by key hash, the rest
/// round-robin.
fn worker_for(key: Option<&str>, next: &mut usize, workers: usize) -> usize {
    // ---
    match key {
        Some(key) => {
            let mut hasher = DefaultHasher::new();
            key.hash(&mut hasher);
            (hasher.finish() % workers as u64) as usize
        }
        None => {
            let index = *next % workers;
            *next = next.wrapping_add(1);
            index
        }
    }
}

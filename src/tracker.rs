//! Correlation tracker.
//!
//! Maps outstanding correlation tokens to the callers waiting on them. Each
//! pending exchange moves `WAITING → RESOLVED` when its reply arrives or
//! `WAITING → TIMED_OUT` when its deadline passes, and nothing else.
//!
//! # Exactly-once resolution
//!
//! Every path that finishes an exchange (reply delivery, the caller's own
//! deadline, the background reaper, shutdown) first removes it from the map
//! under the tracker's lock. Only the path that removed the entry may send
//! the outcome; every later path finds nothing and is a no-op. A reply that
//! lands microseconds before the deadline therefore either wins the removal
//! and is delivered, or loses it and is logged as late.
//!
//! # Abandoned callers
//!
//! A caller that drops its [`PendingReply`] leaves its entry behind. The
//! reaper started with [`CorrelationTracker::spawn_reaper`] evicts such
//! entries once their deadline passes, so the map stays bounded by the
//! request rate times the timeout.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::{
    // ---
    log_debug,
    log_warn,
    CorrelationId,
    Envelope,
    Result,
    RpcError,
    Topic,
};

/// Acquire a mutex guard, intentionally ignoring poisoning.
///
/// The map has no invariants spanning entries; the worst outcome of using a
/// map left behind by a panicking thread is a caller that times out.
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // ---
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

type Outcome = Result<Envelope>;

struct PendingExchange {
    reply_topic: Topic,
    created_at: Instant,
    deadline: Instant,
    tx: oneshot::Sender<Outcome>,
}

impl PendingExchange {
    fn timeout_error(&self, id: &CorrelationId) -> RpcError {
        timeout_error(id, &self.reply_topic, self.deadline - self.created_at)
    }
}

fn timeout_error(id: &CorrelationId, reply_topic: &Topic, timeout: Duration) -> RpcError {
    RpcError::ReplyTimeout {
        correlation_id: id.to_string(),
        reply_topic: reply_topic.to_string(),
        timeout,
    }
}

/// Outstanding exchanges of one bridge instance.
#[derive(Default)]
pub struct CorrelationTracker {
    pending: Mutex<HashMap<CorrelationId, PendingExchange>>,
}

impl CorrelationTracker {
    /// Create an empty tracker.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Open a new exchange with a fresh correlation token.
    ///
    /// The exchange waits for a reply on `reply_topic` until `timeout` has
    /// elapsed. Await [`PendingReply::wait`] for the outcome.
    pub fn register(self: &Arc<Self>, reply_topic: Topic, timeout: Duration) -> PendingReply {
        // ---
        let id = CorrelationId::generate();
        let created_at = Instant::now();
        let deadline = created_at + timeout;
        let (tx, rx) = oneshot::channel();

        let exchange = PendingExchange {
            reply_topic: reply_topic.clone(),
            created_at,
            deadline,
            tx,
        };

        lock_ignore_poison(&self.pending).insert(id.clone(), exchange);

        PendingReply {
            id,
            reply_topic,
            timeout,
            deadline,
            rx,
            tracker: Arc::clone(self),
        }
    }

    /// Deliver a received reply to the caller waiting on its token.
    ///
    /// Returns `true` if a waiting exchange was resolved. Replies without a
    /// token, for an unknown token, or for an exchange that already finished
    /// are logged and discarded; this never fails.
    pub fn on_reply(&self, env: Envelope) -> bool {
        // ---
        let Some(id) = env.correlation_id.clone() else {
            log_warn!("reply on {} without correlation id dropped", env.topic);
            return false;
        };

        let exchange = lock_ignore_poison(&self.pending).remove(&id);

        match exchange {
            Some(exchange) => {
                log_debug!(
                    "resolved {id} from {} after {:?}",
                    env.topic,
                    exchange.created_at.elapsed()
                );
                if exchange.tx.send(Ok(env)).is_err() {
                    log_debug!("reply for {id} arrived after the caller went away");
                }
                true
            }
            None => {
                log_debug!("late or duplicate reply for {id} on {} discarded", env.topic);
                false
            }
        }
    }

    /// Time out every exchange whose deadline is at or before `now`.
    ///
    /// Returns the number of exchanges timed out by this call.
    pub fn expire(&self, now: Instant) -> usize {
        // ---
        let expired: Vec<(CorrelationId, PendingExchange)> = {
            let mut pending = lock_ignore_poison(&self.pending);
            let ids: Vec<CorrelationId> = pending
                .iter()
                .filter(|(_, exchange)| exchange.deadline <= now)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove_entry(&id))
                .collect()
        };

        let count = expired.len();
        for (id, exchange) in expired {
            log_debug!("exchange {id} on {} timed out", exchange.reply_topic);
            let err = exchange.timeout_error(&id);
            let _ = exchange.tx.send(Err(err));
        }
        count
    }

    /// Release every waiting caller with [`RpcError::Abandoned`].
    ///
    /// Used on shutdown. Returns the number of exchanges released.
    pub fn abandon_all(&self) -> usize {
        // ---
        let drained: Vec<(CorrelationId, PendingExchange)> =
            lock_ignore_poison(&self.pending).drain().collect();

        let count = drained.len();
        for (id, exchange) in drained {
            let _ = exchange.tx.send(Err(RpcError::Abandoned(id.to_string())));
        }
        count
    }

    /// Number of exchanges still waiting.
    pub fn len(&self) -> usize {
        lock_ignore_poison(&self.pending).len()
    }

    /// True when nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if `id` is still waiting.
    pub fn contains(&self, id: &CorrelationId) -> bool {
        lock_ignore_poison(&self.pending).contains_key(id)
    }

    /// Start the background deadline check.
    ///
    /// The task holds only a weak reference and exits once the tracker is
    /// dropped.
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        // ---
        let weak = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let Some(tracker) = weak.upgrade() else {
                    break;
                };
                let expired = tracker.expire(Instant::now());
                if expired > 0 {
                    log_debug!("reaper timed out {expired} exchange(s)");
                }
            }

            log_debug!("reaper stopped");
        })
    }

    fn evict(&self, id: &CorrelationId) -> Option<PendingExchange> {
        lock_ignore_poison(&self.pending).remove(id)
    }
}

/// The caller's side of a pending exchange.
pub struct PendingReply {
    id: CorrelationId,
    reply_topic: Topic,
    timeout: Duration,
    deadline: Instant,
    rx: oneshot::Receiver<Outcome>,
    tracker: Arc<CorrelationTracker>,
}

impl PendingReply {
    /// Token to attach to the outgoing request.
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.id
    }

    /// Topic the reply is expected on.
    pub fn reply_topic(&self) -> &Topic {
        &self.reply_topic
    }

    /// When the exchange times out.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Suspend until the exchange is resolved or times out.
    ///
    /// # Errors
    ///
    /// - [`RpcError::ReplyTimeout`] when the deadline passes first
    /// - [`RpcError::Abandoned`] when the tracker released the exchange on
    ///   shutdown
    pub async fn wait(mut self) -> Result<Envelope> {
        // ---
        match time::timeout_at(self.deadline, &mut self.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_closed)) => Err(RpcError::Abandoned(self.id.to_string())),
            Err(_elapsed) => match self.tracker.evict(&self.id) {
                Some(exchange) => {
                    log_debug!("exchange {} on {} timed out", self.id, self.reply_topic);
                    Err(exchange.timeout_error(&self.id))
                }
                // Another path removed the entry first; its outcome is
                // already in the channel.
                None => match self.rx.try_recv() {
                    Ok(outcome) => outcome,
                    Err(_) => Err(timeout_error(&self.id, &self.reply_topic, self.timeout)),
                },
            },
        }
    }

    /// Withdraw the exchange without waiting, e.g. after a failed publish.
    pub fn cancel(self) {
        self.tracker.evict(&self.id);
    }
}

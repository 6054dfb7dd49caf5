//! In-memory transport implementation.
//!
//! This module provides a pure in-process implementation of the domain-level
//! `Transport` trait. It is intended for tests, local execution, and as the
//! reference for transport semantics.
//!
//! ## Reference Semantics
//!
//! All other transport implementations are expected to approximate this
//! behavior as closely as their underlying systems allow:
//!
//! - Once `subscribe()` returns, envelopes published *after* that point to
//!   one of the subscribed topics are deliverable.
//! - Every consumer group subscribed to a topic receives each envelope once.
//!   Inside a group, one live member receives it: keyed envelopes always go to
//!   the member chosen by key hash, unkeyed envelopes rotate between members.
//! - Same-key envelopes reach their member in publish order.
//! - Publishing to a topic nobody subscribes to succeeds and the envelope is
//!   discarded, as a broker with auto-created topics would do.
//! - `publish()` never waits for a consumer. A subscription that falls
//!   `INBOX_DEPTH` envelopes behind loses the envelopes that do not fit, and
//!   a warning is logged; other groups and other publishers are unaffected.
//!
//! ## Non-Goals
//!
//! This transport does not emulate persistence, partitions, rebalancing or
//! any broker failure mode.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};

use crate::{
    // ---
    log_debug,
    log_warn,
    Envelope,
    Result,
    RpcError,
    Subscription,
    SubscriptionHandle,
    Topic,
    Transport,
    TransportBase,
    TransportConfig,
    TransportPtr,
};

/// Envelopes buffered per subscription before new ones are dropped.
const INBOX_DEPTH: usize = 1024;

struct Member {
    owner: u64,
    tx: mpsc::Sender<Envelope>,
}

#[derive(Default)]
struct Group {
    members: Vec<Member>,
    next: AtomicUsize,
}

impl Group {
    /// Pick the member that receives `env`, skipping dropped subscriptions.
    fn pick(&self, env: &Envelope) -> Option<mpsc::Sender<Envelope>> {
        // ---
        let live: Vec<&Member> = self.members.iter().filter(|m| !m.tx.is_closed()).collect();
        if live.is_empty() {
            return None;
        }

        let index = match env.key.as_deref() {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % live.len() as u64) as usize
            }
            None => self.next.fetch_add(1, Ordering::Relaxed) % live.len(),
        };

        Some(live[index].tx.clone())
    }
}

/// Shared message bus for the in-memory transport.
///
/// Simulates a broker within a single process. All memory transports that
/// share a `MemoryHub` can publish and receive each other's envelopes, exactly
/// as service instances connected to one broker would.
///
/// # Testing Only
///
/// This type is exposed for integration tests that need isolation between
/// parallel test cases. Production code should use
/// [`TransportBuilder`](crate::TransportBuilder).
///
/// ```
/// # use topic_rpc::{MemoryHub, TransportConfig};
/// # async fn example() -> topic_rpc::Result<()> {
/// let hub = MemoryHub::new();
///
/// let route = topic_rpc::create_memory_transport_with_hub(
///     TransportConfig::new("memory://", "route"),
///     hub.clone(),
/// )
/// .await?;
/// let destination = topic_rpc::create_memory_transport_with_hub(
///     TransportConfig::new("memory://", "destination"),
///     hub.clone(),
/// )
/// .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct MemoryHub {
    // ---
    topics: RwLock<HashMap<Topic, HashMap<Arc<str>, Group>>>,
    next_owner: AtomicU64,
}

impl MemoryHub {
    /// Create a new, empty hub.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn register_owner(&self) -> u64 {
        self.next_owner.fetch_add(1, Ordering::Relaxed)
    }

    async fn publish(&self, transport_id: &str, env: Envelope) -> Result<()> {
        // ---
        let targets: Vec<mpsc::Sender<Envelope>> = {
            let topics = self.topics.read().await;
            match topics.get(&env.topic) {
                Some(groups) => groups.values().filter_map(|g| g.pick(&env)).collect(),
                None => Vec::new(),
            }
        };

        if targets.is_empty() {
            log_debug!("{transport_id}: no subscribers for {}, discarded", env.topic);
            return Ok(());
        }

        log_debug!(
            "{transport_id}: publish to {} ({} group(s))",
            env.topic,
            targets.len()
        );

        for tx in targets {
            match tx.try_send(env.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    log_warn!(
                        "{transport_id}: subscriber of {} is {INBOX_DEPTH} envelopes behind, envelope dropped",
                        env.topic
                    );
                }
                // Subscription handle dropped between picking and sending.
                Err(TrySendError::Closed(_)) => {
                    log_debug!("{transport_id}: subscriber of {} went away", env.topic);
                }
            }
        }

        Ok(())
    }

    async fn subscribe(
        &self,
        transport_id: &str,
        owner: u64,
        group: Arc<str>,
        sub: Subscription,
    ) -> Result<SubscriptionHandle> {
        // ---
        log_debug!("{transport_id}: subscribe to {:?} in group {group}", sub.topics);

        let (tx, rx) = mpsc::channel(INBOX_DEPTH);

        let mut topics = self.topics.write().await;
        for topic in sub.topics {
            let group = topics
                .entry(topic)
                .or_default()
                .entry(Arc::clone(&group))
                .or_default();
            group.members.retain(|m| !m.tx.is_closed());
            group.members.push(Member {
                owner,
                tx: tx.clone(),
            });
        }

        Ok(SubscriptionHandle { inbox: rx })
    }

    async fn release(&self, transport_id: &str, owner: u64) {
        // ---
        log_debug!("{transport_id}: releasing subscriptions");

        let mut topics = self.topics.write().await;
        for groups in topics.values_mut() {
            for group in groups.values_mut() {
                group.members.retain(|m| m.owner != owner);
            }
            groups.retain(|_, group| !group.members.is_empty());
        }
        topics.retain(|_, groups| !groups.is_empty());
    }
}

/// Process-global hub used by [`create_memory_transport`].
static GLOBAL_HUB: OnceLock<Arc<MemoryHub>> = OnceLock::new();

fn global_hub() -> Arc<MemoryHub> {
    GLOBAL_HUB.get_or_init(MemoryHub::new).clone()
}

/// In-memory transport.
///
/// Routes envelopes through a shared [`MemoryHub`].
struct MemoryTransport {
    // ---
    base: TransportBase,
    hub: Arc<MemoryHub>,
    owner: u64,
    closed: AtomicBool,
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    // ---
    fn base(&self) -> &TransportBase {
        &self.base
    }

    async fn publish(&self, env: Envelope) -> Result<()> {
        // ---
        if self.closed.load(Ordering::Acquire) {
            return Err(RpcError::send(env.topic.as_str(), "transport is closed"));
        }
        self.hub.publish(self.transport_id(), env).await
    }

    async fn subscribe(&self, sub: Subscription) -> Result<SubscriptionHandle> {
        // ---
        if self.closed.load(Ordering::Acquire) {
            return Err(RpcError::Transport(format!(
                "{}: cannot subscribe, transport is closed",
                self.transport_id()
            )));
        }

        let group = sub
            .group
            .clone()
            .unwrap_or_else(|| Arc::from(self.group_id()));

        self.hub
            .subscribe(self.transport_id(), self.owner, group, sub)
            .await
    }

    /// Close the transport.
    ///
    /// Removes this transport's subscriptions from the hub, which ends their
    /// inboxes. Other transports on the same hub are unaffected.
    async fn close(&self) -> Result<()> {
        // ---
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.hub.release(self.transport_id(), self.owner).await;
        }
        Ok(())
    }
}

/// Create a new in-memory transport using the process-global hub.
///
/// All transports created with this function share a single message bus.
/// For isolated parallel testing, use [`create_memory_transport_with_hub`].
///
/// # Errors
///
/// Currently infallible; always returns `Ok`.
pub async fn create_memory_transport(config: TransportConfig) -> Result<TransportPtr> {
    // ---
    create_memory_transport_with_hub(config, global_hub()).await
}

/// Create a new in-memory transport using the provided hub.
///
/// # Testing Only
///
/// Lets several transports share an explicitly constructed [`MemoryHub`],
/// isolating test cases that run in parallel.
///
/// # Errors
///
/// Currently infallible; always returns `Ok`.
pub async fn create_memory_transport_with_hub(
    config: TransportConfig,
    hub: Arc<MemoryHub>,
) -> Result<TransportPtr> {
    // ---
    log_debug!("{}: create memory transport", config.node_id);

    let transport = MemoryTransport {
        base: TransportBase::from(&config),
        owner: hub.register_owner(),
        hub,
        closed: AtomicBool::new(false),
    };

    Ok(Arc::new(transport))
}

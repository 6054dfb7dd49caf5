// src/domain/transport.rs

//! Transport domain abstractions.
//!
//! This module defines the domain-level transport interface used by the
//! producer, the reply listener and the dispatcher. It intentionally avoids
//! any reference to concrete brokers or client libraries.
//!
//! The transport layer is responsible only for delivering opaque envelopes
//! to subscribed consumers. Correlation, reply routing and timeouts are
//! handled above it.
//!
//! Concrete implementations live under `src/transport/`.
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::{CorrelationId, Result};

/// Shared base state for all transport implementations.
///
/// Each concrete transport embeds this as a field named `base` and returns it
/// from [`Transport::base`].
#[derive(Debug, Clone)]
pub struct TransportBase {
    /// Unique identifier for this transport instance (the node id).
    pub transport_id: String,
    /// Consumer group used when a subscription does not name one.
    pub group_id: String,
}

impl TransportBase {
    /// Create a new TransportBase.
    pub fn new(transport_id: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            transport_id: transport_id.into(),
            group_id: group_id.into(),
        }
    }
}

impl From<&TransportConfig> for TransportBase {
    fn from(config: &TransportConfig) -> Self {
        // ---
        Self {
            transport_id: config.node_id.clone(),
            group_id: config
                .group_id
                .clone()
                .unwrap_or_else(|| config.node_id.clone()),
        }
    }
}

/// Configuration for creating a transport instance.
///
/// Passed to the transport factory functions (`create_*_transport()`).
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Broker URI, e.g. `"memory://"` or `"kafka://localhost:9092"`.
    pub uri: String,
    /// Node id for this transport instance.
    pub node_id: String,
    /// Default consumer group. Falls back to `node_id`.
    pub group_id: Option<String>,
    /// Optional transport type override (`"memory"`, `"rdkafka"`).
    pub transport_type: Option<String>,
    /// Client properties passed through to the broker client untouched.
    pub properties: Vec<(String, String)>,
}

impl TransportConfig {
    /// Configuration with only a URI and a node id set.
    pub fn new(uri: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            node_id: node_id.into(),
            group_id: None,
            transport_type: None,
            properties: Vec::new(),
        }
    }
}

/// A topic name.
///
/// Topics are immutable, cheap to clone, and safe to share across threads.
/// Matching is exact string equality; no wildcard or hierarchy rules apply.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic(pub Arc<str>);

impl Topic {
    /// Borrow the topic name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Topic {
    fn from(value: &str) -> Self {
        Topic(Arc::from(value))
    }
}

impl From<String> for Topic {
    fn from(value: String) -> Self {
        Topic(Arc::from(value))
    }
}

impl From<&String> for Topic {
    fn from(value: &String) -> Self {
        Topic(Arc::from(value.as_str()))
    }
}

impl From<Arc<str>> for Topic {
    fn from(value: Arc<str>) -> Self {
        Topic(value)
    }
}

impl From<&Topic> for Topic {
    fn from(value: &Topic) -> Self {
        value.clone()
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A request to receive messages from a set of topics.
///
/// Subscriptions that share a `group` split each topic's messages between
/// them, the way members of a Kafka consumer group do. Subscriptions without
/// a group use the transport's default group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subscription {
    pub topics: Vec<Topic>,
    pub group: Option<Arc<str>>,
}

impl Subscription {
    /// Subscribe to `topics` in the transport's default group.
    pub fn new(topics: impl IntoIterator<Item = Topic>) -> Self {
        Self {
            topics: topics.into_iter().collect(),
            group: None,
        }
    }

    /// Put this subscription in an explicit consumer group.
    pub fn in_group(mut self, group: impl Into<Arc<str>>) -> Self {
        self.group = Some(group.into());
        self
    }
}

impl From<Topic> for Subscription {
    fn from(topic: Topic) -> Self {
        Subscription::new([topic])
    }
}

impl From<Vec<Topic>> for Subscription {
    fn from(topics: Vec<Topic>) -> Self {
        Subscription::new(topics)
    }
}

/// The unit of transport between producers and consumers.
///
/// The transport does not interpret the payload. `correlation_id`,
/// `reply_to` and `error` travel as message headers on broker transports, so
/// they never leak into the payload schema.
///
/// # Examples
///
/// ```
/// # use topic_rpc::{CorrelationId, Envelope, Topic};
/// # use bytes::Bytes;
/// let request = Envelope::request(
///     Topic::from("generic.list_req"),
///     Bytes::from_static(b"{}"),
///     CorrelationId::generate(),
///     Topic::from("generic.list_res"),
/// );
/// assert!(request.expects_reply());
///
/// let event = Envelope::new(Topic::from("route.created"), Bytes::from_static(b"{}"))
///     .with_key("route-7");
/// assert!(!event.expects_reply());
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    /// Topic the envelope is published to or was received from.
    pub topic: Topic,

    /// Optional partitioning key. Same-key envelopes keep their relative order.
    pub key: Option<Arc<str>>,

    /// Opaque payload bytes.
    pub payload: Bytes,

    /// Correlation token. Present on requests and replies, absent on
    /// fire-and-forget sends.
    pub correlation_id: Option<CorrelationId>,

    /// Where the responder must publish its reply. Present only on requests
    /// that expect one.
    pub reply_to: Option<Topic>,

    /// Failure text on replies sent under
    /// [`FailurePolicy::ErrorHeader`](crate::FailurePolicy::ErrorHeader).
    pub error: Option<Arc<str>>,
}

impl Envelope {
    // ---
    /// Create a fire-and-forget envelope.
    pub fn new(topic: Topic, payload: Bytes) -> Self {
        Self {
            topic,
            key: None,
            payload,
            correlation_id: None,
            reply_to: None,
            error: None,
        }
    }

    /// Create a request envelope that expects a reply on `reply_to`.
    pub fn request(
        topic: Topic,
        payload: Bytes,
        correlation_id: CorrelationId,
        reply_to: Topic,
    ) -> Self {
        Self {
            correlation_id: Some(correlation_id),
            reply_to: Some(reply_to),
            ..Self::new(topic, payload)
        }
    }

    /// Create a reply envelope.
    ///
    /// `correlation_id` is copied from the request; it may be absent when the
    /// request came from a producer that did not set one.
    pub fn reply(topic: Topic, payload: Bytes, correlation_id: Option<CorrelationId>) -> Self {
        Self {
            correlation_id,
            ..Self::new(topic, payload)
        }
    }

    /// Attach a partitioning key.
    pub fn with_key(mut self, key: impl Into<Arc<str>>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Attach failure text.
    pub fn with_error(mut self, error: impl Into<Arc<str>>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// True if the sender waits for a reply.
    pub fn expects_reply(&self) -> bool {
        self.reply_to.is_some()
    }
}

/// Handle returned from a successful subscription.
///
/// The subscription stays active until the handle is dropped or the
/// transport is closed.
pub struct SubscriptionHandle {
    // ---
    /// Receiver channel for delivered envelopes matching this subscription.
    pub inbox: mpsc::Receiver<Envelope>,
}

/// Transport abstraction.
///
/// A `Transport` delivers envelopes between publishers and subscribers on a
/// best-effort basis. Implementations must ensure that:
/// - once `subscribe()` returns, matching envelopes published afterwards are
///   deliverable;
/// - envelopes with the same key reach a given subscriber in publish order;
/// - `publish()` returns once the broker accepted the envelope, without
///   waiting for any consumer.
///
/// The in-memory transport is the reference implementation.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    // ---
    /// Shared base state. Each transport returns `&self.base`.
    fn base(&self) -> &TransportBase;

    /// The transport id (node id).
    fn transport_id(&self) -> &str {
        &self.base().transport_id
    }

    /// The default consumer group.
    fn group_id(&self) -> &str {
        &self.base().group_id
    }

    /// Publish an envelope to `env.topic`.
    ///
    /// Rejections are reported as [`RpcError::Send`](crate::RpcError::Send).
    async fn publish(&self, env: Envelope) -> Result<()>;

    /// Register a subscription and return a handle for receiving messages.
    async fn subscribe(&self, sub: Subscription) -> Result<SubscriptionHandle>;

    /// Close the transport and release any associated resources.
    async fn close(&self) -> Result<()>;
}

/// Shared transport pointer.
pub type TransportPtr = Arc<dyn Transport>;

//! RPC bridge builder.
//!
//! Provides a fluent builder API for configuring an [`RpcBridge`]: which
//! services it calls, which operations it answers, and its timeout, worker
//! and failure settings.

use std::collections::BTreeSet;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::bridge::BridgeParts;
use crate::dispatcher::{Dispatcher, DispatcherBuilder};
use crate::producer::ReplyRouter;
use crate::tracker::CorrelationTracker;
use crate::{
    // ---
    listener,
    BridgeConfig,
    Direction,
    FailurePolicy,
    Producer,
    Result,
    RpcBridge,
    RpcError,
    Topic,
    TopicRegistry,
    TransportPtr,
    DEFAULT_REAPER_INTERVAL,
    DEFAULT_REPLY_TIMEOUT,
};

/// Builder for creating [`RpcBridge`] instances.
///
/// # Examples
///
/// ```no_run
/// use topic_rpc::{RpcBridgeBuilder, Service, TopicRegistry, TransportBuilder, LIST};
/// use std::time::Duration;
///
/// # async fn example() -> topic_rpc::Result<()> {
/// let transport = TransportBuilder::new()
///     .uri("kafka://localhost:9092")
///     .node_id("route-service-1")
///     .group_id("route-service")
///     .build()
///     .await?;
///
/// let bridge = RpcBridgeBuilder::new(transport, TopicRegistry::standard(Service::Route))
///     .calls(&TopicRegistry::standard(Service::Destination))
///     .reply_timeout(Duration::from_secs(5))
///     .workers(4)
///     .sync_handler(LIST, |_: serde_json::Value| Ok::<_, String>(Vec::<String>::new()))
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct RpcBridgeBuilder {
    // ---
    transport: TransportPtr,
    registry: TopicRegistry,
    reply_topics: BTreeSet<Topic>,
    dispatcher: DispatcherBuilder,

    reply_timeout: Option<Duration>,
    workers: Option<usize>,
    reaper_interval: Option<Duration>,
    failure_policy: Option<FailurePolicy>,

    // First registration error, reported by build()
    error: Option<RpcError>,
}

impl RpcBridgeBuilder {
    /// Create a new bridge builder for the service described by `registry`.
    ///
    /// The service's own reply topics are always listened to, so it can call
    /// its own operations.
    pub fn new(transport: TransportPtr, registry: TopicRegistry) -> Self {
        // ---
        let reply_topics = registry.reply_topics().into_iter().collect();
        Self {
            transport,
            registry,
            reply_topics,
            dispatcher: Dispatcher::builder(),
            reply_timeout: None,
            workers: None,
            reaper_interval: None,
            failure_policy: None,
            error: None,
        }
    }

    /// Apply timeout, worker, reaper and failure settings from `config`.
    pub fn config(self, config: &BridgeConfig) -> Self {
        self.reply_timeout(config.reply_timeout)
            .workers(config.workers)
            .reaper_interval(config.reaper_interval)
            .failure_policy(config.failure_policy)
    }

    /// Listen for replies from the service described by `other`, so its
    /// operations can be called with `send_and_receive`.
    pub fn calls(mut self, other: &TopicRegistry) -> Self {
        self.reply_topics.extend(other.reply_topics());
        self
    }

    /// Listen for replies on one additional topic.
    pub fn reply_topic(mut self, topic: impl Into<Topic>) -> Self {
        self.reply_topics.insert(topic.into());
        self
    }

    /// Set the default reply timeout.
    ///
    /// Default: 5 seconds.
    pub fn reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = Some(timeout);
        self
    }

    /// Set the number of workers of each listener.
    ///
    /// Default: 1.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Set the interval of the background deadline check.
    ///
    /// Default: 1 second.
    pub fn reaper_interval(mut self, interval: Duration) -> Self {
        self.reaper_interval = Some(interval);
        self
    }

    /// Set how failed requests are answered.
    ///
    /// Default: [`FailurePolicy::EmptyReply`].
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = Some(policy);
        self
    }

    /// Answer requests for `operation` with an async handler.
    ///
    /// `operation` must be registered in this service's registry.
    pub fn handler<TReq, TResp, E, F, Fut>(mut self, operation: &str, func: F) -> Self
    where
        TReq: DeserializeOwned + Send + 'static,
        TResp: Serialize + Send + 'static,
        E: Display + Send + 'static,
        F: Fn(TReq) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<TResp, E>> + Send + 'static,
    {
        // ---
        if let Some(topic) = self.request_topic(operation) {
            self.dispatcher = self.dispatcher.handler(topic, func);
        }
        self
    }

    /// Answer requests for `operation` with a synchronous handler.
    pub fn sync_handler<TReq, TResp, E, F>(mut self, operation: &str, func: F) -> Self
    where
        TReq: DeserializeOwned + Send + 'static,
        TResp: Serialize + Send + 'static,
        E: Display + Send + 'static,
        F: Fn(TReq) -> std::result::Result<TResp, E> + Send + Sync + 'static,
    {
        // ---
        if let Some(topic) = self.request_topic(operation) {
            self.dispatcher = self.dispatcher.sync_handler(topic, func);
        }
        self
    }

    /// Request topic of `operation`, recording an error if it is unknown.
    fn request_topic(&mut self, operation: &str) -> Option<Topic> {
        // ---
        match self.registry.topic(operation, Direction::Request) {
            Ok(topic) => Some(topic.clone()),
            Err(err) => {
                self.error.get_or_insert(err);
                None
            }
        }
    }

    /// Build the bridge (consumes self).
    ///
    /// Subscribes the reply listener and, if any handler was registered, the
    /// request listener before returning, then starts the reaper.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - A handler names an operation missing from the registry
    /// - Two handlers share an operation
    /// - Workers, timeout or reaper interval are zero
    /// - Subscribing on the transport fails
    pub async fn build(self) -> Result<RpcBridge> {
        // ---
        if let Some(err) = self.error {
            return Err(err);
        }

        let reply_timeout = self.reply_timeout.unwrap_or(DEFAULT_REPLY_TIMEOUT);
        let workers = self.workers.unwrap_or(1);
        let reaper_interval = self.reaper_interval.unwrap_or(DEFAULT_REAPER_INTERVAL);
        let policy = self.failure_policy.unwrap_or_default();

        if workers == 0 {
            return Err(RpcError::InvalidConfig("workers must be at least 1".into()));
        }
        if reply_timeout.is_zero() || reaper_interval.is_zero() {
            return Err(RpcError::InvalidConfig(
                "reply_timeout and reaper_interval must be greater than zero".into(),
            ));
        }

        let has_handlers = !self.dispatcher.is_empty();
        let dispatcher = self
            .dispatcher
            .failure_policy(policy)
            .build(Arc::clone(&self.transport))?;
        let handled_topics = dispatcher.topics();

        let tracker = CorrelationTracker::new();
        let reply_topics: Vec<Topic> = self.reply_topics.into_iter().collect();

        // Each instance needs every reply, so it joins a group of its own.
        let reply_group = format!("{}.replies", self.transport.transport_id());
        let router = ReplyRouter::new(Arc::clone(&tracker), reply_topics.clone(), reply_group);
        let reply_listener =
            listener::run(Arc::clone(&self.transport), Arc::new(router), workers).await?;

        let request_listener = if has_handlers {
            match listener::run(Arc::clone(&self.transport), Arc::new(dispatcher), workers).await {
                Ok(handle) => Some(handle),
                Err(err) => {
                    reply_listener.abort();
                    return Err(err);
                }
            }
        } else {
            None
        };

        let reaper = tracker.spawn_reaper(reaper_interval);
        let producer = Producer::new(
            Arc::clone(&self.transport),
            Arc::clone(&tracker),
            reply_topics,
            reply_timeout,
        );

        Ok(RpcBridge::new(BridgeParts {
            transport: self.transport,
            registry: self.registry,
            producer,
            tracker,
            policy,
            handled_topics,
            reply_listener,
            request_listener,
            reaper,
        }))
    }
}

//! Producer: one-way sends and request/reply calls.
//!
//! A request/reply call registers an exchange with the
//! [`CorrelationTracker`], publishes the request with the exchange's token
//! and reply topic, and waits for the [`ReplyRouter`] to deliver the
//! matching reply (or for the deadline to pass).

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time;

use crate::listener::TransportConsumer;
use crate::tracker::CorrelationTracker;
use crate::{
    // ---
    log_debug,
    log_error,
    log_warn,
    Direction,
    Envelope,
    JsonCodec,
    Result,
    RpcError,
    Subscription,
    Topic,
    TopicRegistry,
    TransportPtr,
};

/// Sends requests and events on behalf of one service instance.
///
/// Cheap to clone; clones share the transport and the pending exchanges.
#[derive(Clone)]
pub struct Producer {
    inner: Arc<Inner>,
}

struct Inner {
    transport: TransportPtr,
    tracker: Arc<CorrelationTracker>,
    codec: JsonCodec,
    reply_topics: BTreeSet<Topic>,
    reply_timeout: Duration,
}

impl Producer {
    /// Create a producer.
    ///
    /// `reply_topics` must be the topics a running [`ReplyRouter`] for
    /// `tracker` is subscribed to; `send_and_receive` refuses any other reply
    /// topic.
    pub(crate) fn new(
        transport: TransportPtr,
        tracker: Arc<CorrelationTracker>,
        reply_topics: impl IntoIterator<Item = Topic>,
        reply_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                tracker,
                codec: JsonCodec,
                reply_topics: reply_topics.into_iter().collect(),
                reply_timeout,
            }),
        }
    }

    /// Default reply timeout of `send_and_receive`.
    pub fn reply_timeout(&self) -> Duration {
        self.inner.reply_timeout
    }

    /// Reply topics this producer can wait on.
    pub fn reply_topics(&self) -> impl Iterator<Item = &Topic> {
        self.inner.reply_topics.iter()
    }

    /// Number of request/reply exchanges still waiting.
    pub fn pending(&self) -> usize {
        self.inner.tracker.len()
    }

    /// Publish `value` to `topic` without a key and without expecting a
    /// reply.
    ///
    /// # Errors
    ///
    /// - [`RpcError::Codec`] if `value` cannot be encoded
    /// - [`RpcError::Send`] if the broker rejects the message
    pub async fn send<T>(&self, topic: &Topic, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        // ---
        let payload = self.inner.codec.encode(value)?;
        self.inner
            .transport
            .publish(Envelope::new(topic.clone(), payload))
            .await
    }

    /// Publish `value` to `topic` with a partitioning key. Messages that
    /// share a key keep their relative order.
    pub async fn send_keyed<T>(&self, topic: &Topic, key: &str, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        // ---
        let payload = self.inner.codec.encode(value)?;
        let env = Envelope::new(topic.clone(), payload).with_key(key);
        self.inner.transport.publish(env).await
    }

    /// Publish `value` in the background.
    ///
    /// Encoding happens before this returns, so codec errors are reported
    /// directly. The publish outcome is logged; await the returned handle to
    /// observe it as well.
    pub fn send_detached<T>(&self, topic: &Topic, value: &T) -> Result<JoinHandle<Result<()>>>
    where
        T: Serialize + ?Sized,
    {
        // ---
        let payload = self.inner.codec.encode(value)?;
        let env = Envelope::new(topic.clone(), payload);
        let transport = Arc::clone(&self.inner.transport);

        Ok(tokio::spawn(async move {
            let topic = env.topic.clone();
            let result = transport.publish(env).await;
            match &result {
                Ok(()) => log_debug!("detached send to {topic} delivered"),
                Err(err) => log_error!("detached send to {topic} failed: {err}"),
            }
            result
        }))
    }

    /// Send a request and wait for the correlated reply, using the default
    /// reply timeout.
    ///
    /// # Errors
    ///
    /// - [`RpcError::UnsubscribedReplyTopic`] if no reply listener covers
    ///   `reply_topic`
    /// - [`RpcError::Codec`] if the request cannot be encoded or the reply
    ///   does not decode into `TResp`
    /// - [`RpcError::Send`] if the broker rejects the request
    /// - [`RpcError::ReplyTimeout`] if no reply arrives in time
    /// - [`RpcError::EmptyReply`] if the responder answered with an empty
    ///   payload
    /// - [`RpcError::Remote`] if the responder reported a failure
    pub async fn send_and_receive<TReq, TResp>(
        &self,
        request_topic: &Topic,
        reply_topic: &Topic,
        req: &TReq,
    ) -> Result<TResp>
    where
        TReq: Serialize + ?Sized,
        TResp: DeserializeOwned,
    {
        self.send_and_receive_with_timeout(request_topic, reply_topic, req, self.inner.reply_timeout)
            .await
    }

    /// Like [`send_and_receive`](Self::send_and_receive) with a per-call
    /// timeout.
    pub async fn send_and_receive_with_timeout<TReq, TResp>(
        &self,
        request_topic: &Topic,
        reply_topic: &Topic,
        req: &TReq,
        timeout: Duration,
    ) -> Result<TResp>
    where
        TReq: Serialize + ?Sized,
        TResp: DeserializeOwned,
    {
        // ---
        if !self.inner.reply_topics.contains(reply_topic) {
            return Err(RpcError::UnsubscribedReplyTopic(reply_topic.to_string()));
        }
        if timeout.is_zero() {
            return Err(RpcError::InvalidConfig(
                "reply timeout must be greater than zero".into(),
            ));
        }

        let payload = self.inner.codec.encode(req)?;

        // Register before publishing so a fast reply always finds its
        // exchange.
        let pending = self.inner.tracker.register(reply_topic.clone(), timeout);
        let env = Envelope::request(
            request_topic.clone(),
            payload,
            pending.correlation_id().clone(),
            reply_topic.clone(),
        );

        log_debug!(
            "request {} to {request_topic}, reply on {reply_topic}",
            pending.correlation_id()
        );

        // The publish shares the exchange deadline; a stalled broker ends in
        // ReplyTimeout like a missing reply does.
        match time::timeout_at(pending.deadline(), self.inner.transport.publish(env)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                pending.cancel();
                return Err(err);
            }
            Err(_elapsed) => log_warn!(
                "request {} to {request_topic} not accepted by the transport before its deadline",
                pending.correlation_id()
            ),
        }

        let reply = pending.wait().await?;
        self.interpret(reply)
    }

    /// Call `operation` of the service described by `registry`.
    ///
    /// # Errors
    ///
    /// [`RpcError::UnknownOperation`] if `registry` has no such operation,
    /// otherwise as [`send_and_receive`](Self::send_and_receive).
    pub async fn call<TReq, TResp>(
        &self,
        registry: &TopicRegistry,
        operation: &str,
        req: &TReq,
    ) -> Result<TResp>
    where
        TReq: Serialize + ?Sized,
        TResp: DeserializeOwned,
    {
        // ---
        let request_topic = registry.topic(operation, Direction::Request)?;
        let reply_topic = registry.topic(operation, Direction::Reply)?;
        self.send_and_receive(request_topic, reply_topic, req).await
    }

    /// Turn a correlated reply into the caller's result.
    fn interpret<T>(&self, reply: Envelope) -> Result<T>
    where
        T: DeserializeOwned,
    {
        // ---
        if let Some(error) = reply.error {
            return Err(RpcError::Remote(error.to_string()));
        }
        if reply.payload.is_empty() {
            return Err(RpcError::EmptyReply(reply.topic.to_string()));
        }
        self.inner.codec.decode(&reply.payload)
    }
}

/// Feeds replies from the reply topics into the tracker.
pub(crate) struct ReplyRouter {
    tracker: Arc<CorrelationTracker>,
    topics: Vec<Topic>,
    group: Arc<str>,
}

impl ReplyRouter {
    /// `group` must be unique to this instance so every reply reaches it.
    pub(crate) fn new(
        tracker: Arc<CorrelationTracker>,
        topics: Vec<Topic>,
        group: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            tracker,
            topics,
            group: group.into(),
        }
    }
}

#[async_trait::async_trait]
impl TransportConsumer for ReplyRouter {
    // ---
    fn subscription(&self) -> Subscription {
        Subscription::new(self.topics.iter().cloned()).in_group(Arc::clone(&self.group))
    }

    async fn handle_envelope(&self, env: Envelope) -> Result<()> {
        self.tracker.on_reply(env);
        Ok(())
    }
}

//! Request dispatcher.
//!
//! Routes each received request to the handler registered for its topic and
//! publishes the handler's result to the request's reply topic, copying the
//! correlation token so the caller can match it.
//!
//! Every failure between receiving the request and producing the reply
//! payload is caught here. The dispatcher answers according to its
//! [`FailurePolicy`] and keeps consuming; nothing propagates into the
//! listener.

mod handler;

use std::any::Any;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::listener::TransportConsumer;
use crate::{
    // ---
    log_debug,
    log_error,
    log_warn,
    Envelope,
    FailurePolicy,
    HandlerError,
    JsonCodec,
    Result,
    RpcError,
    Subscription,
    Topic,
    TransportPtr,
};

use handler::{HandlerFn, SyncHandler, TypedHandler};

/// Handlers keyed by request topic, plus the transport replies go out on.
pub struct Dispatcher {
    transport: TransportPtr,
    handlers: HashMap<Topic, Arc<dyn HandlerFn>>,
    policy: FailurePolicy,
}

impl Dispatcher {
    /// Start registering handlers.
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    /// Request topics that have a handler, sorted.
    pub fn topics(&self) -> Vec<Topic> {
        let mut topics: Vec<Topic> = self.handlers.keys().cloned().collect();
        topics.sort();
        topics
    }

    /// The configured failure policy.
    pub fn failure_policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Run the handler for `env` and build the reply, if one is due.
    ///
    /// Returns `Ok(None)` when a one-way request was handled. A request
    /// without a correlation token still gets a reply, without the token.
    ///
    /// # Errors
    ///
    /// [`RpcError::Handler`] when no handler is registered for the topic, or
    /// when a one-way request fails. Failures of requests that name a reply
    /// topic are answered according to the failure policy instead.
    pub async fn dispatch(&self, env: Envelope) -> Result<Option<Envelope>> {
        // ---
        let Some(handler) = self.handlers.get(&env.topic).cloned() else {
            return Err(HandlerError::NoHandler(env.topic.to_string()).into());
        };

        let outcome = match AssertUnwindSafe(handler.call(env.payload.clone()))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => Err(HandlerError::Panicked(panic_message(panic.as_ref()))),
        };

        let Some(reply_to) = env.reply_to else {
            outcome?;
            log_debug!("handled one-way request on {}", env.topic);
            return Ok(None);
        };

        if env.correlation_id.is_none() {
            log_warn!(
                "request on {} names reply topic {reply_to} but carries no correlation id",
                env.topic
            );
        }

        let reply = match outcome {
            Ok(payload) => Envelope::reply(reply_to, payload, env.correlation_id),
            Err(err) => {
                log_error!("request on {} failed: {err}", env.topic);
                let reply = Envelope::reply(reply_to, Bytes::new(), env.correlation_id);
                match self.policy {
                    FailurePolicy::EmptyReply => reply,
                    FailurePolicy::ErrorHeader => reply.with_error(err.to_string()),
                }
            }
        };

        Ok(Some(reply))
    }
}

#[async_trait::async_trait]
impl TransportConsumer for Dispatcher {
    // ---
    fn subscription(&self) -> Subscription {
        Subscription::new(self.topics())
    }

    async fn handle_envelope(&self, env: Envelope) -> Result<()> {
        // ---
        match self.dispatch(env).await? {
            Some(reply) => self.transport.publish(reply).await,
            None => Ok(()),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    // ---
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Builder for [`Dispatcher`].
#[derive(Default)]
pub struct DispatcherBuilder {
    handlers: Vec<(Topic, Arc<dyn HandlerFn>)>,
    policy: FailurePolicy,
    codec: JsonCodec,
}

impl DispatcherBuilder {
    /// Register an async handler for requests on `topic`.
    pub fn handler<TReq, TResp, E, F, Fut>(mut self, topic: impl Into<Topic>, func: F) -> Self
    where
        TReq: DeserializeOwned + Send + 'static,
        TResp: Serialize + Send + 'static,
        E: Display + Send + 'static,
        F: Fn(TReq) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<TResp, E>> + Send + 'static,
    {
        // ---
        let handler = TypedHandler::new(func, self.codec);
        self.handlers.push((topic.into(), Arc::new(handler)));
        self
    }

    /// Register a synchronous handler for requests on `topic`.
    pub fn sync_handler<TReq, TResp, E, F>(mut self, topic: impl Into<Topic>, func: F) -> Self
    where
        TReq: DeserializeOwned + Send + 'static,
        TResp: Serialize + Send + 'static,
        E: Display + Send + 'static,
        F: Fn(TReq) -> std::result::Result<TResp, E> + Send + Sync + 'static,
    {
        // ---
        let handler = SyncHandler::new(func, self.codec);
        self.handlers.push((topic.into(), Arc::new(handler)));
        self
    }

    /// Set the failure policy. Default: [`FailurePolicy::EmptyReply`].
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// True when no handler has been registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Freeze the handler table.
    ///
    /// # Errors
    ///
    /// [`RpcError::DuplicateHandler`] if two handlers were registered for the
    /// same topic.
    pub fn build(self, transport: TransportPtr) -> Result<Dispatcher> {
        // ---
        let mut handlers = HashMap::with_capacity(self.handlers.len());
        for (topic, handler) in self.handlers {
            if handlers.contains_key(&topic) {
                return Err(RpcError::DuplicateHandler(topic.to_string()));
            }
            handlers.insert(topic, handler);
        }

        Ok(Dispatcher {
            transport,
            handlers,
            policy: self.policy,
        })
    }
}

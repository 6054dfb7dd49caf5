use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the bridge.
///
/// Outbound operations (`send*`) return these to the caller synchronously.
/// The inbound path (reply listener, dispatcher workers) only logs them and
/// keeps consuming.
#[derive(Error, Debug)]
pub enum RpcError {
    /// The transport rejected a publish. Not retried by the bridge.
    #[error("send to {topic} failed: {reason}")]
    Send { topic: String, reason: String },

    /// No correlated reply arrived before the deadline. The pending exchange
    /// has been evicted.
    #[error("no reply on {reply_topic} within {timeout:?} (correlation_id: {correlation_id})")]
    ReplyTimeout {
        correlation_id: String,
        reply_topic: String,
        timeout: Duration,
    },

    /// Payload bytes did not match the expected shape, or a value could not
    /// be serialized.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Returned by [`Dispatcher::dispatch`](crate::Dispatcher::dispatch) for
    /// a one-way request that failed or a topic with no handler. Requests
    /// that name a reply topic are answered instead.
    #[error("handler error: {0}")]
    Handler(#[from] HandlerError),

    /// The responder answered with a zero-length payload, which is how the
    /// responder signals a failed request under the default failure policy.
    #[error("empty reply on {0}")]
    EmptyReply(String),

    /// The responder reported a failure through the error header.
    #[error("remote handler failed: {0}")]
    Remote(String),

    /// The reply listener does not subscribe to the requested reply topic, so
    /// a reply could never be observed.
    #[error("reply topic {0} is not subscribed by this producer")]
    UnsubscribedReplyTopic(String),

    /// Topic lookup for an operation the registry does not know.
    #[error("unknown operation {operation} for service {service}")]
    UnknownOperation { service: String, operation: String },

    /// A request topic already has a handler.
    #[error("handler already registered for topic {0}")]
    DuplicateHandler(String),

    /// Transport level failure other than a rejected publish.
    #[error("transport error: {0}")]
    Transport(String),

    /// Required configuration is missing.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    /// Mutually exclusive configuration options were combined.
    #[error("configuration conflict: {0}")]
    ConfigConflict(String),

    /// A configuration value could not be used.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The correlation tracker went away before the exchange was resolved.
    #[error("pending exchange {0} abandoned before resolution")]
    Abandoned(String),
}

impl RpcError {
    /// Build a [`RpcError::Send`] for `topic`.
    pub fn send(topic: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        // ---
        RpcError::Send {
            topic: topic.into(),
            reason: reason.to_string(),
        }
    }

    /// True for errors produced by the transport rejecting a publish.
    pub fn is_send(&self) -> bool {
        matches!(self, RpcError::Send { .. })
    }

    /// True for reply timeouts.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcError::ReplyTimeout { .. })
    }
}

/// Failures caught at the dispatch boundary.
///
/// The dispatcher never lets these escape a worker. When the request names a
/// reply topic, the configured [`FailurePolicy`](crate::FailurePolicy) turns
/// them into an empty reply, with or without the error text. Otherwise they
/// surface as [`RpcError::Handler`] and the listener logs them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// The request payload did not decode into the handler's request type.
    #[error("malformed request: {0}")]
    Decode(String),

    /// The handler returned an error.
    #[error("{0}")]
    Failed(String),

    /// The handler's result could not be encoded.
    #[error("failed to encode reply: {0}")]
    Encode(String),

    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),

    /// Nothing is registered for the topic the request arrived on.
    #[error("no handler registered for topic {0}")]
    NoHandler(String),
}

impl HandlerError {
    /// Convenience constructor for handler code.
    pub fn failed(reason: impl std::fmt::Display) -> Self {
        HandlerError::Failed(reason.to_string())
    }
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, RpcError>;

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_send_helper() {
        // ---
        let err = RpcError::send("generic.list_req", "broker down");
        assert!(err.is_send());
        assert!(!err.is_timeout());
        assert_eq!(err.to_string(), "send to generic.list_req failed: broker down");
    }

    #[test]
    fn test_handler_error_wraps() {
        // ---
        let err: RpcError = HandlerError::failed("boom").into();
        assert!(matches!(err, RpcError::Handler(HandlerError::Failed(ref m)) if m == "boom"));
        assert_eq!(err.to_string(), "handler error: boom");
    }

    #[test]
    fn test_timeout_message_names_topic() {
        // ---
        let err = RpcError::ReplyTimeout {
            correlation_id: "abc".into(),
            reply_topic: "route.list_res".into(),
            timeout: Duration::from_millis(250),
        };
        assert!(err.is_timeout());
        assert!(err.to_string().contains("route.list_res"));
        assert!(err.to_string().contains("abc"));
    }
}

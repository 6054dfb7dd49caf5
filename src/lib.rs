//! Request/reply semantics over publish-subscribe topics.
//!
//! Services talk to each other through `<service>.<operation>_req` and
//! `<service>.<operation>_res` topic pairs. This library correlates each
//! request with its reply, routes replies to the waiting caller, enforces
//! reply timeouts, and dispatches incoming requests to typed handlers.
//!

// Import all sub modules once...
mod macros;

mod bridge;
mod bridge_builder;
mod codec;
mod config;
mod correlation;
mod dispatcher;
mod domain;
mod error;
mod listener;
mod producer;
mod topic;
mod tracker;
mod transport;
mod transport_builder;

pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

// Re-export main types
pub use bridge::{BridgeStatus, RpcBridge};
pub use bridge_builder::RpcBridgeBuilder;
pub use producer::Producer;

pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use listener::{run as run_consumer, ListenerHandle, TransportConsumer};
pub use tracker::{CorrelationTracker, PendingReply};

pub use codec::JsonCodec;
pub use config::{BridgeConfig, FailurePolicy, DEFAULT_REAPER_INTERVAL, DEFAULT_REPLY_TIMEOUT};
pub use topic::{
    //
    topic_for,
    Direction,
    OperationTopics,
    Service,
    TopicRegistry,
    TopicRegistryBuilder,
    LIST,
    TEST_REQUEST_REPLY,
};

pub use correlation::CorrelationId;
pub use error::{HandlerError, Result, RpcError};

pub use transport::{
    //
    create_memory_transport,
    create_memory_transport_with_hub,
    create_rdkafka_transport,
    MemoryHub,
};
pub use transport_builder::TransportBuilder;

// --- public re-exports
pub use domain::{
    //
    decode_headers,
    encode_headers,
    Envelope,
    EnvelopeHeaders,
    Subscription,
    SubscriptionHandle,
    Topic,
    Transport,
    TransportBase,
    TransportConfig,
    TransportPtr,
    CORRELATION_ID_HEADER,
    ERROR_HEADER,
    REPLY_TOPIC_HEADER,
};

/// Create the transport described by `config`.
///
/// # Errors
///
/// See [`TransportBuilder::build`].
pub async fn create_transport(config: &BridgeConfig) -> Result<TransportPtr> {
    // ---
    config.validate()?;
    TransportBuilder::from_config(config).build().await
}

//! Domain layer public interface.
//!
//! Domain-level abstractions that are independent of concrete brokers.
//! Consumers import symbols via this module, not from individual files.

mod headers;
mod transport;

// --- Transport domain re-exports ---

pub use transport::{
    //
    Envelope,
    Subscription,
    SubscriptionHandle,
    Topic,
    Transport,
    TransportBase,
    TransportConfig,
    TransportPtr,
};

pub use headers::{
    //
    decode_headers,
    encode_headers,
    EnvelopeHeaders,
    CORRELATION_ID_HEADER,
    ERROR_HEADER,
    REPLY_TOPIC_HEADER,
};

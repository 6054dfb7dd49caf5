//! Kafka transports.
//!
//! Currently supports:
//! - rdkafka - librdkafka via the `rdkafka` crate (rdkafka.rs)

#[cfg(feature = "transport_rdkafka")]
#[allow(clippy::module_inception)]
mod rdkafka;

#[cfg(feature = "transport_rdkafka")]
pub use self::rdkafka::create_transport as create_rdkafka_transport;

#[cfg(not(feature = "transport_rdkafka"))]
pub async fn create_rdkafka_transport(
    _config: crate::TransportConfig,
) -> crate::Result<crate::TransportPtr> {
    Err(crate::RpcError::Transport(
        "transport_rdkafka feature is not enabled".into(),
    ))
}

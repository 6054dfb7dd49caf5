//! Transport builder for creating transport instances.
//!
//! Provides a fluent builder API for constructing transports with clear separation
//! between required and optional configuration.

use crate::{BridgeConfig, Result, RpcError, TransportConfig, TransportPtr};

/// Builder for creating transport instances.
///
/// The transport is picked from the explicit [`transport_type`] when set,
/// otherwise from the URI scheme: `memory://` selects the in-memory
/// transport, `kafka://` the Kafka transport.
///
/// [`transport_type`]: TransportBuilder::transport_type
///
/// # Examples
///
/// ```no_run
/// use topic_rpc::TransportBuilder;
///
/// # async fn example() -> topic_rpc::Result<()> {
/// let transport = TransportBuilder::new()
///     .uri("kafka://localhost:9092")
///     .node_id("route-service-1")
///     .group_id("route-service")
///     .property("security.protocol", "SSL")
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct TransportBuilder {
    uri: Option<String>,
    node_id: Option<String>,
    group_id: Option<String>,
    transport_type: Option<String>,
    properties: Vec<(String, String)>,
}

impl TransportBuilder {
    /// Create a new transport builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pre-filled from a bridge configuration.
    pub fn from_config(config: &BridgeConfig) -> Self {
        // ---
        let builder = Self::new()
            .uri(&config.broker_uri)
            .node_id(&config.node_id);
        let builder = match &config.group_id {
            Some(group) => builder.group_id(group),
            None => builder,
        };
        config
            .properties
            .iter()
            .fold(builder, |b, (key, value)| b.property(key, value))
    }

    /// Set the transport URI (required).
    ///
    /// Examples:
    /// - `"memory://"`
    /// - `"kafka://localhost:9092"`
    /// - `"kafka://broker-1:9092,broker-2:9092"`
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Set the node ID (required).
    pub fn node_id(mut self, id: impl Into<String>) -> Self {
        self.node_id = Some(id.into());
        self
    }

    /// Set the default consumer group. Falls back to the node ID.
    pub fn group_id(mut self, group: impl Into<String>) -> Self {
        self.group_id = Some(group.into());
        self
    }

    /// Set explicit transport type.
    ///
    /// Valid values: `"memory"`, `"rdkafka"`
    pub fn transport_type(mut self, flag: impl Into<String>) -> Self {
        self.transport_type = Some(flag.into());
        self
    }

    /// Add a broker client property.
    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push((key.into(), value.into()));
        self
    }

    /// Build the transport (consumes self).
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Required fields missing (`uri`, `node_id`)
    /// - `transport_type` disagrees with the URI scheme
    /// - The URI scheme or transport type is unknown
    /// - The selected transport is not compiled in, or its creation fails
    pub async fn build(self) -> Result<TransportPtr> {
        // ---
        let uri = self
            .uri
            .ok_or_else(|| RpcError::MissingConfig("uri".into()))?;
        let node_id = self
            .node_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| RpcError::MissingConfig("node_id".into()))?;

        let scheme_type = match uri.split_once("://").map(|(scheme, _)| scheme) {
            Some("memory") => Some("memory"),
            Some("kafka") => Some("rdkafka"),
            Some(other) => {
                return Err(RpcError::InvalidConfig(format!(
                    "unsupported URI scheme {other}://, valid schemes: memory://, kafka://"
                )))
            }
            None => None,
        };

        let selected = match (self.transport_type.as_deref(), scheme_type) {
            (Some(explicit), Some(implied)) if explicit != implied => {
                return Err(RpcError::ConfigConflict(format!(
                    "transport_type {explicit} does not match URI {uri}"
                )))
            }
            (Some(explicit), _) => explicit.to_string(),
            (None, Some(implied)) => implied.to_string(),
            (None, None) => {
                return Err(RpcError::InvalidConfig(format!(
                    "cannot pick a transport for URI {uri:?}, use memory:// or kafka://"
                )))
            }
        };

        let config = TransportConfig {
            uri,
            node_id,
            group_id: self.group_id,
            transport_type: Some(selected.clone()),
            properties: self.properties,
        };

        match selected.as_str() {
            "memory" => crate::create_memory_transport(config).await,
            "rdkafka" => crate::create_rdkafka_transport(config).await,
            other => Err(RpcError::Transport(format!(
                "unrecognized transport_type: {other}, valid values: memory, rdkafka"
            ))),
        }
    }
}

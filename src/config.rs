//! Public, broker-agnostic bridge configuration.
//!
//! This type intentionally contains no broker client options beyond an
//! opaque property list. Transport factories interpret those properties.

use std::str::FromStr;
use std::time::Duration;

use crate::{Result, RpcError};

/// Default time a caller waits for a correlated reply.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default interval of the background deadline check.
pub const DEFAULT_REAPER_INTERVAL: Duration = Duration::from_secs(1);

/// How the dispatcher answers a request whose handling failed.
///
/// Failures here are anything caught at the dispatch boundary: a payload
/// that did not decode, a handler error or panic, or a result that did not
/// encode. Requests without a reply topic get no answer under either policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Reply with a zero-length payload. Existing services treat this as
    /// "no result", so callers cannot tell a failure from an empty answer.
    #[default]
    EmptyReply,

    /// Reply with a zero-length payload and the failure text in the error
    /// header. Callers receive [`RpcError::Remote`].
    ErrorHeader,
}

impl FromStr for FailurePolicy {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self> {
        // ---
        match s.trim().to_ascii_lowercase().as_str() {
            "empty" | "empty_reply" => Ok(FailurePolicy::EmptyReply),
            "error" | "error_header" => Ok(FailurePolicy::ErrorHeader),
            other => Err(RpcError::InvalidConfig(format!(
                "unknown failure policy {other:?}, valid values: empty_reply, error_header"
            ))),
        }
    }
}

/// Bridge and transport configuration for one service instance.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    // ---
    /// Broker URI: `memory://` or `kafka://host:port[,host:port]`.
    pub broker_uri: String,

    /// Unique identifier of this service instance, used for logging and as
    /// the transport id.
    pub node_id: String,

    /// Consumer group for request topics. Defaults to `node_id`.
    pub group_id: Option<String>,

    /// How long `send_and_receive` waits for a reply.
    ///
    /// Default: 5 seconds
    pub reply_timeout: Duration,

    /// Number of listener workers per subscription.
    ///
    /// Default: 1
    pub workers: usize,

    /// Interval of the background check that times out stale exchanges.
    ///
    /// Default: 1 second
    pub reaper_interval: Duration,

    /// Answer to failed requests. Default: [`FailurePolicy::EmptyReply`].
    pub failure_policy: FailurePolicy,

    /// Client properties passed to the broker client untouched.
    pub properties: Vec<(String, String)>,
}

impl BridgeConfig {
    /// Configuration for an in-memory transport.
    pub fn memory(node_id: impl Into<String>) -> Self {
        Self::with_broker("memory://", node_id)
    }

    /// Configuration for the given broker URI.
    pub fn with_broker(broker_uri: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            broker_uri: broker_uri.into(),
            node_id: node_id.into(),
            group_id: None,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            workers: 1,
            reaper_interval: DEFAULT_REAPER_INTERVAL,
            failure_policy: FailurePolicy::default(),
            properties: Vec::new(),
        }
    }

    /// Read the configuration from the process environment.
    ///
    /// | variable               | default                |
    /// |------------------------|------------------------|
    /// | `BROKER_URI`           | `memory://`            |
    /// | `NODE_ID`              | `default_node_id`      |
    /// | `GROUP_ID`             | `NODE_ID`              |
    /// | `REPLY_TIMEOUT_MS`     | `5000`                 |
    /// | `LISTENER_WORKERS`     | `1`                    |
    /// | `REAPER_INTERVAL_MS`   | `1000`                 |
    /// | `REPLY_FAILURE_POLICY` | `empty_reply`          |
    ///
    /// # Errors
    ///
    /// [`RpcError::InvalidConfig`] when a variable is set but cannot be parsed.
    pub fn from_env(default_node_id: &str) -> Result<Self> {
        Self::from_lookup(default_node_id, |key| std::env::var(key).ok())
    }

    fn from_lookup<F>(default_node_id: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        // ---
        let broker_uri = lookup("BROKER_URI").unwrap_or_else(|| "memory://".to_string());
        let node_id = lookup("NODE_ID").unwrap_or_else(|| default_node_id.to_string());

        let mut config = Self::with_broker(broker_uri, node_id);
        config.group_id = lookup("GROUP_ID");

        if let Some(ms) = lookup("REPLY_TIMEOUT_MS") {
            config.reply_timeout = Duration::from_millis(parse_var("REPLY_TIMEOUT_MS", &ms)?);
        }
        if let Some(n) = lookup("LISTENER_WORKERS") {
            config.workers = parse_var("LISTENER_WORKERS", &n)?;
        }
        if let Some(ms) = lookup("REAPER_INTERVAL_MS") {
            config.reaper_interval =
                Duration::from_millis(parse_var("REAPER_INTERVAL_MS", &ms)?);
        }
        if let Some(policy) = lookup("REPLY_FAILURE_POLICY") {
            config.failure_policy = policy.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the consumer group for request topics.
    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Set the reply timeout.
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Set the number of listener workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the deadline check interval.
    pub fn with_reaper_interval(mut self, interval: Duration) -> Self {
        self.reaper_interval = interval;
        self
    }

    /// Set the failure policy.
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Add a broker client property, e.g. `("security.protocol", "SSL")`.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push((key.into(), value.into()));
        self
    }

    /// Reject values the bridge cannot run with.
    pub fn validate(&self) -> Result<()> {
        // ---
        if self.node_id.is_empty() {
            return Err(RpcError::MissingConfig("node_id".into()));
        }
        if self.workers == 0 {
            return Err(RpcError::InvalidConfig("workers must be at least 1".into()));
        }
        if self.reply_timeout.is_zero() {
            return Err(RpcError::InvalidConfig(
                "reply_timeout must be greater than zero".into(),
            ));
        }
        if self.reaper_interval.is_zero() {
            return Err(RpcError::InvalidConfig(
                "reaper_interval must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| RpcError::InvalidConfig(format!("{name}={value:?} is not a valid number")))
}

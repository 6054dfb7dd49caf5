//! Kafka transport implementation using `rdkafka`.
//!
//! ## Concurrency model
//!
//! - One shared `FutureProducer` serves every `publish()`. librdkafka batches
//!   and delivers in its own threads; `publish()` resolves once the broker
//!   acknowledged the record.
//! - Every `subscribe()` creates its own `StreamConsumer` in the
//!   subscription's consumer group and a receive task that owns it. The task
//!   converts each record into an [`Envelope`] and forwards it to the
//!   subscription inbox.
//!
//! ## Wire format
//!
//! The payload travels as the record value and the key as the record key.
//! Correlation token, reply topic and failure text travel as headers using
//! the Spring Kafka names (see [`encode_headers`]).
//!
//! ## Deviations from the reference semantics
//!
//! Partition assignment happens asynchronously after `subscribe()` returns.
//! With the default `auto.offset.reset=latest`, records published before
//! the group is assigned are not delivered to it. Set
//! `auto.offset.reset=earliest` through the transport properties when that
//! matters.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

use crate::domain::{decode_headers, encode_headers};
use crate::{
    // ---
    log_debug,
    log_error,
    log_info,
    log_warn,
    Envelope,
    Result,
    RpcError,
    Subscription,
    SubscriptionHandle,
    Topic,
    Transport,
    TransportBase,
    TransportConfig,
    TransportPtr,
};

/// How long `publish()` may wait for room in the producer queue.
const QUEUE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long `close()` waits for buffered records to be delivered.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Envelopes buffered per subscription before the receive task waits.
const INBOX_DEPTH: usize = 256;

type TaskList = Arc<RwLock<Vec<JoinHandle<()>>>>;

/// Kafka implementation of the `Transport` trait.
pub struct KafkaTransport {
    // ---
    base: TransportBase,
    bootstrap_servers: String,
    properties: Vec<(String, String)>,
    producer: FutureProducer,
    tasks: TaskList,
}

impl KafkaTransport {
    /// Client configuration shared by producer and consumers.
    fn client_config(&self) -> ClientConfig {
        client_config(&self.bootstrap_servers, &self.base.transport_id, &self.properties)
    }
}

fn client_config(
    bootstrap_servers: &str,
    client_id: &str,
    properties: &[(String, String)],
) -> ClientConfig {
    // ---
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", bootstrap_servers)
        .set("client.id", client_id);

    for (key, value) in properties {
        config.set(key, value);
    }
    config
}

/// Convert a received record into an envelope.
fn to_envelope(message: &BorrowedMessage<'_>) -> Envelope {
    // ---
    let headers = message
        .headers()
        .map(|headers| {
            decode_headers(
                headers
                    .iter()
                    .map(|header| (header.key, header.value)),
            )
        })
        .unwrap_or_default();

    let payload = message
        .payload()
        .map(Bytes::copy_from_slice)
        .unwrap_or_default();

    let mut env = Envelope::new(Topic::from(message.topic()), payload);
    env.key = message
        .key()
        .map(|key| Arc::from(String::from_utf8_lossy(key).as_ref()));
    env.correlation_id = headers.correlation_id;
    env.reply_to = headers.reply_to;
    env.error = headers.error.map(Arc::from);
    env
}

async fn receive_loop(
    transport_id: String,
    consumer: StreamConsumer,
    tx: mpsc::Sender<Envelope>,
) {
    // ---
    loop {
        match consumer.recv().await {
            Ok(message) => {
                let env = to_envelope(&message);
                if tx.send(env).await.is_err() {
                    log_debug!("{transport_id}: subscription dropped, stopping consumer");
                    break;
                }
            }
            Err(err) => {
                // librdkafka reconnects on its own; keep polling.
                log_warn!("{transport_id}: kafka receive error: {err}");
            }
        }
    }
}

#[async_trait::async_trait]
impl Transport for KafkaTransport {
    // ---
    fn base(&self) -> &TransportBase {
        &self.base
    }

    async fn publish(&self, env: Envelope) -> Result<()> {
        // ---
        let headers = encode_headers(&env)
            .iter()
            .fold(OwnedHeaders::new(), |headers, (name, value)| {
                headers.insert(Header {
                    key: *name,
                    value: Some(value.as_slice()),
                })
            });

        let mut record = FutureRecord::<str, [u8]>::to(env.topic.as_str())
            .payload(&env.payload[..])
            .headers(headers);
        if let Some(key) = env.key.as_deref() {
            record = record.key(key);
        }

        match self.producer.send(record, QUEUE_TIMEOUT).await {
            Ok((partition, offset)) => {
                log_debug!(
                    "{}: published to {} [{partition}] @ {offset}",
                    self.transport_id(),
                    env.topic
                );
                Ok(())
            }
            Err((err, _message)) => {
                log_error!(
                    "{}: publish to {} failed: {err}",
                    self.transport_id(),
                    env.topic
                );
                Err(RpcError::send(env.topic.as_str(), err))
            }
        }
    }

    async fn subscribe(&self, sub: Subscription) -> Result<SubscriptionHandle> {
        // ---
        let group = sub
            .group
            .as_deref()
            .unwrap_or(self.group_id())
            .to_string();

        let mut config = self.client_config();
        config.set("group.id", &group);
        if !self
            .properties
            .iter()
            .any(|(key, _)| key == "auto.offset.reset")
        {
            config.set("auto.offset.reset", "latest");
        }

        let consumer: StreamConsumer = config.create().map_err(|err| {
            let msg = format!("{}: failed to create consumer: {err}", self.transport_id());
            log_error!("{msg}");
            RpcError::Transport(msg)
        })?;

        let topics: Vec<&str> = sub.topics.iter().map(Topic::as_str).collect();
        consumer.subscribe(&topics).map_err(|err| {
            let msg = format!(
                "{}: failed to subscribe to {topics:?}: {err}",
                self.transport_id()
            );
            log_error!("{msg}");
            RpcError::Transport(msg)
        })?;

        log_info!(
            "{}: subscribed to {topics:?} in group {group}",
            self.transport_id()
        );

        let (tx, rx) = mpsc::channel(INBOX_DEPTH);
        let handle = tokio::spawn(receive_loop(
            self.transport_id().to_string(),
            consumer,
            tx,
        ));
        self.tasks.write().await.push(handle);

        Ok(SubscriptionHandle { inbox: rx })
    }

    async fn close(&self) -> Result<()> {
        // ---
        log_debug!("{}: closing kafka transport", self.transport_id());

        let mut tasks = self.tasks.write().await;
        for handle in tasks.drain(..) {
            handle.abort();
        }

        self.producer.flush(FLUSH_TIMEOUT).map_err(|err| {
            let msg = format!("{}: flush on close failed: {err}", self.transport_id());
            log_warn!("{msg}");
            RpcError::Transport(msg)
        })
    }
}

/// Parse `kafka://host:port[,host:port]` into a bootstrap server list.
fn bootstrap_servers(uri: &str) -> Result<String> {
    // ---
    let servers = uri.strip_prefix("kafka://").unwrap_or(uri).trim_end_matches('/');
    if servers.is_empty() {
        return Err(RpcError::Transport(
            "Kafka transport requires at least one bootstrap server".to_string(),
        ));
    }
    Ok(servers.to_string())
}

/// Creates a Kafka transport from the given configuration.
///
/// # Errors
///
/// Returns an error if the URI names no bootstrap server or the producer
/// cannot be created. Broker connections are established lazily.
pub async fn create_transport(config: TransportConfig) -> Result<TransportPtr> {
    // ---
    let bootstrap_servers = bootstrap_servers(&config.uri)?;

    let producer: FutureProducer =
        client_config(&bootstrap_servers, &config.node_id, &config.properties)
            .create()
            .map_err(|err| {
                let msg = format!("kafka: failed to create producer for {bootstrap_servers}: {err}");
                log_error!("{msg}");
                RpcError::Transport(msg)
            })?;

    log_info!(
        "{}: kafka transport ready for {bootstrap_servers}",
        config.node_id
    );

    Ok(Arc::new(KafkaTransport {
        base: TransportBase::from(&config),
        bootstrap_servers,
        properties: config.properties,
        producer,
        tasks: Arc::new(RwLock::new(Vec::new())),
    }))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_bootstrap_servers_from_uri() {
        // ---
        assert_eq!(
            bootstrap_servers("kafka://localhost:9092").unwrap(),
            "localhost:9092"
        );
        assert_eq!(
            bootstrap_servers("kafka://a:9092,b:9092/").unwrap(),
            "a:9092,b:9092"
        );
        assert_eq!(bootstrap_servers("broker:9092").unwrap(), "broker:9092");
        assert!(bootstrap_servers("kafka://").is_err());
    }

    #[tokio::test]
    async fn test_create_without_broker_is_lazy() {
        // ---
        let transport = create_transport(TransportConfig::new("kafka://127.0.0.1:1", "route"))
            .await
            .unwrap();
        assert_eq!(transport.transport_id(), "route");
        assert_eq!(transport.group_id(), "route");
    }
}

//! Generic service: answers `test_request_reply` and `list`, then calls
//! itself once to show a full round trip.
//!
//! Run with: cargo run --example generic_service
//!
//! Against Kafka:
//! `BROKER_URI=kafka://localhost:9092 cargo run --example generic_service --features transport_rdkafka`
//!
//! With a broker URI other than `memory://` the service keeps serving until
//! Ctrl+C.
mod common;

use common::{answer, init_tracing, TestKafkaRequest, TestKafkaResponse};
use topic_rpc::{
    // ---
    create_transport,
    BridgeConfig,
    RpcBridgeBuilder,
    Service,
    TopicRegistry,
    LIST,
    TEST_REQUEST_REPLY,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ---
    init_tracing();

    let config = BridgeConfig::from_env("generic-service-1")?;
    let transport = create_transport(&config).await?;

    let bridge = RpcBridgeBuilder::new(transport, TopicRegistry::standard(Service::Generic))
        .config(&config)
        .sync_handler(TEST_REQUEST_REPLY, |req: TestKafkaRequest| {
            Ok::<_, String>(answer("generic", req))
        })
        .handler(LIST, |_: serde_json::Value| async move {
            Ok::<_, String>(vec!["generic-1", "generic-2"])
        })
        .build()
        .await?;

    let registry = bridge.registry().clone();
    let resp: TestKafkaResponse = bridge
        .producer()
        .call(&registry, TEST_REQUEST_REPLY, &TestKafkaRequest::new("hello", "generic-service"))
        .await?;
    println!("{} (success: {})", resp.message, resp.success);

    let items: Vec<String> = bridge
        .producer()
        .call(&registry, LIST, &serde_json::json!({}))
        .await?;
    println!("list: {items:?}");

    if config.broker_uri.starts_with("memory://") {
        return Ok(bridge.shutdown().await?);
    }

    println!("{}", serde_json::to_string_pretty(&bridge.status())?);

    let runner = bridge.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("Received Ctrl+C, shutting down...");
            let _ = runner.shutdown().await;
        }
    });

    bridge.run().await?;
    Ok(())
}

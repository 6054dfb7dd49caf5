//! The route service calls the destination service over the bus.
//!
//! Both services run in this process on one in-memory hub, each with its own
//! transport and consumer group, the way two deployments would share a
//! broker.
//!
//! Run with: cargo run --example route_to_destination
mod common;

use std::time::Duration;

use common::{answer, init_tracing, TestKafkaRequest, TestKafkaResponse};
use topic_rpc::{
    // ---
    create_memory_transport_with_hub,
    MemoryHub,
    RpcBridgeBuilder,
    RpcError,
    Service,
    TopicRegistry,
    TransportConfig,
    LIST,
    TEST_REQUEST_REPLY,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ---
    init_tracing();

    let hub = MemoryHub::new();
    let destinations = TopicRegistry::standard(Service::Destination);

    let config = |node_id: &str, group: &str| TransportConfig {
        group_id: Some(group.to_string()),
        ..TransportConfig::new("memory://", node_id)
    };

    let destination = RpcBridgeBuilder::new(
        create_memory_transport_with_hub(config("destination-1", "destination-service"), hub.clone())
            .await?,
        destinations.clone(),
    )
    .sync_handler(TEST_REQUEST_REPLY, |req: TestKafkaRequest| {
        Ok::<_, String>(answer("destination", req))
    })
    .build()
    .await?;

    let route = RpcBridgeBuilder::new(
        create_memory_transport_with_hub(config("route-1", "route-service"), hub.clone()).await?,
        TopicRegistry::standard(Service::Route),
    )
    .calls(&destinations)
    .reply_timeout(Duration::from_secs(2))
    .build()
    .await?;

    let resp: TestKafkaResponse = route
        .producer()
        .call(
            &destinations,
            TEST_REQUEST_REPLY,
            &TestKafkaRequest::new("hello from route", "route-service"),
        )
        .await?;
    println!(
        "{} (from {:?}, success: {})",
        resp.message, resp.from_service, resp.success
    );

    // Destination registers no list handler, so this call times out.
    match route
        .producer()
        .call::<_, Vec<String>>(&destinations, LIST, &serde_json::json!({}))
        .await
    {
        Err(err @ RpcError::ReplyTimeout { .. }) => println!("expected timeout: {err}"),
        other => println!("unexpected outcome: {other:?}"),
    }

    route.shutdown().await?;
    destination.shutdown().await?;
    Ok(())
}

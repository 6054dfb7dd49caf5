// tests/transport_memory.rs

use bytes::Bytes;
use tokio::time::{timeout, Duration};

use topic_rpc::{
    // ---
    create_memory_transport_with_hub,
    CorrelationId,
    Envelope,
    MemoryHub,
    Subscription,
    Topic,
    TransportConfig,
    TransportPtr,
};

async fn memory_transport(hub: &std::sync::Arc<MemoryHub>, node_id: &str) -> TransportPtr {
    create_memory_transport_with_hub(TransportConfig::new("memory://", node_id), hub.clone())
        .await
        .expect("failed to create memory transport")
}

#[tokio::test]
async fn memory_subscribe_then_publish_delivers() {
    // ---
    // Arrange
    // ---
    let hub = MemoryHub::new();
    let transport = memory_transport(&hub, "generic").await;

    let topic = Topic::from("generic.test_request_reply_req");

    let mut sub = transport
        .subscribe(topic.clone().into())
        .await
        .expect("subscribe failed");

    let payload = Bytes::from_static(b"hello");
    let id = CorrelationId::generate();

    let env = Envelope::request(
        topic.clone(),
        payload.clone(),
        id.clone(),
        Topic::from("generic.test_request_reply_res"),
    );

    // ---
    // Act
    // ---
    transport.publish(env).await.expect("publish failed");

    // ---
    // Assert
    // ---
    let received = timeout(Duration::from_millis(100), sub.inbox.recv())
        .await
        .expect("timed out waiting for message")
        .expect("subscription channel closed unexpectedly");

    assert_eq!(received.payload, payload);
    assert_eq!(received.topic, topic);
    assert_eq!(received.correlation_id, Some(id));
    assert_eq!(
        received.reply_to,
        Some(Topic::from("generic.test_request_reply_res"))
    );
}

#[tokio::test]
async fn memory_publish_without_subscribers_succeeds() {
    // ---
    let hub = MemoryHub::new();
    let transport = memory_transport(&hub, "route").await;

    let env = Envelope::new(Topic::from("route.nobody_listens"), Bytes::from_static(b"{}"));
    transport.publish(env).await.expect("publish failed");
}

#[tokio::test]
async fn memory_every_group_gets_a_copy() {
    // ---
    let hub = MemoryHub::new();
    let route = memory_transport(&hub, "route").await;
    let auth = memory_transport(&hub, "auth").await;

    let topic = Topic::from("destination.list_res");
    let mut route_sub = route.subscribe(topic.clone().into()).await.unwrap();
    let mut auth_sub = auth.subscribe(topic.clone().into()).await.unwrap();

    route
        .publish(Envelope::new(topic, Bytes::from_static(b"[]")))
        .await
        .unwrap();

    for inbox in [&mut route_sub.inbox, &mut auth_sub.inbox] {
        let env = timeout(Duration::from_millis(100), inbox.recv())
            .await
            .expect("timed out")
            .expect("closed");
        assert_eq!(&env.payload[..], b"[]");
    }
}

#[tokio::test]
async fn memory_group_members_share_messages() {
    // ---
    let hub = MemoryHub::new();
    let first = memory_transport(&hub, "destination-1").await;
    let second = memory_transport(&hub, "destination-2").await;

    let topic = Topic::from("destination.list_req");
    let sub = || Subscription::from(topic.clone()).in_group("destination");
    let mut a = first.subscribe(sub()).await.unwrap();
    let mut b = second.subscribe(sub()).await.unwrap();

    for n in 0..10u8 {
        first
            .publish(Envelope::new(topic.clone(), Bytes::from(vec![n])))
            .await
            .unwrap();
    }

    let mut received = 0;
    for inbox in [&mut a.inbox, &mut b.inbox] {
        let mut mine = 0;
        while let Ok(Some(_)) = timeout(Duration::from_millis(50), inbox.recv()).await {
            mine += 1;
        }
        assert_eq!(mine, 5, "unkeyed messages rotate between group members");
        received += mine;
    }
    assert_eq!(received, 10);
}

#[tokio::test]
async fn memory_same_key_goes_to_same_member_in_order() {
    // ---
    let hub = MemoryHub::new();
    let first = memory_transport(&hub, "route-1").await;
    let second = memory_transport(&hub, "route-2").await;

    let topic = Topic::from("route.list_req");
    let sub = || Subscription::from(topic.clone()).in_group("route");
    let mut a = first.subscribe(sub()).await.unwrap();
    let mut b = second.subscribe(sub()).await.unwrap();

    for n in 0..20u8 {
        let env = Envelope::new(topic.clone(), Bytes::from(vec![n])).with_key("route-42");
        first.publish(env).await.unwrap();
    }

    let mut seen = Vec::new();
    for inbox in [&mut a.inbox, &mut b.inbox] {
        let mut mine = Vec::new();
        while let Ok(Some(env)) = timeout(Duration::from_millis(50), inbox.recv()).await {
            mine.push(env.payload[0]);
        }
        if !mine.is_empty() {
            seen.push(mine);
        }
    }

    assert_eq!(seen.len(), 1, "one member owns the key");
    assert_eq!(seen[0], (0..20).collect::<Vec<u8>>());
}

#[tokio::test]
async fn memory_publish_after_close_is_send_error() {
    // ---
    let hub = MemoryHub::new();
    let transport = memory_transport(&hub, "auth").await;
    let mut sub = transport
        .subscribe(Topic::from("auth.list_req").into())
        .await
        .unwrap();

    transport.close().await.unwrap();

    let err = transport
        .publish(Envelope::new(Topic::from("auth.list_req"), Bytes::new()))
        .await
        .unwrap_err();
    assert!(err.is_send());

    // Closing ends the subscription.
    let next = timeout(Duration::from_millis(100), sub.inbox.recv())
        .await
        .expect("inbox did not close");
    assert!(next.is_none());
}

#[tokio::test]
async fn memory_close_leaves_other_transports_alone() {
    // ---
    let hub = MemoryHub::new();
    let closing = memory_transport(&hub, "generic-1").await;
    let staying = memory_transport(&hub, "generic-2").await;

    let topic = Topic::from("generic.list_req");
    let mut sub = staying.subscribe(topic.clone().into()).await.unwrap();

    closing.close().await.unwrap();

    staying
        .publish(Envelope::new(topic, Bytes::from_static(b"1")))
        .await
        .unwrap();
    let env = timeout(Duration::from_millis(100), sub.inbox.recv())
        .await
        .expect("timed out")
        .expect("closed");
    assert_eq!(&env.payload[..], b"1");
}

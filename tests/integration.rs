use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use topic_rpc::{
    // ---
    create_memory_transport_with_hub,
    Direction,
    Envelope,
    FailurePolicy,
    MemoryHub,
    Result,
    RpcBridge,
    RpcBridgeBuilder,
    RpcError,
    Service,
    Subscription,
    Topic,
    TopicRegistry,
    TransportConfig,
    TransportPtr,
    LIST,
    TEST_REQUEST_REPLY,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct TestKafkaRequest {
    message: String,
    from_service: Option<String>,
    timestamp: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct TestKafkaResponse {
    message: String,
    from_service: Option<String>,
    received_from: Option<String>,
    timestamp: Option<i64>,
    success: bool,
}

fn hello(from: &str) -> TestKafkaRequest {
    TestKafkaRequest {
        message: "hello".into(),
        from_service: Some(from.into()),
        timestamp: Some(1_700_000_000_000),
    }
}

#[cfg(feature = "logging")]
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn transport(hub: &Arc<MemoryHub>, node_id: &str, group: &str) -> Result<TransportPtr> {
    let config = TransportConfig {
        group_id: Some(group.into()),
        ..TransportConfig::new("memory://", node_id)
    };
    create_memory_transport_with_hub(config, hub.clone()).await
}

/// A generic-service instance answering `test_request_reply`.
async fn generic_service(hub: &Arc<MemoryHub>, node_id: &str) -> Result<RpcBridge> {
    // ---
    RpcBridgeBuilder::new(
        transport(hub, node_id, "generic-service").await?,
        TopicRegistry::standard(Service::Generic),
    )
    .sync_handler(TEST_REQUEST_REPLY, |req: TestKafkaRequest| {
        Ok::<_, String>(TestKafkaResponse {
            message: format!("generic service received: {}", req.message),
            from_service: Some("generic-service".into()),
            received_from: req.from_service,
            timestamp: req.timestamp,
            success: true,
        })
    })
    .build()
    .await
}

#[tokio::test]
async fn test_generic_round_trip() -> Result<()> {
    // ---
    #[cfg(feature = "logging")]
    init_logging();

    let hub = MemoryHub::new();
    let generic = generic_service(&hub, "generic-1").await?;
    let registry = generic.registry().clone();

    let response: TestKafkaResponse = generic
        .producer()
        .send_and_receive(
            registry.topic(TEST_REQUEST_REPLY, Direction::Request)?,
            registry.topic(TEST_REQUEST_REPLY, Direction::Reply)?,
            &hello("generic-service"),
        )
        .await?;

    assert_eq!(response.message, "generic service received: hello");
    assert!(response.success);
    assert_eq!(response.received_from.as_deref(), Some("generic-service"));
    assert_eq!(generic.producer().pending(), 0);

    generic.shutdown().await
}

#[tokio::test]
async fn test_cross_service_call() -> Result<()> {
    // ---
    let hub = MemoryHub::new();

    let destination = RpcBridgeBuilder::new(
        transport(&hub, "destination-1", "destination-service").await?,
        TopicRegistry::standard(Service::Destination),
    )
    .handler(TEST_REQUEST_REPLY, |req: TestKafkaRequest| async move {
        Ok::<_, String>(TestKafkaResponse {
            message: format!("Destination service received: {}", req.message),
            from_service: Some("destination-service".into()),
            received_from: req.from_service,
            timestamp: None,
            success: true,
        })
    })
    .build()
    .await?;

    let route = RpcBridgeBuilder::new(
        transport(&hub, "route-1", "route-service").await?,
        TopicRegistry::standard(Service::Route),
    )
    .calls(destination.registry())
    .build()
    .await?;

    let response: TestKafkaResponse = route
        .producer()
        .call(destination.registry(), TEST_REQUEST_REPLY, &hello("route-service"))
        .await?;

    assert_eq!(response.message, "Destination service received: hello");
    assert_eq!(response.from_service.as_deref(), Some("destination-service"));
    assert_eq!(response.received_from.as_deref(), Some("route-service"));

    route.shutdown().await?;
    destination.shutdown().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_get_their_own_replies() -> Result<()> {
    // ---
    let hub = MemoryHub::new();

    let generic = RpcBridgeBuilder::new(
        transport(&hub, "generic-1", "generic-service").await?,
        TopicRegistry::standard(Service::Generic),
    )
    .workers(4)
    .handler(TEST_REQUEST_REPLY, |req: TestKafkaRequest| async move {
        // Reply out of order.
        let delay = req.timestamp.unwrap_or(0) as u64 % 7;
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok::<_, String>(TestKafkaResponse {
            message: req.message,
            timestamp: req.timestamp,
            success: true,
            ..Default::default()
        })
    })
    .build()
    .await?;

    let mut calls = Vec::new();
    for n in 0..100i64 {
        let producer = generic.producer().clone();
        let registry = generic.registry().clone();
        calls.push(tokio::spawn(async move {
            let req = TestKafkaRequest {
                message: format!("request {n}"),
                from_service: None,
                timestamp: Some(n),
            };
            let resp: TestKafkaResponse = producer.call(&registry, TEST_REQUEST_REPLY, &req).await?;
            Ok::<_, RpcError>((n, resp))
        }));
    }

    for call in calls {
        let (n, resp) = call.await.expect("caller task panicked")?;
        assert_eq!(resp.message, format!("request {n}"));
        assert_eq!(resp.timestamp, Some(n));
    }
    assert_eq!(generic.producer().pending(), 0);

    generic.shutdown().await
}

#[tokio::test(start_paused = true)]
async fn test_timeout_without_responder() -> Result<()> {
    // ---
    let hub = MemoryHub::new();

    let auth = RpcBridgeBuilder::new(
        transport(&hub, "auth-1", "auth-service").await?,
        TopicRegistry::standard(Service::Auth),
    )
    .calls(&TopicRegistry::standard(Service::Route))
    .reply_timeout(Duration::from_millis(500))
    .build()
    .await?;

    let err = auth
        .producer()
        .call::<_, TestKafkaResponse>(
            &TopicRegistry::standard(Service::Route),
            LIST,
            &hello("auth-service"),
        )
        .await
        .unwrap_err();

    assert!(
        matches!(err, RpcError::ReplyTimeout { ref reply_topic, timeout, .. }
            if reply_topic == "route.list_res" && timeout == Duration::from_millis(500)),
        "unexpected error: {err}"
    );
    assert_eq!(auth.producer().pending(), 0);

    auth.shutdown().await
}

#[tokio::test]
async fn test_duplicate_reply_is_discarded() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let caller = RpcBridgeBuilder::new(
        transport(&hub, "route-1", "route-service").await?,
        TopicRegistry::standard(Service::Route),
    )
    .build()
    .await?;

    // A responder that answers every request twice.
    let responder = transport(&hub, "route-dup", "route-dup").await?;
    let mut requests = responder
        .subscribe(Subscription::from(Topic::from("route.list_req")))
        .await?;
    let replies = Arc::new(AtomicUsize::new(0));
    let sent = replies.clone();
    tokio::spawn(async move {
        while let Some(req) = requests.inbox.recv().await {
            let bodies: [&'static [u8]; 2] = [br#"["first"]"#, br#"["second"]"#];
            for body in bodies {
                let reply = Envelope::reply(
                    req.reply_to.clone().expect("reply topic"),
                    bytes::Bytes::from_static(body),
                    req.correlation_id.clone(),
                );
                responder.publish(reply).await.expect("publish reply");
                sent.fetch_add(1, Ordering::SeqCst);
            }
        }
    });

    let registry = TopicRegistry::standard(Service::Route);
    let first: Vec<String> = caller.producer().call(&registry, LIST, &()).await?;
    assert_eq!(first, ["first"]);

    // Give the duplicate time to arrive; it must not resolve anything.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(replies.load(Ordering::SeqCst), 2);
    assert_eq!(caller.producer().pending(), 0);

    caller.shutdown().await
}

#[tokio::test]
async fn test_malformed_request_gets_fast_empty_reply() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let generic = generic_service(&hub, "generic-1").await?;
    let registry = generic.registry().clone();

    let started = tokio::time::Instant::now();
    let err = generic
        .producer()
        .call::<_, TestKafkaResponse>(&registry, TEST_REQUEST_REPLY, &"not an object")
        .await
        .unwrap_err();

    assert!(matches!(err, RpcError::EmptyReply(_)), "unexpected error: {err}");
    assert!(started.elapsed() < Duration::from_secs(1));

    // The listener keeps serving after the failure.
    let ok: TestKafkaResponse = generic
        .producer()
        .call(&registry, TEST_REQUEST_REPLY, &hello("generic-service"))
        .await?;
    assert!(ok.success);

    generic.shutdown().await
}

#[tokio::test]
async fn test_error_header_policy_surfaces_remote_error() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let route = RpcBridgeBuilder::new(
        transport(&hub, "route-1", "route-service").await?,
        TopicRegistry::standard(Service::Route),
    )
    .failure_policy(FailurePolicy::ErrorHeader)
    .sync_handler(LIST, |_: serde_json::Value| -> std::result::Result<Vec<String>, String> {
        Err("route store unavailable".into())
    })
    .build()
    .await?;

    let err = route
        .producer()
        .call::<_, Vec<String>>(route.registry(), LIST, &serde_json::json!({}))
        .await
        .unwrap_err();
    assert!(
        matches!(err, RpcError::Remote(ref msg) if msg == "route store unavailable"),
        "unexpected error: {err}"
    );

    route.shutdown().await
}

#[tokio::test]
async fn test_fire_and_forget_creates_no_exchange() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let generic = generic_service(&hub, "generic-1").await?;

    let observer = transport(&hub, "observer", "observer").await?;
    let mut sub = observer
        .subscribe(Subscription::from(Topic::from("generic.test_request_reply_req")))
        .await?;

    generic
        .producer()
        .send(
            &Topic::from("generic.test_request_reply_req"),
            &hello("generic-service"),
        )
        .await?;

    let env = tokio::time::timeout(Duration::from_millis(200), sub.inbox.recv())
        .await
        .expect("timed out")
        .expect("closed");
    assert!(env.correlation_id.is_none());
    assert!(env.reply_to.is_none());
    assert_eq!(generic.producer().pending(), 0);

    generic.shutdown().await
}

#[tokio::test]
async fn test_send_failure_is_reported_immediately() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let generic = generic_service(&hub, "generic-1").await?;
    let producer = generic.producer().clone();
    let registry = generic.registry().clone();

    generic.transport().close().await?;

    let err = producer
        .call::<_, TestKafkaResponse>(&registry, TEST_REQUEST_REPLY, &hello("generic-service"))
        .await
        .unwrap_err();
    assert!(err.is_send(), "unexpected error: {err}");
    assert_eq!(producer.pending(), 0);

    let err = producer
        .send(&Topic::from("generic.list_req"), &hello("generic-service"))
        .await
        .unwrap_err();
    assert!(err.is_send());

    generic.shutdown().await
}

#[tokio::test]
async fn test_unsubscribed_reply_topic_is_rejected() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let generic = generic_service(&hub, "generic-1").await?;

    // The generic bridge was not told it calls the route service.
    let err = generic
        .producer()
        .call::<_, TestKafkaResponse>(
            &TopicRegistry::standard(Service::Route),
            LIST,
            &hello("generic-service"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::UnsubscribedReplyTopic(ref t) if t == "route.list_res"));

    generic.shutdown().await
}

#[tokio::test]
async fn test_unknown_operation_fails_build() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let result = RpcBridgeBuilder::new(
        transport(&hub, "generic-1", "generic-service").await?,
        TopicRegistry::standard(Service::Generic),
    )
    .sync_handler("delete", |x: u32| Ok::<_, String>(x))
    .build()
    .await;

    assert!(matches!(
        result,
        Err(RpcError::UnknownOperation { ref operation, .. }) if operation == "delete"
    ));
    Ok(())
}

#[tokio::test]
async fn test_status_and_shutdown_release_callers() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let auth = RpcBridgeBuilder::new(
        transport(&hub, "auth-1", "auth-service").await?,
        TopicRegistry::standard(Service::Auth),
    )
    .calls(&TopicRegistry::standard(Service::Destination))
    .sync_handler(LIST, |_: serde_json::Value| Ok::<_, String>(Vec::<String>::new()))
    .build()
    .await?;

    let status = auth.status();
    assert_eq!(status.service, "auth");
    assert!(status.producer_available);
    assert_eq!(status.request_topics, ["auth.list_req"]);
    assert!(status.reply_topics.contains(&"destination.list_res".to_string()));

    // Nobody answers destination requests, so this caller waits until shutdown.
    let producer = auth.producer().clone();
    let waiting = tokio::spawn(async move {
        producer
            .call::<_, Vec<String>>(&TopicRegistry::standard(Service::Destination), LIST, &())
            .await
    });
    while auth.producer().pending() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(auth.status().pending_requests, 1);

    let runner = {
        let auth = auth.clone();
        tokio::spawn(async move { auth.run().await })
    };

    auth.shutdown().await?;
    runner.await.expect("runner panicked")?;

    let err = waiting.await.expect("caller panicked").unwrap_err();
    assert!(matches!(err, RpcError::Abandoned(_)), "unexpected error: {err}");
    assert!(!auth.status().producer_available);

    // Second shutdown is harmless.
    auth.shutdown().await
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeyedEvent {
    key: String,
    seq: u32,
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_keyed_sends_are_handled_in_order() -> Result<()> {
    // ---
    // Arrange
    // ---
    let hub = MemoryHub::new();
    let seen: Arc<std::sync::Mutex<Vec<KeyedEvent>>> = Arc::default();

    let recorder = seen.clone();
    let route = RpcBridgeBuilder::new(
        transport(&hub, "route-1", "route-service").await?,
        TopicRegistry::standard(Service::Route),
    )
    .workers(4)
    .handler(LIST, move |event: KeyedEvent| {
        let recorder = recorder.clone();
        async move {
            // Uneven handling time, so an unordered pool would reorder.
            tokio::time::sleep(Duration::from_millis(u64::from(event.seq % 3))).await;
            recorder.lock().expect("poisoned").push(event);
            Ok::<_, String>(())
        }
    })
    .build()
    .await?;

    let topic = route.registry().topic(LIST, Direction::Request)?.clone();
    const KEYS: usize = 8;
    const PER_KEY: u32 = 25;

    // ---
    // Act
    // ---
    for seq in 0..PER_KEY {
        for k in 0..KEYS {
            let key = format!("route-{k}");
            let event = KeyedEvent {
                key: key.clone(),
                seq,
            };
            route.producer().send_keyed(&topic, &key, &event).await?;
        }
    }

    let total = KEYS * PER_KEY as usize;
    tokio::time::timeout(Duration::from_secs(5), async {
        while seen.lock().expect("poisoned").len() < total {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("not every keyed event was handled");

    // ---
    // Assert
    // ---
    let seen = seen.lock().expect("poisoned").clone();
    for k in 0..KEYS {
        let key = format!("route-{k}");
        let order: Vec<u32> = seen.iter().filter(|e| e.key == key).map(|e| e.seq).collect();
        assert_eq!(order, (0..PER_KEY).collect::<Vec<_>>(), "events of {key} out of order");
    }

    route.shutdown().await
}

#[tokio::test]
async fn test_stalled_subscriber_blocks_no_publisher() -> Result<()> {
    // ---
    // Arrange
    // ---
    let hub = MemoryHub::new();
    let route = RpcBridgeBuilder::new(
        transport(&hub, "route-1", "route-service").await?,
        TopicRegistry::standard(Service::Route),
    )
    .build()
    .await?;

    // Subscribed but never read.
    let stalled = transport(&hub, "stalled-1", "stalled").await?;
    let _never_read = stalled
        .subscribe(Subscription::from(Topic::from("route.list_req")))
        .await?;

    let registry = route.registry().clone();
    let topic = registry.topic(LIST, Direction::Request)?.clone();

    // ---
    // Act
    // ---
    let flood = tokio::time::timeout(Duration::from_secs(2), async {
        for n in 0..2_000u32 {
            route.producer().send(&topic, &n).await?;
        }
        Ok::<_, RpcError>(())
    })
    .await;

    let call = tokio::time::timeout(
        Duration::from_secs(2),
        route.producer().send_and_receive_with_timeout::<_, Vec<String>>(
            &topic,
            registry.topic(LIST, Direction::Reply)?,
            &(),
            Duration::from_millis(100),
        ),
    )
    .await;

    // ---
    // Assert
    // ---
    assert!(matches!(flood, Ok(Ok(()))), "fire-and-forget sends blocked");
    match call {
        Ok(Err(err)) => assert!(err.is_timeout(), "unexpected error: {err}"),
        Ok(Ok(_)) => panic!("nobody answers list requests"),
        Err(_) => panic!("request outlived its reply timeout"),
    }
    assert_eq!(route.producer().pending(), 0);

    route.shutdown().await
}

//! Wire types shared with the existing services.
//!
//! Field names follow the services' JSON (camelCase), so these structs can
//! talk to them over a real broker unchanged.
#![allow(dead_code)]

use serde::{Deserialize, Serialize};

/// Body of a `test_request_reply` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TestKafkaRequest {
    pub message: String,
    pub from_service: Option<String>,
    pub timestamp: Option<i64>,
}

/// Body of a `test_request_reply` reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TestKafkaResponse {
    pub message: String,
    pub from_service: Option<String>,
    pub received_from: Option<String>,
    pub timestamp: Option<i64>,
    pub success: bool,
}

impl TestKafkaRequest {
    pub fn new(message: impl Into<String>, from_service: &str) -> Self {
        Self {
            message: message.into(),
            from_service: Some(from_service.to_string()),
            timestamp: Some(now_millis()),
        }
    }
}

/// Answer a connectivity check the way every service does.
pub fn answer(service: &str, req: TestKafkaRequest) -> TestKafkaResponse {
    // ---
    let name = format!("{}{}", service[..1].to_uppercase(), &service[1..]);
    TestKafkaResponse {
        message: format!("{name} service received: {}", req.message),
        from_service: Some(format!("{service}-service")),
        received_from: req.from_service,
        timestamp: Some(now_millis()),
        success: true,
    }
}

pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

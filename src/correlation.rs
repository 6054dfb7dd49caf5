use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

/// Opaque token binding a request to its eventual reply.
///
/// Generated tokens are UUID v4 strings. Tokens read off the wire are kept
/// verbatim, so foreign producers may use any format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(Arc<str>);

impl CorrelationId {
    /// Generate a new unique correlation ID.
    pub fn generate() -> Self {
        Self(Arc::from(Uuid::new_v4().to_string()))
    }

    /// Borrow the correlation ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Encode the token for a transport header.
    ///
    /// UUID tokens are written as their 16 raw bytes, which is what Spring
    /// Kafka's `ReplyingKafkaTemplate` puts in `kafka_correlationId`. Anything
    /// else is written as UTF-8.
    pub fn to_header_bytes(&self) -> Vec<u8> {
        // ---
        match Uuid::parse_str(&self.0) {
            Ok(uuid) => uuid.as_bytes().to_vec(),
            Err(_) => self.0.as_bytes().to_vec(),
        }
    }

    /// Decode a token from a transport header.
    ///
    /// Exactly 16 bytes are read as a raw UUID; otherwise the bytes must be
    /// UTF-8. Returns `None` for empty or undecodable values.
    pub fn from_header_bytes(bytes: &[u8]) -> Option<Self> {
        // ---
        if bytes.len() == 16 {
            if let Ok(uuid) = Uuid::from_slice(bytes) {
                return Some(Self::from(uuid));
            }
        }

        match std::str::from_utf8(bytes) {
            Ok(s) if !s.is_empty() => Some(Self::from(s)),
            _ => None,
        }
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl From<Uuid> for CorrelationId {
    fn from(uuid: Uuid) -> Self {
        Self(Arc::from(uuid.to_string()))
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

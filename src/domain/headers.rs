//! Header mapping for broker transports.
//!
//! Correlation token, reply topic and failure text travel as message headers.
//! The names match Spring Kafka's `KafkaHeaders`, so requests and replies
//! interoperate with `ReplyingKafkaTemplate` / `@SendTo` listeners.

use crate::{CorrelationId, Envelope, Topic};

/// Reply destination header (`KafkaHeaders.REPLY_TOPIC`).
pub const REPLY_TOPIC_HEADER: &str = "kafka_replyTopic";

/// Correlation token header (`KafkaHeaders.CORRELATION_ID`).
pub const CORRELATION_ID_HEADER: &str = "kafka_correlationId";

/// Failure text on replies sent under `FailurePolicy::ErrorHeader`.
pub const ERROR_HEADER: &str = "kafka_bridgeError";

/// Header-borne envelope fields recovered from a received message.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EnvelopeHeaders {
    pub correlation_id: Option<CorrelationId>,
    pub reply_to: Option<Topic>,
    pub error: Option<String>,
}

/// Header name/value pairs for an outgoing envelope. Absent fields produce
/// no header.
pub fn encode_headers(env: &Envelope) -> Vec<(&'static str, Vec<u8>)> {
    // ---
    let mut headers = Vec::with_capacity(3);

    if let Some(id) = &env.correlation_id {
        headers.push((CORRELATION_ID_HEADER, id.to_header_bytes()));
    }
    if let Some(reply_to) = &env.reply_to {
        headers.push((REPLY_TOPIC_HEADER, reply_to.as_str().as_bytes().to_vec()));
    }
    if let Some(error) = &env.error {
        headers.push((ERROR_HEADER, error.as_bytes().to_vec()));
    }

    headers
}

/// Recover envelope fields from received headers.
///
/// Unknown headers are ignored. A reply topic that is not UTF-8 is dropped,
/// which turns the message into one that expects no reply.
pub fn decode_headers<'a, I>(headers: I) -> EnvelopeHeaders
where
    I: IntoIterator<Item = (&'a str, Option<&'a [u8]>)>,
{
    // ---
    let mut decoded = EnvelopeHeaders::default();

    for (name, value) in headers {
        let Some(value) = value else { continue };

        match name {
            CORRELATION_ID_HEADER => {
                decoded.correlation_id = CorrelationId::from_header_bytes(value);
            }
            REPLY_TOPIC_HEADER => {
                decoded.reply_to = std::str::from_utf8(value)
                    .ok()
                    .filter(|s| !s.is_empty())
                    .map(Topic::from);
            }
            ERROR_HEADER => {
                decoded.error = Some(String::from_utf8_lossy(value).into_owned());
            }
            _ => {}
        }
    }

    decoded
}

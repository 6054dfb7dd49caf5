//! Payload codec.
//!
//! Payloads are JSON object graphs with no schema or version field. One
//! `JsonCodec` value is handed to the producer and the dispatcher when the
//! bridge is built.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::Result;

/// JSON payload codec.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonCodec;

impl JsonCodec {
    /// Serialize `value` into payload bytes.
    pub fn encode<T>(&self, value: &T) -> Result<Bytes>
    where
        T: Serialize + ?Sized,
    {
        Ok(Bytes::from(serde_json::to_vec(value)?))
    }

    /// Deserialize payload bytes into `T`.
    ///
    /// Fails with [`RpcError::Codec`](crate::RpcError::Codec) when the bytes
    /// are not JSON or do not match the shape of `T`. An empty payload is
    /// never valid JSON and always fails.
    pub fn decode<T>(&self, bytes: &[u8]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::RpcError;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    #[serde(rename_all = "camelCase")]
    struct TestRequest {
        message: String,
        from_service: String,
    }

    #[test]
    fn test_camel_case_wire_names() {
        // ---
        let codec = JsonCodec;
        let bytes = codec
            .encode(&TestRequest {
                message: "hello".into(),
                from_service: "route-service".into(),
            })
            .unwrap();
        assert_eq!(
            &bytes[..],
            br#"{"message":"hello","fromService":"route-service"}"#
        );
    }

    #[test]
    fn test_shape_mismatch_is_codec_error() {
        // ---
        let codec = JsonCodec;
        let result: Result<TestRequest> = codec.decode(br#"{"message":42}"#);
        assert!(matches!(result, Err(RpcError::Codec(_))));
    }

    #[test]
    fn test_empty_payload_is_codec_error() {
        // ---
        let result: Result<serde_json::Value> = JsonCodec.decode(b"");
        assert!(matches!(result, Err(RpcError::Codec(_))));
    }
}

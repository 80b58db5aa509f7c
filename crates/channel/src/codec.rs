//! 负载编解码
//!
//! 线上负载缺失与 `Payload::Null` 一一对应，编解码器只处理有值的负载。

use bridge_errors::{BridgeError, BridgeResult};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::message::Payload;

/// 负载编解码器
pub trait PayloadCodec<T>: Send + Sync {
    fn encode(&self, value: &T) -> BridgeResult<Vec<u8>>;

    /// 解码失败返回原因描述
    fn decode(&self, bytes: &[u8]) -> Result<T, String>;
}

/// JSON 编解码器（默认）
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T> PayloadCodec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> BridgeResult<Vec<u8>> {
        serde_json::to_vec(value)
            .map_err(|e| BridgeError::serialization(format!("Failed to serialize payload: {}", e)))
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, String> {
        serde_json::from_slice(bytes).map_err(|e| format!("Failed to deserialize payload: {}", e))
    }
}

pub(crate) fn encode_payload<T>(
    codec: &dyn PayloadCodec<T>,
    payload: &Payload<T>,
) -> BridgeResult<Option<Vec<u8>>> {
    match payload {
        Payload::Value(value) => codec.encode(value).map(Some),
        Payload::Null => Ok(None),
    }
}

pub(crate) fn decode_payload<T>(
    codec: &dyn PayloadCodec<T>,
    bytes: Option<&[u8]>,
) -> Result<Payload<T>, String> {
    match bytes {
        Some(bytes) => codec.decode(bytes).map(Payload::Value),
        None => Ok(Payload::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Foo {
        id: i32,
        name: String,
    }

    #[test]
    fn test_null_maps_to_absent_payload() {
        let encoded = encode_payload::<Foo>(&JsonCodec, &Payload::Null).unwrap();
        assert_eq!(encoded, None);

        let decoded = decode_payload::<Foo>(&JsonCodec, None).unwrap();
        assert!(decoded.is_null());
    }

    #[test]
    fn test_empty_payload_is_not_null() {
        // 空字节不是合法 JSON，不能被当作 Null
        assert!(decode_payload::<Foo>(&JsonCodec, Some(b"")).is_err());

        let empty = decode_payload::<String>(&JsonCodec, Some(b"\"\"")).unwrap();
        assert_eq!(empty, Payload::Value(String::new()));
    }

    #[test]
    fn test_decode_error_reason() {
        let err = decode_payload::<Foo>(&JsonCodec, Some(b"{not json")).unwrap_err();
        assert!(err.starts_with("Failed to deserialize payload"));
    }
}

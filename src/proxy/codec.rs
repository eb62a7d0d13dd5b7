//! Record encoding for cache payloads

use std::fmt::{self, Debug};
use std::marker::PhantomData;

use bytes::{BufMut, Bytes, BytesMut};

use crate::domain::{DomainError, Record};

/// Leading byte of every payload written by [`JsonCodec`]
pub const CODEC_VERSION: u8 = 1;

/// Converts record values to and from cache bytes.
///
/// `decode(encode(v)) == v` must hold for every value the codec accepts.
pub trait EntityCodec<V>: Send + Sync + Debug {
    fn encode(&self, value: &V) -> Result<Bytes, DomainError>;

    fn decode(&self, bytes: &[u8]) -> Result<V, DomainError>;
}

/// JSON payload behind a one-byte version header
pub struct JsonCodec<V> {
    _marker: PhantomData<fn() -> V>,
}

impl<V> JsonCodec<V> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<V> Default for JsonCodec<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Clone for JsonCodec<V> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<V> Debug for JsonCodec<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonCodec")
            .field("version", &CODEC_VERSION)
            .finish()
    }
}

impl<V: Record> EntityCodec<V> for JsonCodec<V> {
    fn encode(&self, value: &V) -> Result<Bytes, DomainError> {
        let json = serde_json::to_vec(value)
            .map_err(|e| DomainError::codec(format!("Failed to encode record: {}", e)))?;

        let mut buf = BytesMut::with_capacity(json.len() + 1);
        buf.put_u8(CODEC_VERSION);
        buf.put_slice(&json);
        Ok(buf.freeze())
    }

    fn decode(&self, bytes: &[u8]) -> Result<V, DomainError> {
        let (version, body) = bytes
            .split_first()
            .ok_or_else(|| DomainError::codec("Empty payload"))?;

        if *version != CODEC_VERSION {
            return Err(DomainError::codec(format!(
                "Unsupported payload version {}",
                version
            )));
        }

        serde_json::from_slice(body)
            .map_err(|e| DomainError::codec(format!("Failed to decode record: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Account {
        owner: String,
        balance: i64,
        tags: Vec<String>,
    }

    fn account() -> Account {
        Account {
            owner: "ada".to_string(),
            balance: -40,
            tags: vec!["vip".to_string()],
        }
    }

    #[test]
    fn test_round_trip() {
        let codec = JsonCodec::<Account>::new();

        let bytes = codec.encode(&account()).unwrap();
        assert_eq!(bytes[0], CODEC_VERSION);
        assert_eq!(codec.decode(&bytes).unwrap(), account());
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let codec = JsonCodec::<Account>::new();

        assert_eq!(
            codec.encode(&account()).unwrap(),
            codec.encode(&account()).unwrap()
        );
    }

    #[test]
    fn test_decode_empty_payload() {
        let codec = JsonCodec::<Account>::new();

        let result = codec.decode(&[]);
        assert!(matches!(result, Err(DomainError::Codec { .. })));
    }

    #[test]
    fn test_decode_unknown_version() {
        let codec = JsonCodec::<Account>::new();
        let mut bytes = codec.encode(&account()).unwrap().to_vec();
        bytes[0] = 9;

        let error = codec.decode(&bytes).unwrap_err();
        assert_eq!(error, DomainError::codec("Unsupported payload version 9"));
    }

    #[test]
    fn test_decode_truncated_body() {
        let codec = JsonCodec::<Account>::new();
        let bytes = codec.encode(&account()).unwrap();

        let result = codec.decode(&bytes[..bytes.len() - 3]);
        assert!(matches!(result, Err(DomainError::Codec { .. })));
    }

    #[test]
    fn test_decode_wrong_shape() {
        let codec = JsonCodec::<Account>::new();
        let mut bytes = vec![CODEC_VERSION];
        bytes.extend_from_slice(br#"{"owner": 5}"#);

        assert!(codec.decode(&bytes).is_err());
    }
}

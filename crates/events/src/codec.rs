//! JSON encoding of records that cross a process boundary.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::message::Record;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode record: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode record: {0}")]
    Decode(#[source] serde_json::Error),
}

pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(value).map_err(CodecError::Encode)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    serde_json::from_slice(bytes).map_err(CodecError::Decode)
}

/// Encode a type-erased record as received by a family-topic subscriber.
pub fn encode_record(record: &dyn Record) -> Result<Vec<u8>, CodecError> {
    let value = record.to_json()?;
    serde_json::to_vec(&value).map_err(CodecError::Encode)
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;
    use crate::message::{MessageHeader, topics};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TraceLoaded {
        header: MessageHeader,
        traces: u32,
    }

    crate::impl_message!(TraceLoaded => [topics::PAYLOAD]);

    #[test]
    fn typed_record_survives_the_wire() {
        let original = TraceLoaded {
            header: MessageHeader::new("loaded").with_correlation(MessageHeader::default().id),
            traces: 240,
        };

        let bytes = encode(&original).unwrap();
        let decoded: TraceLoaded = decode(&bytes).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn erased_record_encodes_like_the_typed_one() {
        let original = TraceLoaded {
            header: MessageHeader::default(),
            traces: 3,
        };
        let erased: &dyn Record = &original;

        let erased: serde_json::Value = decode(&encode_record(erased).unwrap()).unwrap();
        let typed: serde_json::Value = decode(&encode(&original).unwrap()).unwrap();
        assert_eq!(erased, typed);
    }

    #[test]
    fn malformed_input_is_a_decode_error() {
        let err = decode::<TraceLoaded>(b"{\"traces\": \"many\"}").unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }
}

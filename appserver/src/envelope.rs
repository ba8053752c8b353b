//! The wire envelope: a self-describing MessagePack value.
//!
//! Typed payloads are serialized with struct-as-map encoding so that the
//! top-level wire value is always a map, and byte arrays stay distinct from
//! strings across a round trip.

use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// The content type every request and response body must carry.
pub const CONTENT_TYPE: &str = "application/vnd.msgpack";

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("error encoding envelope: {0}")]
    Encode(String),
    #[error("error decoding envelope: {0}")]
    Decode(String),
}

/// Encodes a typed payload as a MessagePack map.
pub fn encode<T: Serialize>(value: &T) -> Result<Bytes, EnvelopeError> {
    let mut buf = Vec::new();
    let mut serializer =
        rmp_serde::Serializer::new(&mut buf).with_struct_map();
    value
        .serialize(&mut serializer)
        .map_err(|err| EnvelopeError::Encode(err.to_string()))?;
    Ok(Bytes::from(buf))
}

/// Decodes a typed payload.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, EnvelopeError> {
    rmp_serde::from_slice(bytes)
        .map_err(|err| EnvelopeError::Decode(err.to_string()))
}

/// Decodes the raw self-describing value, without imposing a shape.
pub fn decode_value(bytes: &[u8]) -> Result<rmpv::Value, EnvelopeError> {
    let mut cursor = bytes;
    rmpv::decode::read_value(&mut cursor)
        .map_err(|err| EnvelopeError::Decode(err.to_string()))
}

/// Encodes a raw value.
pub fn encode_value(value: &rmpv::Value) -> Result<Bytes, EnvelopeError> {
    let mut buf = Vec::new();
    rmpv::encode::write_value(&mut buf, value)
        .map_err(|err| EnvelopeError::Encode(err.to_string()))?;
    Ok(Bytes::from(buf))
}

/// Interprets an already-decoded value as a typed payload. Used on the
/// server side, where the raw value has to be kept around for error
/// reporting.
pub fn from_value<T: DeserializeOwned>(
    value: rmpv::Value,
) -> Result<T, EnvelopeError> {
    rmpv::ext::from_value(value)
        .map_err(|err| EnvelopeError::Decode(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmpv::Value;
    use serde::Deserialize;

    fn round_trip(value: Value) {
        let encoded = encode_value(&value).unwrap();
        assert_eq!(decode_value(&encoded).unwrap(), value);
    }

    #[test]
    fn values_round_trip() {
        round_trip(Value::Nil);
        round_trip(Value::Boolean(true));
        round_trip(Value::from(-42));
        round_trip(Value::from(3.5));
        round_trip(Value::from("text"));
        round_trip(Value::Binary(vec![0, 159, 146, 150]));
        round_trip(Value::Array(vec![
            Value::Nil,
            Value::from(1),
            Value::Array(vec![Value::from("nested")]),
        ]));
        round_trip(Value::Map(vec![
            (Value::from("k"), Value::from("v")),
            (
                Value::from("inner"),
                Value::Map(vec![(Value::from("n"), Value::from(2))]),
            ),
        ]));
    }

    #[test]
    fn bytes_stay_distinct_from_strings() {
        let bytes = Value::Binary(b"abc".to_vec());
        let string = Value::from("abc");
        let decoded_bytes = decode_value(&encode_value(&bytes).unwrap()).unwrap();
        let decoded_string =
            decode_value(&encode_value(&string).unwrap()).unwrap();
        assert_eq!(decoded_bytes, bytes);
        assert_eq!(decoded_string, string);
        assert_ne!(decoded_bytes, decoded_string);
    }

    #[test]
    fn structs_encode_as_maps() {
        #[derive(Serialize, Deserialize, Debug, PartialEq)]
        struct Input {
            n: u32,
            label: String,
        }

        let input = Input {
            n: 7,
            label: "seven".into(),
        };
        let encoded = encode(&input).unwrap();

        // self-describing on the wire
        let raw = decode_value(&encoded).unwrap();
        let map = raw.as_map().expect("top-level value is a map");
        assert_eq!(map.len(), 2);

        // and typed on the way back in
        assert_eq!(decode::<Input>(&encoded).unwrap(), input);
        assert_eq!(from_value::<Input>(raw).unwrap(), input);
    }

    #[test]
    fn type_mismatches_fail_typed_decoding() {
        #[derive(Serialize)]
        struct Loose {
            n: &'static str,
        }
        #[derive(Deserialize, Debug)]
        struct Strict {
            #[allow(dead_code)]
            n: u32,
        }

        let encoded = encode(&Loose { n: "x" }).unwrap();
        assert!(decode::<Strict>(&encoded).is_err());
        let raw = decode_value(&encoded).unwrap();
        assert!(from_value::<Strict>(raw).is_err());
    }
}

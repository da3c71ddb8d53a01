use std::marker::PhantomData;

use rmp_serde as rmps;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{DATA_FIELD, FieldMap};
use crate::errors::{CodecError, Result};

/// MessagePack payload under [`DATA_FIELD`]. Handles exactly one type, so no tag
/// is written.
pub struct BinaryCodec<T> {
    encode: fn(&T) -> Result<Vec<u8>>,
    decode: fn(&[u8]) -> Result<T>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> BinaryCodec<T> {
    pub fn new() -> Self {
        Self {
            encode: encode_msgpack::<T>,
            decode: decode_msgpack::<T>,
            _marker: PhantomData,
        }
    }
}

impl<T: Serialize + DeserializeOwned> Default for BinaryCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BinaryCodec<T> {
    pub fn encode(&self, value: &T) -> Result<FieldMap> {
        let payload = (self.encode)(value)?;
        Ok(FieldMap::from([(DATA_FIELD.to_string(), payload)]))
    }

    pub fn decode(&self, fields: &FieldMap) -> Result<T> {
        let payload = fields.get(DATA_FIELD).ok_or(CodecError::DataDecodeFail)?;
        (self.decode)(payload)
    }
}

fn encode_msgpack<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    // Named fields keep the payload readable by other MessagePack clients.
    rmps::to_vec_named(value).map_err(|e| CodecError::EncodeFail(e.into()).into())
}

fn decode_msgpack<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    rmps::from_slice(payload).map_err(|e| CodecError::DecodeFail(e.into()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tests::{SimpleData, sample};
    use std::collections::HashMap;

    #[test]
    fn payload_is_a_msgpack_map() {
        let codec = BinaryCodec::<SimpleData>::new();
        let fields = codec.encode(&sample()).unwrap();
        assert_eq!(fields.len(), 1);

        let value: HashMap<String, serde_json::Value> =
            rmps::from_slice(&fields[DATA_FIELD]).unwrap();
        assert_eq!(value.get("id"), Some(&serde_json::json!(1234)));
        assert_eq!(value.get("message"), Some(&serde_json::json!("Hello")));
    }

    #[test]
    fn missing_payload_fails() {
        let codec = BinaryCodec::<SimpleData>::new();
        let err = codec.decode(&FieldMap::new()).unwrap_err();
        assert!(err.is_data_decode_fail());
    }

    #[test]
    fn garbage_payload_fails() {
        let codec = BinaryCodec::<SimpleData>::new();
        let fields = FieldMap::from([(DATA_FIELD.to_string(), vec![0xc1, 0x00])]);
        let err = codec.decode(&fields).unwrap_err();
        assert!(err.is_decode_fail());
    }
}

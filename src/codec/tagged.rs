use log::debug;

use super::registry::{TypeName, TypeRegistry};
use super::{DATA_FIELD, FieldMap, TYPE_FIELD};
use crate::errors::{CodecError, Result};

/// JSON payload plus a type tag, resolved through a [`TypeRegistry`].
pub struct TaggedCodec<T> {
    registry: TypeRegistry<T>,
    type_name: fn(&T) -> &'static str,
}

impl<T: TypeName> TaggedCodec<T> {
    pub fn new(registry: TypeRegistry<T>) -> Self {
        Self {
            registry,
            type_name: T::type_name,
        }
    }
}

impl<T> TaggedCodec<T> {
    pub fn registry(&self) -> &TypeRegistry<T> {
        &self.registry
    }

    pub fn encode(&self, value: &T) -> Result<FieldMap> {
        let name = (self.type_name)(value);
        let descriptor = self
            .registry
            .get(name)
            .ok_or_else(|| CodecError::TypeNotRegistered(name.to_string()))?;

        let payload = (descriptor.encode)(value).map_err(CodecError::EncodeFail)?;

        Ok(FieldMap::from([
            (TYPE_FIELD.to_string(), name.as_bytes().to_vec()),
            (DATA_FIELD.to_string(), payload.into_bytes()),
        ]))
    }

    pub fn decode(&self, fields: &FieldMap) -> Result<T> {
        let name = fields.get(TYPE_FIELD).ok_or(CodecError::TypeNameMissing)?;
        let payload = fields.get(DATA_FIELD).ok_or(CodecError::DataDecodeFail)?;

        let name = std::str::from_utf8(name).map_err(|e| CodecError::DecodeFail(e.into()))?;
        let descriptor = self.registry.get(name).ok_or_else(|| {
            debug!("Tagged payload names unknown type {}", name);
            CodecError::TypeNotRegistered(name.to_string())
        })?;

        let payload = std::str::from_utf8(payload).map_err(|e| CodecError::DecodeFail(e.into()))?;
        Ok((descriptor.decode)(payload).map_err(CodecError::DecodeFail)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tests::{SimpleData, sample};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Heartbeat {
        seq: u64,
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Simple(SimpleData),
        Heartbeat(Heartbeat),
        Unlisted,
    }

    impl From<SimpleData> for Event {
        fn from(value: SimpleData) -> Self {
            Event::Simple(value)
        }
    }

    impl From<Heartbeat> for Event {
        fn from(value: Heartbeat) -> Self {
            Event::Heartbeat(value)
        }
    }

    impl TypeName for Event {
        fn type_name(&self) -> &'static str {
            match self {
                Event::Simple(_) => "SimpleData",
                Event::Heartbeat(_) => "Heartbeat",
                Event::Unlisted => "Unlisted",
            }
        }
    }

    fn event_codec() -> TaggedCodec<Event> {
        let registry = TypeRegistry::builder()
            .register::<SimpleData>("SimpleData", |e| match e {
                Event::Simple(d) => Some(d),
                _ => None,
            })
            .register::<Heartbeat>("Heartbeat", |e| match e {
                Event::Heartbeat(h) => Some(h),
                _ => None,
            })
            .build()
            .unwrap();
        TaggedCodec::new(registry)
    }

    #[test]
    fn encode_writes_tag_and_payload() {
        let codec = event_codec();
        let fields = codec.encode(&Event::Simple(sample())).unwrap();

        assert_eq!(fields.len(), 2);
        assert_eq!(fields[TYPE_FIELD], b"SimpleData".to_vec());
        let payload: serde_json::Value = serde_json::from_slice(&fields[DATA_FIELD]).unwrap();
        assert_eq!(payload["id"], 1234);
        assert_eq!(payload["message"], "Hello");
    }

    #[test]
    fn several_types_share_one_codec() {
        let codec = event_codec();
        for event in [Event::Simple(sample()), Event::Heartbeat(Heartbeat { seq: 7 })] {
            let fields = codec.encode(&event).unwrap();
            assert_eq!(codec.decode(&fields).unwrap(), event);
        }
    }

    #[test]
    fn encode_unregistered_type_fails() {
        let err = event_codec().encode(&Event::Unlisted).unwrap_err();
        assert!(err.is_type_not_registered());
    }

    #[test]
    fn decode_without_type_name_fails() {
        let fields = FieldMap::from([(DATA_FIELD.to_string(), b"{}".to_vec())]);
        let err = event_codec().decode(&fields).unwrap_err();
        assert!(err.is_type_name_missing());
    }

    #[test]
    fn decode_without_payload_fails() {
        let fields = FieldMap::from([(TYPE_FIELD.to_string(), b"SimpleData".to_vec())]);
        let err = event_codec().decode(&fields).unwrap_err();
        assert!(err.is_data_decode_fail());
    }

    #[test]
    fn decode_unknown_type_fails() {
        let fields = FieldMap::from([
            (TYPE_FIELD.to_string(), b"Nope".to_vec()),
            (DATA_FIELD.to_string(), b"{}".to_vec()),
        ]);
        let err = event_codec().decode(&fields).unwrap_err();
        assert!(err.is_type_not_registered());
    }

    #[test]
    fn decode_malformed_payload_fails() {
        let fields = FieldMap::from([
            (TYPE_FIELD.to_string(), b"Heartbeat".to_vec()),
            (DATA_FIELD.to_string(), b"{\"seq\":\"x\"}".to_vec()),
        ]);
        let err = event_codec().decode(&fields).unwrap_err();
        assert!(err.is_decode_fail());
    }
}

//! Conversion between application values and the flat field maps stored in a
//! stream entry.
//!
//! Three codecs are available and they form a closed set, see [`Codec`]:
//!
//! - [`StructCodec`]: one field per struct member, values as plain text, weakly
//!   typed on the way back in.
//! - [`TaggedCodec`]: a type tag plus a JSON payload, resolved through a
//!   [`TypeRegistry`] so one stream can carry several message types.
//! - [`BinaryCodec`]: a single MessagePack payload for exactly one type.

pub mod binary;
pub mod registry;
pub mod structural;
pub mod tagged;

use std::collections::HashMap;

use crate::errors::Result;

pub use binary::BinaryCodec;
pub use registry::{TypeName, TypeRegistry, TypeRegistryBuilder};
pub use structural::StructCodec;
pub use tagged::TaggedCodec;

/// Wire form of one entry. Values are binary-safe, as Redis strings are.
pub type FieldMap = HashMap<String, Vec<u8>>;

/// Field holding the type tag written by [`TaggedCodec`].
pub const TYPE_FIELD: &str = "___typ";
/// Field holding the serialized payload of [`TaggedCodec`] and [`BinaryCodec`].
pub const DATA_FIELD: &str = "d";

pub enum Codec<T> {
    Struct(StructCodec<T>),
    Tagged(TaggedCodec<T>),
    Binary(BinaryCodec<T>),
}

impl<T> Codec<T> {
    /// Field-per-member codec for a serde struct.
    pub fn structural() -> Self
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        Codec::Struct(StructCodec::new())
    }

    /// Type-tagged JSON codec over the types in `registry`.
    pub fn tagged(registry: TypeRegistry<T>) -> Self
    where
        T: TypeName,
    {
        Codec::Tagged(TaggedCodec::new(registry))
    }

    /// MessagePack codec for `T`.
    pub fn binary() -> Self
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        Codec::Binary(BinaryCodec::new())
    }

    pub fn encode(&self, value: &T) -> Result<FieldMap> {
        match self {
            Codec::Struct(codec) => codec.encode(value),
            Codec::Tagged(codec) => codec.encode(value),
            Codec::Binary(codec) => codec.encode(value),
        }
    }

    pub fn decode(&self, fields: &FieldMap) -> Result<T> {
        match self {
            Codec::Struct(codec) => codec.decode(fields),
            Codec::Tagged(codec) => codec.decode(fields),
            Codec::Binary(codec) => codec.decode(fields),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Codec::Struct(_) => "struct",
            Codec::Tagged(_) => "tagged",
            Codec::Binary(_) => "binary",
        }
    }
}

impl<T> std::fmt::Debug for Codec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Codec").field(&self.name()).finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub(crate) struct SimpleData {
        pub id: i64,
        pub message: String,
    }

    impl TypeName for SimpleData {
        fn type_name(&self) -> &'static str {
            "SimpleData"
        }
    }

    pub(crate) fn sample() -> SimpleData {
        SimpleData {
            id: 1234,
            message: "Hello".to_string(),
        }
    }

    fn assert_roundtrip(codec: Codec<SimpleData>) {
        let data = sample();
        let fields = codec.encode(&data).expect("encode error");
        let decoded = codec.decode(&fields).expect("decode error");
        assert_eq!(decoded, data, "{} codec", codec.name());
    }

    #[test]
    fn struct_codec_roundtrip() {
        assert_roundtrip(Codec::structural());
    }

    #[test]
    fn tagged_codec_roundtrip() {
        let registry = TypeRegistry::builder()
            .register_self("SimpleData")
            .build()
            .expect("registry");
        assert_roundtrip(Codec::tagged(registry));
    }

    #[test]
    fn binary_codec_roundtrip() {
        assert_roundtrip(Codec::binary());
    }

    #[test]
    fn codecs_are_shareable() {
        fn assert_send_sync<V: Send + Sync>() {}
        assert_send_sync::<Codec<SimpleData>>();
    }
}

use std::fmt;
use std::marker::PhantomData;

use serde::de::{self, DeserializeSeed, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::FieldMap;
use crate::errors::{CodecError, Result};

/// One field per struct member.
///
/// The serde derive of `T` is the field schema: encoding walks the serialized
/// members, decoding is weakly typed and parses each requested primitive out of
/// its text (`"1234"` into an integer field, `"true"` or `"1"` into a bool).
/// Nested arrays and objects travel as JSON text.
pub struct StructCodec<T> {
    encode: fn(&T) -> Result<FieldMap>,
    decode: fn(&FieldMap) -> Result<T>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Serialize + de::DeserializeOwned> StructCodec<T> {
    pub fn new() -> Self {
        Self {
            encode: encode_fields::<T>,
            decode: decode_fields::<T>,
            _marker: PhantomData,
        }
    }
}

impl<T: Serialize + de::DeserializeOwned> Default for StructCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> StructCodec<T> {
    pub fn encode(&self, value: &T) -> Result<FieldMap> {
        (self.encode)(value)
    }

    pub fn decode(&self, fields: &FieldMap) -> Result<T> {
        (self.decode)(fields)
    }
}

fn encode_fields<T: Serialize>(value: &T) -> Result<FieldMap> {
    let value = serde_json::to_value(value).map_err(|e| CodecError::EncodeFail(e.into()))?;
    let Value::Object(members) = value else {
        return Err(CodecError::EncodeFail("only values with named fields can be flattened".into()).into());
    };

    let mut fields = FieldMap::with_capacity(members.len());
    for (name, member) in members {
        let text = match member {
            Value::Null => continue,
            Value::String(s) => s,
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            nested @ (Value::Array(_) | Value::Object(_)) => nested.to_string(),
        };
        fields.insert(name, text.into_bytes());
    }
    if fields.is_empty() {
        return Err(CodecError::EncodeFail("value has no members to write".into()).into());
    }
    Ok(fields)
}

fn decode_fields<T: de::DeserializeOwned>(fields: &FieldMap) -> Result<T> {
    from_fields(fields)
}

#[derive(Debug)]
struct WeakDecodeError(String);

impl fmt::Display for WeakDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for WeakDecodeError {}

impl de::Error for WeakDecodeError {
    fn custom<M: fmt::Display>(msg: M) -> Self {
        WeakDecodeError(msg.to_string())
    }
}

struct FieldsDeserializer<'a> {
    fields: &'a FieldMap,
}

impl<'a> de::Deserializer<'a> for FieldsDeserializer<'a> {
    type Error = WeakDecodeError;

    fn deserialize_any<V: Visitor<'a>>(self, visitor: V) -> std::result::Result<V::Value, Self::Error> {
        visitor.visit_map(FieldsAccess {
            iter: self.fields.iter(),
            value: None,
        })
    }

    fn deserialize_newtype_struct<V: Visitor<'a>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> std::result::Result<V::Value, Self::Error> {
        visitor.visit_newtype_struct(self)
    }

    serde::forward_to_deserialize_any! {
        <W: Visitor<'a>>
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf option unit unit_struct seq tuple tuple_struct map struct
        enum identifier ignored_any
    }
}

struct FieldsAccess<'a> {
    iter: std::collections::hash_map::Iter<'a, String, Vec<u8>>,
    value: Option<&'a [u8]>,
}

impl<'a> MapAccess<'a> for FieldsAccess<'a> {
    type Error = WeakDecodeError;

    fn next_key_seed<K: DeserializeSeed<'a>>(
        &mut self,
        seed: K,
    ) -> std::result::Result<Option<K::Value>, Self::Error> {
        match self.iter.next() {
            Some((name, value)) => {
                self.value = Some(value.as_slice());
                seed.deserialize(de::value::BorrowedStrDeserializer::new(name))
                    .map(Some)
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<V: DeserializeSeed<'a>>(
        &mut self,
        seed: V,
    ) -> std::result::Result<V::Value, Self::Error> {
        let value = self
            .value
            .take()
            .ok_or_else(|| WeakDecodeError("value requested before key".to_string()))?;
        seed.deserialize(FieldValue(value))
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

/// A single field, coerced into whatever type the visitor asks for.
struct FieldValue<'a>(&'a [u8]);

impl<'a> FieldValue<'a> {
    fn text(&self) -> std::result::Result<&'a str, WeakDecodeError> {
        std::str::from_utf8(self.0).map_err(de::Error::custom)
    }
}

macro_rules! weak_number {
    ($lt:lifetime; $($method:ident => $visit:ident($ty:ty)),* $(,)?) => {
        $(
            fn $method<V: Visitor<$lt>>(self, visitor: V) -> std::result::Result<V::Value, Self::Error> {
                let text = self.text()?.trim();
                if text.is_empty() {
                    return visitor.$visit(<$ty>::default());
                }
                let parsed = text.parse::<$ty>().map_err(|e| {
                    WeakDecodeError(format!("{text:?} is not a valid {}: {e}", stringify!($ty)))
                })?;
                visitor.$visit(parsed)
            }
        )*
    };
}

impl<'a> de::Deserializer<'a> for FieldValue<'a> {
    type Error = WeakDecodeError;

    // Self-describing targets (tagged enums, `Value`) get nested members back as JSON.
    fn deserialize_any<V: Visitor<'a>>(self, visitor: V) -> std::result::Result<V::Value, Self::Error> {
        let text = self.text()?;
        let nested = matches!(text.trim_start().as_bytes().first(), Some(b'{' | b'['));
        if nested && serde_json::from_str::<de::IgnoredAny>(text).is_ok() {
            return self.json()?.deserialize_any(visitor).map_err(de::Error::custom);
        }
        visitor.visit_borrowed_str(text)
    }

    fn deserialize_bool<V: Visitor<'a>>(self, visitor: V) -> std::result::Result<V::Value, Self::Error> {
        let text = self.text()?.trim();
        let parsed = match text.to_ascii_lowercase().as_str() {
            "true" | "t" | "1" => true,
            "false" | "f" | "0" | "" => false,
            _ => return Err(WeakDecodeError(format!("{text:?} is not a valid bool"))),
        };
        visitor.visit_bool(parsed)
    }

    weak_number! {
        'a;
        deserialize_i8 => visit_i8(i8),
        deserialize_i16 => visit_i16(i16),
        deserialize_i32 => visit_i32(i32),
        deserialize_i64 => visit_i64(i64),
        deserialize_i128 => visit_i128(i128),
        deserialize_u8 => visit_u8(u8),
        deserialize_u16 => visit_u16(u16),
        deserialize_u32 => visit_u32(u32),
        deserialize_u64 => visit_u64(u64),
        deserialize_u128 => visit_u128(u128),
        deserialize_f32 => visit_f32(f32),
        deserialize_f64 => visit_f64(f64),
    }

    fn deserialize_char<V: Visitor<'a>>(self, visitor: V) -> std::result::Result<V::Value, Self::Error> {
        let text = self.text()?;
        let mut chars = text.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => visitor.visit_char(c),
            _ => Err(WeakDecodeError(format!("{text:?} is not a single character"))),
        }
    }

    fn deserialize_str<V: Visitor<'a>>(self, visitor: V) -> std::result::Result<V::Value, Self::Error> {
        visitor.visit_borrowed_str(self.text()?)
    }

    fn deserialize_string<V: Visitor<'a>>(self, visitor: V) -> std::result::Result<V::Value, Self::Error> {
        self.deserialize_str(visitor)
    }

    fn deserialize_bytes<V: Visitor<'a>>(self, visitor: V) -> std::result::Result<V::Value, Self::Error> {
        visitor.visit_borrowed_bytes(self.0)
    }

    fn deserialize_byte_buf<V: Visitor<'a>>(self, visitor: V) -> std::result::Result<V::Value, Self::Error> {
        visitor.visit_borrowed_bytes(self.0)
    }

    // A present field is always `Some`; absent fields become `None` through serde's
    // missing-field handling.
    fn deserialize_option<V: Visitor<'a>>(self, visitor: V) -> std::result::Result<V::Value, Self::Error> {
        visitor.visit_some(self)
    }

    fn deserialize_unit<V: Visitor<'a>>(self, visitor: V) -> std::result::Result<V::Value, Self::Error> {
        visitor.visit_unit()
    }

    fn deserialize_unit_struct<V: Visitor<'a>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> std::result::Result<V::Value, Self::Error> {
        visitor.visit_unit()
    }

    fn deserialize_newtype_struct<V: Visitor<'a>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> std::result::Result<V::Value, Self::Error> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'a>>(self, visitor: V) -> std::result::Result<V::Value, Self::Error> {
        self.json()?.deserialize_seq(visitor).map_err(de::Error::custom)
    }

    fn deserialize_tuple<V: Visitor<'a>>(
        self,
        len: usize,
        visitor: V,
    ) -> std::result::Result<V::Value, Self::Error> {
        self.json()?.deserialize_tuple(len, visitor).map_err(de::Error::custom)
    }

    fn deserialize_tuple_struct<V: Visitor<'a>>(
        self,
        name: &'static str,
        len: usize,
        visitor: V,
    ) -> std::result::Result<V::Value, Self::Error> {
        self.json()?
            .deserialize_tuple_struct(name, len, visitor)
            .map_err(de::Error::custom)
    }

    fn deserialize_map<V: Visitor<'a>>(self, visitor: V) -> std::result::Result<V::Value, Self::Error> {
        self.json()?.deserialize_map(visitor).map_err(de::Error::custom)
    }

    fn deserialize_struct<V: Visitor<'a>>(
        self,
        name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> std::result::Result<V::Value, Self::Error> {
        self.json()?
            .deserialize_struct(name, fields, visitor)
            .map_err(de::Error::custom)
    }

    fn deserialize_enum<V: Visitor<'a>>(
        self,
        name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> std::result::Result<V::Value, Self::Error> {
        let text = self.text()?;
        if text.trim_start().starts_with('{') {
            return self
                .json()?
                .deserialize_enum(name, variants, visitor)
                .map_err(de::Error::custom);
        }
        // Unit variants are written as their bare name.
        visitor.visit_enum(de::value::BorrowedStrDeserializer::<WeakDecodeError>::new(text))
    }

    fn deserialize_identifier<V: Visitor<'a>>(self, visitor: V) -> std::result::Result<V::Value, Self::Error> {
        self.deserialize_str(visitor)
    }

    fn deserialize_ignored_any<V: Visitor<'a>>(self, visitor: V) -> std::result::Result<V::Value, Self::Error> {
        visitor.visit_unit()
    }
}

impl<'a> FieldValue<'a> {
    fn json(&self) -> std::result::Result<JsonText<'a>, WeakDecodeError> {
        Ok(JsonText(serde_json::Deserializer::from_str(self.text()?)))
    }
}

/// Nested value stored as JSON text inside one field.
struct JsonText<'a>(serde_json::Deserializer<serde_json::de::StrRead<'a>>);

impl<'a> JsonText<'a> {
    fn finish<T>(mut self, value: serde_json::Result<T>) -> serde_json::Result<T> {
        let value = value?;
        self.0.end()?;
        Ok(value)
    }

    fn deserialize_any<V: Visitor<'a>>(mut self, visitor: V) -> serde_json::Result<V::Value> {
        let value = de::Deserializer::deserialize_any(&mut self.0, visitor);
        self.finish(value)
    }

    fn deserialize_seq<V: Visitor<'a>>(mut self, visitor: V) -> serde_json::Result<V::Value> {
        let value = de::Deserializer::deserialize_seq(&mut self.0, visitor);
        self.finish(value)
    }

    fn deserialize_tuple<V: Visitor<'a>>(mut self, len: usize, visitor: V) -> serde_json::Result<V::Value> {
        let value = de::Deserializer::deserialize_tuple(&mut self.0, len, visitor);
        self.finish(value)
    }

    fn deserialize_tuple_struct<V: Visitor<'a>>(
        mut self,
        name: &'static str,
        len: usize,
        visitor: V,
    ) -> serde_json::Result<V::Value> {
        let value = de::Deserializer::deserialize_tuple_struct(&mut self.0, name, len, visitor);
        self.finish(value)
    }

    fn deserialize_map<V: Visitor<'a>>(mut self, visitor: V) -> serde_json::Result<V::Value> {
        let value = de::Deserializer::deserialize_map(&mut self.0, visitor);
        self.finish(value)
    }

    fn deserialize_struct<V: Visitor<'a>>(
        mut self,
        name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> serde_json::Result<V::Value> {
        let value = de::Deserializer::deserialize_struct(&mut self.0, name, fields, visitor);
        self.finish(value)
    }

    fn deserialize_enum<V: Visitor<'a>>(
        mut self,
        name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> serde_json::Result<V::Value> {
        let value = de::Deserializer::deserialize_enum(&mut self.0, name, variants, visitor);
        self.finish(value)
    }
}

/// Weakly decodes a single field map into `T` without building a codec.
pub fn from_fields<'a, T: Deserialize<'a>>(fields: &'a FieldMap) -> Result<T> {
    T::deserialize(FieldsDeserializer { fields })
        .map_err(|e| CodecError::DecodeFail(e.into()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tests::{SimpleData, sample};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    enum Level {
        Low,
        High,
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Reading {
        sensor: String,
        value: f64,
        active: bool,
        level: Level,
        tags: Vec<String>,
        offset: Option<i32>,
        note: Option<String>,
    }

    fn text_fields(pairs: &[(&str, &str)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn encode_flattens_members_to_text() {
        let fields = StructCodec::<SimpleData>::new().encode(&sample()).unwrap();
        assert_eq!(fields, text_fields(&[("id", "1234"), ("message", "Hello")]));
    }

    #[test]
    fn nested_and_optional_members_roundtrip() {
        let codec = StructCodec::<Reading>::new();
        let reading = Reading {
            sensor: "t-01".to_string(),
            value: 21.5,
            active: true,
            level: Level::High,
            tags: vec!["a".to_string(), "b".to_string()],
            offset: Some(-3),
            note: None,
        };

        let fields = codec.encode(&reading).unwrap();
        assert_eq!(fields["tags"], br#"["a","b"]"#.to_vec());
        assert_eq!(fields["level"], b"High".to_vec());
        assert!(!fields.contains_key("note"));

        assert_eq!(codec.decode(&fields).unwrap(), reading);
    }

    #[test]
    fn decode_is_weakly_typed() {
        let fields = text_fields(&[
            ("sensor", "1234"),
            ("value", " 7 "),
            ("active", "1"),
            ("level", "Low"),
            ("tags", "[]"),
            ("offset", ""),
            ("extra", "ignored"),
        ]);
        let reading: Reading = StructCodec::new().decode(&fields).unwrap();
        assert_eq!(reading.sensor, "1234");
        assert_eq!(reading.value, 7.0);
        assert!(reading.active);
        assert_eq!(reading.level, Level::Low);
        assert_eq!(reading.offset, Some(0));
        assert_eq!(reading.note, None);
    }

    #[test]
    fn unconvertible_value_fails() {
        let fields = text_fields(&[("id", "twelve"), ("message", "Hello")]);
        let err = StructCodec::<SimpleData>::new().decode(&fields).unwrap_err();
        assert!(err.is_decode_fail());
    }

    #[test]
    fn missing_required_member_fails() {
        let fields = text_fields(&[("id", "1")]);
        let err = StructCodec::<SimpleData>::new().decode(&fields).unwrap_err();
        assert!(err.is_decode_fail());
    }

    #[test]
    fn non_struct_values_cannot_be_flattened() {
        let err = StructCodec::<Vec<u32>>::new().encode(&vec![1, 2]).unwrap_err();
        assert!(err.is_codec());
        assert!(!err.is_decode_fail());
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Wide {
        big: i128,
        small: u128,
    }

    #[test]
    fn wide_integers_roundtrip() {
        let codec = StructCodec::<Wide>::new();
        let wide = Wide {
            big: i64::MIN as i128,
            small: u64::MAX as u128,
        };
        let fields = codec.encode(&wide).unwrap();
        assert_eq!(codec.decode(&fields).unwrap(), wide);
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "kind")]
    enum Shape {
        Circle { r: u32 },
        Square { side: u32 },
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Drawing {
        name: String,
        shape: Shape,
        extra: Value,
    }

    #[test]
    fn self_describing_members_roundtrip() {
        let codec = StructCodec::<Drawing>::new();
        let drawing = Drawing {
            name: "{not json".to_string(),
            shape: Shape::Circle { r: 2 },
            extra: serde_json::json!({"layers": [1, 2]}),
        };
        let fields = codec.encode(&drawing).unwrap();
        assert_eq!(codec.decode(&fields).unwrap(), drawing);

        let square = text_fields(&[
            ("name", "sq"),
            ("shape", r#"{"kind":"Square","side":3}"#),
            ("extra", "plain"),
        ]);
        let decoded = codec.decode(&square).unwrap();
        assert_eq!(decoded.shape, Shape::Square { side: 3 });
        assert_eq!(decoded.extra, Value::String("plain".to_string()));
    }

    #[test]
    fn value_without_members_is_rejected() {
        #[derive(Serialize, Deserialize)]
        struct Sparse {
            note: Option<String>,
        }
        let err = StructCodec::<Sparse>::new()
            .encode(&Sparse { note: None })
            .unwrap_err();
        assert!(matches!(err.codec_error(), Some(CodecError::EncodeFail(_))));
    }

    #[test]
    fn from_fields_borrows_text() {
        #[derive(Deserialize)]
        struct View<'a> {
            message: &'a str,
        }
        let fields = text_fields(&[("message", "Hello")]);
        let view: View<'_> = from_fields(&fields).unwrap();
        assert_eq!(view.message, "Hello");
    }
}

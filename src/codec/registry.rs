use std::collections::HashMap;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::errors::{BoxError, CodecError, Result};

/// Stable name of a value's concrete type, as written into the type tag.
///
/// For an enum carrying several message types, return the name of the variant's
/// payload type so that it matches the name it was registered under.
pub trait TypeName {
    fn type_name(&self) -> &'static str;
}

type EncodeFn<T> = Box<dyn Fn(&T) -> std::result::Result<String, BoxError> + Send + Sync>;
type DecodeFn<T> = Box<dyn Fn(&str) -> std::result::Result<T, BoxError> + Send + Sync>;

pub(crate) struct TypeDescriptor<T> {
    pub(crate) encode: EncodeFn<T>,
    pub(crate) decode: DecodeFn<T>,
}

/// Immutable mapping from a type name to the functions that serialize and
/// rebuild values of that type.
pub struct TypeRegistry<T> {
    types: HashMap<String, TypeDescriptor<T>>,
}

impl<T: 'static> TypeRegistry<T> {
    pub fn builder() -> TypeRegistryBuilder<T> {
        TypeRegistryBuilder { types: Vec::new() }
    }
}

impl<T> TypeRegistry<T> {
    pub(crate) fn get(&self, name: &str) -> Option<&TypeDescriptor<T>> {
        self.types.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

pub struct TypeRegistryBuilder<T> {
    types: Vec<(String, TypeDescriptor<T>)>,
}

impl<T: 'static> TypeRegistryBuilder<T> {
    /// Registers `name` with explicit encode/decode functions.
    pub fn register_with<E, D>(mut self, name: impl Into<String>, encode: E, decode: D) -> Self
    where
        E: Fn(&T) -> std::result::Result<String, BoxError> + Send + Sync + 'static,
        D: Fn(&str) -> std::result::Result<T, BoxError> + Send + Sync + 'static,
    {
        self.types.push((
            name.into(),
            TypeDescriptor {
                encode: Box::new(encode),
                decode: Box::new(decode),
            },
        ));
        self
    }

    /// Registers `T` itself, serialized as JSON.
    pub fn register_self(self, name: impl Into<String>) -> Self
    where
        T: Serialize + DeserializeOwned,
    {
        self.register_with(
            name,
            |value: &T| serde_json::to_string(value).map_err(Into::into),
            |payload: &str| serde_json::from_str::<T>(payload).map_err(Into::into),
        )
    }

    /// Registers a payload type `U` carried inside `T`.
    ///
    /// `project` extracts the `U` from a `T` on encode; decoding builds the `T`
    /// back through `From<U>`.
    pub fn register<U>(self, name: impl Into<String>, project: fn(&T) -> Option<&U>) -> Self
    where
        U: Serialize + DeserializeOwned + Into<T> + 'static,
    {
        let name = name.into();
        let expected = name.clone();
        self.register_with(
            name,
            move |value: &T| match project(value) {
                Some(inner) => serde_json::to_string(inner).map_err(Into::into),
                None => Err(format!("value is not a {expected}").into()),
            },
            |payload: &str| {
                serde_json::from_str::<U>(payload)
                    .map(Into::into)
                    .map_err(Into::into)
            },
        )
    }

    pub fn build(self) -> Result<TypeRegistry<T>> {
        if self.types.is_empty() {
            return Err(CodecError::EmptyRegistry.into());
        }

        let mut types = HashMap::with_capacity(self.types.len());
        for (name, descriptor) in self.types {
            if types.contains_key(&name) {
                return Err(CodecError::DuplicateType(name).into());
            }
            types.insert(name, descriptor);
        }
        Ok(TypeRegistry { types })
    }
}

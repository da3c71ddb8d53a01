use std::collections::HashMap;

use crate::errors::{ConfigError, Result};

/// The subscribed keys in order, with constant-time lookup of a key's position.
#[derive(Debug, Clone)]
pub struct KeyIndex {
    keys: Vec<String>,
    positions: HashMap<String, usize>,
}

impl KeyIndex {
    /// Fails with [`ConfigError::DuplicateStreamKey`] if a key appears twice.
    pub fn new<I, S>(keys: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        let mut positions = HashMap::with_capacity(keys.len());
        for (idx, key) in keys.iter().enumerate() {
            if positions.insert(key.clone(), idx).is_some() {
                return Err(ConfigError::DuplicateStreamKey(key.clone()).into());
            }
        }
        Ok(Self { keys, positions })
    }

    pub fn index_of(&self, key: &str) -> Option<usize> {
        self.positions.get(key).copied()
    }

    pub fn key_at(&self, index: usize) -> Option<&str> {
        self.keys.get(index).map(String::as_str)
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_follow_input_order() {
        let index = KeyIndex::new(["a", "b", "c"]).unwrap();
        assert_eq!(index.index_of("a"), Some(0));
        assert_eq!(index.index_of("c"), Some(2));
        assert_eq!(index.index_of("z"), None);
        assert_eq!(index.key_at(1), Some("b"));
        assert_eq!(index.key_at(3), None);
        assert_eq!(index.keys(), ["a", "b", "c"]);
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let err = KeyIndex::new(["a", "b", "a"]).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("duplicate stream key: a"));
    }
}

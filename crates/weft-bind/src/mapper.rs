//! Conversion between domain objects and store entries.

use crate::error::{BindError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use weft_store::{CrdtFactory, Entry};

/// Converts collection elements to and from their stored form.
///
/// `to_crdt` may build detached collections through `factory`; the binding
/// attaches them when it stores the entry.
pub trait CrdtMapper<T>: Send + Sync {
    fn from_crdt(&self, entry: &Entry) -> Result<T>;
    fn to_crdt(&self, value: &T, factory: &dyn CrdtFactory) -> Result<Entry>;
}

/// Stores elements as plain values through serde.
pub struct ValueMapper<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> ValueMapper<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for ValueMapper<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Serialize + DeserializeOwned> CrdtMapper<T> for ValueMapper<T> {
    fn from_crdt(&self, entry: &Entry) -> Result<T> {
        match entry {
            Entry::Value(value) => value
                .to_serde()
                .map_err(|e| BindError::decode("element", e)),
            _ => Err(BindError::decode(
                "element",
                "expected a value, found a nested collection",
            )),
        }
    }

    fn to_crdt(&self, value: &T, _factory: &dyn CrdtFactory) -> Result<Entry> {
        Ok(Entry::Value(weft_store::Value::from_serde(value)?))
    }
}

/// Change to a keyed collection, delivered after the binding's cache has
/// been updated.
#[derive(Clone, Debug, PartialEq)]
pub enum CollectionEvent<T> {
    Added { key: String, value: T },
    Updated { key: String, value: T },
    Removed { key: String },
    /// The order of an ordered collection changed.
    Reordered,
    /// The backing collection was swapped; everything may have changed.
    Reset,
}

/// Change to an index-ordered list binding.
#[derive(Clone, Debug, PartialEq)]
pub enum SequenceEvent<T> {
    Inserted { index: usize, values: Vec<T> },
    Removed { index: usize, count: usize },
    Reset,
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_store::{NoopFactory, Value};

    #[test]
    fn test_value_mapper() {
        let mapper: ValueMapper<Vec<String>> = ValueMapper::new();
        let entry = mapper
            .to_crdt(&vec!["a".to_string()], &NoopFactory)
            .unwrap();
        assert_eq!(
            entry,
            Entry::Value(Value::Array(vec![Value::from("a")]))
        );
        assert_eq!(mapper.from_crdt(&entry).unwrap(), vec!["a".to_string()]);
        assert!(mapper
            .from_crdt(&Entry::Value(Value::Int(3)))
            .is_err());
    }
}

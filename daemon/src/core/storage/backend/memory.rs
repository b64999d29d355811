use std::collections::BTreeMap;

use bytes::Bytes;
use log::trace;

use super::{prefixed_key, StorageBackend, WriteBatch};
use crate::core::{error::BlockchainError, storage::Column};

/// In memory backend, used by tests and ephemeral nodes.
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    entries: BTreeMap<Bytes, Bytes>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // Full content, including the column prefix of every key
    pub fn dump(&self) -> Vec<(Bytes, Bytes)> {
        self.entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Bytes>, BlockchainError> {
        Ok(self.entries.get(prefixed_key(column, key).as_slice()).cloned())
    }

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<Vec<(Bytes, Bytes)>, BlockchainError> {
        let start = prefixed_key(column, prefix);
        let entries = self
            .entries
            .range::<[u8], _>((std::ops::Bound::Included(start.as_slice()), std::ops::Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(&start))
            .map(|(k, v)| (k.slice(1..), v.clone()))
            .collect();
        Ok(entries)
    }

    fn write_batch(&mut self, batch: WriteBatch) -> Result<(), BlockchainError> {
        if log::log_enabled!(log::Level::Trace) {
            trace!("memory backend write batch of {} entries", batch.len());
        }

        for (column, key, value) in batch {
            let key = Bytes::from(prefixed_key(column, &key));
            match value {
                Some(value) => {
                    self.entries.insert(key, value);
                }
                None => {
                    self.entries.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), BlockchainError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_columns_are_isolated() {
        let mut backend = MemoryBackend::new();
        backend
            .write_batch(vec![
                (Column::Tokens, Bytes::from_static(b"k1"), Some(Bytes::from_static(b"a"))),
                (Column::Tokens, Bytes::from_static(b"k2"), Some(Bytes::from_static(b"b"))),
                (Column::Oracles, Bytes::from_static(b"k1"), Some(Bytes::from_static(b"c"))),
            ])
            .unwrap();

        let tokens = backend.scan_prefix(Column::Tokens, b"k").unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].0, Bytes::from_static(b"k1"));
        assert_eq!(
            backend.get(Column::Oracles, b"k1").unwrap(),
            Some(Bytes::from_static(b"c"))
        );

        backend
            .write_batch(vec![(Column::Tokens, Bytes::from_static(b"k1"), None)])
            .unwrap();
        assert_eq!(backend.get(Column::Tokens, b"k1").unwrap(), None);
        assert_eq!(backend.len(), 2);
    }
}

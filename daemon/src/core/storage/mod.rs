mod backend;
mod cache;
mod column;
mod providers;
mod undo;

pub mod snapshot;

use std::collections::BTreeMap;

use bytes::Bytes;
use log::trace;
use tessera_common::serializer::Serializer;

pub use self::{
    backend::{MemoryBackend, SledBackend, StorageBackend, WriteBatch},
    cache::StorageCache,
    column::*,
    providers::*,
    undo::UndoRecord,
};

use self::snapshot::{EntryState, Snapshot};

/// Provider traits, for callers holding a concrete `ChainStore`.
pub mod prelude {
    pub use super::{providers::*, Storage};
}
use crate::{config::DEFAULT_CACHE_SIZE, core::error::BlockchainError};

/// Every typed view of the chain state.
pub trait Storage:
    SnapshotProvider
    + JournalProvider
    + TokenProvider
    + BalanceProvider
    + PoolProvider
    + OracleProvider
    + LoanProvider
    + VaultProvider
    + AuctionProvider
    + GovernanceProvider
    + MasternodeProvider
    + EvmProvider
    + AttributeProvider
    + HistoryProvider
{
}

impl<B: StorageBackend> Storage for ChainStore<B> {}

/// Typed chain state over a physical backend.
///
/// Writes are staged in a stack of snapshots. The outermost one spans a block
/// and is committed together with its undo record, nested ones give every
/// custom transaction all-or-nothing semantics.
pub struct ChainStore<B: StorageBackend> {
    backend: B,
    snapshots: Vec<Snapshot<Column>>,
    // Height of the block currently staged, if any
    journal_height: Option<u32>,
    cache: StorageCache,
}

impl<B: StorageBackend> ChainStore<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            snapshots: Vec::new(),
            journal_height: None,
            cache: StorageCache::new(DEFAULT_CACHE_SIZE),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub(crate) fn cache(&self) -> &StorageCache {
        &self.cache
    }

    // Staged state of a key, walking snapshots from the newest
    fn staged(&self, column: Column, key: &[u8]) -> EntryState<&Bytes> {
        for snapshot in self.snapshots.iter().rev() {
            match snapshot.get(column, key) {
                EntryState::Absent => continue,
                state => return state,
            }
        }
        EntryState::Absent
    }

    // Value of a key as seen before the innermost snapshot was opened
    pub(crate) fn load_raw_below_top(&self, column: Column, key: &[u8]) -> Result<Option<Bytes>, BlockchainError> {
        let depth = self.snapshots.len().saturating_sub(1);
        for snapshot in self.snapshots[..depth].iter().rev() {
            match snapshot.get(column, key) {
                EntryState::Stored(v) => return Ok(Some(v.clone())),
                EntryState::Deleted => return Ok(None),
                EntryState::Absent => continue,
            }
        }
        self.backend.get(column, key)
    }

    pub(crate) fn is_staged(&self, column: Column, key: &[u8]) -> bool {
        !self.staged(column, key).is_absent()
    }

    pub fn load_raw(&self, column: Column, key: &[u8]) -> Result<Option<Bytes>, BlockchainError> {
        match self.staged(column, key) {
            EntryState::Stored(v) => Ok(Some(v.clone())),
            EntryState::Deleted => Ok(None),
            EntryState::Absent => self.backend.get(column, key),
        }
    }

    pub fn load_optional_from_disk<K: AsRef<[u8]> + ?Sized, V: Serializer>(
        &self,
        column: Column,
        key: &K,
    ) -> Result<Option<V>, BlockchainError> {
        if log::log_enabled!(log::Level::Trace) {
            trace!("load optional {:?} from disk", column);
        }

        match self.load_raw(column, key.as_ref())? {
            Some(bytes) => Ok(Some(V::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn load_from_disk<K: AsRef<[u8]> + ?Sized, V: Serializer>(
        &self,
        column: Column,
        key: &K,
    ) -> Result<V, BlockchainError> {
        self.load_optional_from_disk(column, key)?
            .ok_or(BlockchainError::NotFoundOnDisk(column))
    }

    pub fn contains_data<K: AsRef<[u8]> + ?Sized>(&self, column: Column, key: &K) -> Result<bool, BlockchainError> {
        Ok(self.load_raw(column, key.as_ref())?.is_some())
    }

    pub fn insert_raw<K: Into<Vec<u8>>>(&mut self, column: Column, key: K, value: Vec<u8>) -> Result<(), BlockchainError> {
        if log::log_enabled!(log::Level::Trace) {
            trace!("insert into {:?}", column);
        }

        let key = Bytes::from(key.into());
        match self.snapshots.last_mut() {
            Some(snapshot) => {
                snapshot.put(column, key, value);
            }
            None => self.backend.write_batch(vec![(column, key, Some(Bytes::from(value)))])?,
        }
        Ok(())
    }

    pub fn insert_into_disk<K: Into<Vec<u8>>, V: Serializer>(
        &mut self,
        column: Column,
        key: K,
        value: &V,
    ) -> Result<(), BlockchainError> {
        self.insert_raw(column, key, value.to_bytes())
    }

    pub fn remove_from_disk<K: Into<Vec<u8>>>(&mut self, column: Column, key: K) -> Result<(), BlockchainError> {
        if log::log_enabled!(log::Level::Trace) {
            trace!("remove from {:?}", column);
        }

        let key = Bytes::from(key.into());
        match self.snapshots.last_mut() {
            Some(snapshot) => {
                snapshot.delete(column, key);
            }
            None => self.backend.write_batch(vec![(column, key, None)])?,
        }
        Ok(())
    }

    // Merged view of backend and staged writes, in key order
    pub fn scan_prefix_raw(&self, column: Column, prefix: &[u8]) -> Result<Vec<(Bytes, Bytes)>, BlockchainError> {
        let mut merged: BTreeMap<Bytes, Bytes> = self.backend.scan_prefix(column, prefix)?.into_iter().collect();
        for snapshot in &self.snapshots {
            if let Some(changes) = snapshot.changes(column) {
                for (key, value) in changes.with_prefix(prefix) {
                    match value {
                        Some(value) => {
                            merged.insert(key.clone(), value.clone());
                        }
                        None => {
                            merged.remove(key);
                        }
                    }
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    pub fn scan_prefix<V: Serializer>(&self, column: Column, prefix: &[u8]) -> Result<Vec<(Bytes, V)>, BlockchainError> {
        self.scan_prefix_raw(column, prefix)?
            .into_iter()
            .map(|(k, v)| Ok((k, V::from_bytes(&v)?)))
            .collect()
    }

    pub fn flush(&mut self) -> Result<(), BlockchainError> {
        self.backend.flush()
    }
}

impl ChainStore<MemoryBackend> {
    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_merges_snapshots() {
        let mut store = ChainStore::in_memory();
        store.insert_into_disk(Column::Meta, b"a1".to_vec(), &1u32).unwrap();
        store.insert_into_disk(Column::Meta, b"a2".to_vec(), &2u32).unwrap();

        store.start_snapshot().unwrap();
        store.remove_from_disk(Column::Meta, b"a1".to_vec()).unwrap();
        store.insert_into_disk(Column::Meta, b"a3".to_vec(), &3u32).unwrap();

        let values: Vec<u32> = store
            .scan_prefix::<u32>(Column::Meta, b"a")
            .unwrap()
            .into_iter()
            .map(|(_, v)| v)
            .collect();
        assert_eq!(values, vec![2, 3]);

        store.end_snapshot(false).unwrap();
        let values = store.scan_prefix::<u32>(Column::Meta, b"a").unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].1, 1);
    }

    #[test]
    fn test_load_missing_is_error() {
        let store = ChainStore::in_memory();
        let res: Result<u32, _> = store.load_from_disk(Column::Meta, b"missing");
        assert!(matches!(res, Err(BlockchainError::NotFoundOnDisk(Column::Meta))));
    }
}

use std::path::Path;

use anyhow::Context;
use bytes::Bytes;
use log::{debug, trace};
use tessera_common::config::VERSION;

use super::{prefixed_key, StorageBackend, WriteBatch};
use crate::core::{error::BlockchainError, storage::Column};

const STATE_TREE: &str = "state";
const DB_VERSION: &[u8] = b"db_version";

/// Disk backend, one sled tree holding every column.
pub struct SledBackend {
    db: sled::Db,
    state: sled::Tree,
}

impl SledBackend {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, BlockchainError> {
        let path = path.as_ref();
        debug!("opening sled backend at {}", path.display());
        let db = sled::open(path).with_context(|| format!("Error while opening database at {}", path.display()))?;
        let state = db
            .open_tree(STATE_TREE)
            .context("Error while opening state tree")?;

        let backend = Self { db, state };
        backend.handle_migrations()?;
        Ok(backend)
    }

    fn handle_migrations(&self) -> Result<(), BlockchainError> {
        debug!("set DB version to {}", VERSION);
        self.db
            .insert(DB_VERSION, VERSION.as_bytes())
            .context("Error while writing DB version")?;
        Ok(())
    }

    pub fn size_on_disk(&self) -> Result<u64, BlockchainError> {
        Ok(self.db.size_on_disk().context("Error while reading size on disk")?)
    }
}

impl StorageBackend for SledBackend {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Bytes>, BlockchainError> {
        if log::log_enabled!(log::Level::Trace) {
            trace!("sled get {:?}", column);
        }
        let value = self
            .state
            .get(prefixed_key(column, key))
            .with_context(|| format!("Internal error while reading column {:?}", column))?;
        Ok(value.map(|v| Bytes::copy_from_slice(&v)))
    }

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<Vec<(Bytes, Bytes)>, BlockchainError> {
        let mut entries = Vec::new();
        for res in self.state.scan_prefix(prefixed_key(column, prefix)) {
            let (key, value) = res.with_context(|| format!("Internal error while iterating column {:?}", column))?;
            entries.push((Bytes::copy_from_slice(&key[1..]), Bytes::copy_from_slice(&value)));
        }
        Ok(entries)
    }

    fn write_batch(&mut self, batch: WriteBatch) -> Result<(), BlockchainError> {
        if log::log_enabled!(log::Level::Trace) {
            trace!("sled write batch of {} entries", batch.len());
        }

        let mut sled_batch = sled::Batch::default();
        for (column, key, value) in batch {
            let key = prefixed_key(column, &key);
            match value {
                Some(value) => sled_batch.insert(key, value.as_ref()),
                None => sled_batch.remove(key),
            }
        }
        self.state
            .apply_batch(sled_batch)
            .context("Error while applying write batch")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), BlockchainError> {
        self.db.flush().context("Error while flushing database")?;
        Ok(())
    }
}

mod memory;
mod sled;

use bytes::Bytes;

use super::Column;
use crate::core::error::BlockchainError;

pub use self::{memory::MemoryBackend, sled::SledBackend};

// (column, key, value) where `None` deletes the key
pub type WriteBatch = Vec<(Column, Bytes, Option<Bytes>)>;

/// Physical key value store underneath the typed views.
///
/// Keys are namespaced by the column prefix byte, iteration follows the byte
/// order of the keys.
pub trait StorageBackend {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Bytes>, BlockchainError>;

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<Vec<(Bytes, Bytes)>, BlockchainError>;

    // Applied atomically
    fn write_batch(&mut self, batch: WriteBatch) -> Result<(), BlockchainError>;

    fn flush(&mut self) -> Result<(), BlockchainError>;
}

pub(super) fn prefixed_key(column: Column, key: &[u8]) -> Vec<u8> {
    let mut full = Vec::with_capacity(1 + key.len());
    full.push(column.prefix());
    full.extend_from_slice(key);
    full
}

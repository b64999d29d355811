use bytes::Bytes;
use log::{debug, info, trace};
use tessera_common::serializer::Serializer;

use crate::core::{
    error::BlockchainError,
    storage::{snapshot::Snapshot, ChainStore, Column, StorageBackend, UndoRecord, WriteBatch},
};

const TIP_HEIGHT: &[u8] = b"tip_height";
const TIP_TIME: &[u8] = b"tip_time";

/// Block scoped change journal.
pub trait JournalProvider {
    // Height of the last committed block
    fn get_tip_height(&self) -> Result<Option<u32>, BlockchainError>;

    // Height of the block being applied
    fn get_journal_height(&self) -> Option<u32>;

    // Median time of the last committed block
    fn get_tip_time(&self) -> Result<Option<i64>, BlockchainError>;

    // Staged with the block, so a rewind restores the previous time
    fn set_tip_time(&mut self, time: i64) -> Result<(), BlockchainError>;

    // Open the outermost snapshot for a block
    fn begin_block(&mut self, height: u32) -> Result<(), BlockchainError>;

    // Commit the block together with its undo record
    fn commit_block(&mut self) -> Result<(), BlockchainError>;

    // Drop every staged write of the block
    fn discard_block(&mut self) -> Result<(), BlockchainError>;

    // Restore the state as it was right after `height` was committed
    // Returns the number of blocks undone, repeated calls are no-ops
    fn rewind_to(&mut self, height: u32) -> Result<u32, BlockchainError>;
}

impl<B: StorageBackend> ChainStore<B> {
    fn build_undo_record(&self, snapshot: &Snapshot<Column>) -> Result<UndoRecord, BlockchainError> {
        let mut entries = Vec::new();
        for column in snapshot.columns() {
            if !column.is_journaled() {
                continue;
            }
            if let Some(changes) = snapshot.changes(column) {
                for key in changes.keys() {
                    let previous = self.backend.get(column, key)?;
                    entries.push((column, key.clone(), previous));
                }
            }
        }
        Ok(UndoRecord { entries })
    }
}

impl<B: StorageBackend> JournalProvider for ChainStore<B> {
    fn get_tip_height(&self) -> Result<Option<u32>, BlockchainError> {
        match self.backend.get(Column::Meta, TIP_HEIGHT)? {
            Some(bytes) => {
                let mut raw = [0u8; 4];
                if bytes.len() != 4 {
                    return Err(BlockchainError::InvalidState("Corrupted tip height".to_owned()));
                }
                raw.copy_from_slice(&bytes);
                Ok(Some(u32::from_be_bytes(raw)))
            }
            None => Ok(None),
        }
    }

    fn get_journal_height(&self) -> Option<u32> {
        self.journal_height
    }

    fn get_tip_time(&self) -> Result<Option<i64>, BlockchainError> {
        self.load_optional_from_disk(Column::Meta, TIP_TIME)
    }

    fn set_tip_time(&mut self, time: i64) -> Result<(), BlockchainError> {
        if self.journal_height.is_none() {
            return Err(BlockchainError::InvalidState("No block is being applied".to_owned()));
        }
        self.insert_into_disk(Column::Meta, TIP_TIME, &time)
    }

    fn begin_block(&mut self, height: u32) -> Result<(), BlockchainError> {
        if !self.snapshots.is_empty() {
            return Err(BlockchainError::InvalidState(
                "Cannot begin a block while a snapshot is open".to_owned(),
            ));
        }

        trace!("begin block {}", height);
        self.snapshots.push(Snapshot::new());
        self.journal_height = Some(height);
        Ok(())
    }

    fn commit_block(&mut self) -> Result<(), BlockchainError> {
        let height = self
            .journal_height
            .ok_or_else(|| BlockchainError::InvalidState("No block to commit".to_owned()))?;
        if self.snapshots.len() != 1 {
            return Err(BlockchainError::InvalidState(format!(
                "Cannot commit block {} with {} open snapshots",
                height,
                self.snapshots.len()
            )));
        }

        let mut snapshot = self
            .snapshots
            .pop()
            .ok_or_else(|| BlockchainError::InvalidState("No block to commit".to_owned()))?;
        // the tip itself is journaled so that undoing a block restores the previous one
        snapshot.put(Column::Meta, Bytes::from_static(TIP_HEIGHT), height.to_be_bytes().to_vec());
        let undo = self.build_undo_record(&snapshot)?;
        debug!("committing block {} with {} journaled writes", height, undo.len());

        let mut batch: WriteBatch = snapshot.into_writes();
        batch.push((
            Column::Undo,
            Bytes::copy_from_slice(&height.to_be_bytes()),
            Some(Bytes::from(undo.to_bytes())),
        ));

        self.backend.write_batch(batch)?;
        self.journal_height = None;
        self.cache.clear();
        Ok(())
    }

    fn discard_block(&mut self) -> Result<(), BlockchainError> {
        if let Some(height) = self.journal_height.take() {
            debug!("discarding block {}", height);
        }
        self.snapshots.clear();
        self.cache.clear();
        Ok(())
    }

    fn rewind_to(&mut self, height: u32) -> Result<u32, BlockchainError> {
        if !self.snapshots.is_empty() {
            return Err(BlockchainError::InvalidState(
                "Cannot rewind while a block is being applied".to_owned(),
            ));
        }

        let mut rewound = 0;
        while let Some(tip) = self.get_tip_height()? {
            if tip <= height {
                break;
            }

            let key = tip.to_be_bytes();
            let bytes = self
                .backend
                .get(Column::Undo, &key)?
                .ok_or_else(|| BlockchainError::InvalidState(format!("Missing undo record of block {}", tip)))?;
            let undo = UndoRecord::from_bytes(&bytes)?;

            // keys of a record are unique, restoring them needs no ordering
            let mut batch: WriteBatch = undo.entries;
            batch.push((Column::Undo, Bytes::copy_from_slice(&key), None));

            self.backend.write_batch(batch)?;
            rewound += 1;
        }

        if rewound > 0 {
            info!("rewound {} blocks to height {}", rewound, height);
            self.cache.clear();
        }
        Ok(rewound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::{MemoryBackend, SnapshotProvider};

    fn dump(store: &ChainStore<MemoryBackend>) -> Vec<(Bytes, Bytes)> {
        store
            .backend()
            .dump()
            .into_iter()
            .filter(|(k, _)| k[0] != Column::Undo.prefix() && k[0] != Column::Meta.prefix())
            .collect()
    }

    #[test]
    fn test_rewind_restores_previous_values() {
        let mut store = ChainStore::in_memory();
        store.begin_block(1).unwrap();
        store.insert_into_disk(Column::Tokens, b"a".to_vec(), &1u32).unwrap();
        store.commit_block().unwrap();
        let after_first = dump(&store);

        store.begin_block(2).unwrap();
        store.insert_into_disk(Column::Tokens, b"a".to_vec(), &2u32).unwrap();
        store.insert_into_disk(Column::Tokens, b"b".to_vec(), &3u32).unwrap();
        store.start_snapshot().unwrap();
        store.remove_from_disk(Column::Tokens, b"b".to_vec()).unwrap();
        store.end_snapshot(true).unwrap();
        store.commit_block().unwrap();

        assert_eq!(store.get_tip_height().unwrap(), Some(2));
        assert_eq!(store.rewind_to(1).unwrap(), 1);
        assert_eq!(dump(&store), after_first);
        assert_eq!(store.get_tip_height().unwrap(), Some(1));

        // idempotent
        assert_eq!(store.rewind_to(1).unwrap(), 0);
        assert_eq!(dump(&store), after_first);

        assert_eq!(store.rewind_to(0).unwrap(), 1);
        assert!(dump(&store).is_empty());
        assert_eq!(store.get_tip_height().unwrap(), None);
    }

    #[test]
    fn test_discard_block() {
        let mut store = ChainStore::in_memory();
        store.begin_block(5).unwrap();
        store.insert_into_disk(Column::Tokens, b"a".to_vec(), &1u32).unwrap();
        store.discard_block().unwrap();
        assert!(dump(&store).is_empty());
        assert_eq!(store.get_tip_height().unwrap(), None);
        assert!(store.begin_block(5).is_ok());
    }
}

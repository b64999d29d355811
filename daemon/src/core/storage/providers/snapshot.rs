use log::trace;

use crate::core::{
    error::BlockchainError,
    storage::{snapshot::Snapshot, ChainStore, StorageBackend},
};

pub trait SnapshotProvider {
    // Check if we have a snapshot already set
    fn has_snapshot(&self) -> bool;

    // Number of snapshots currently stacked
    fn snapshot_depth(&self) -> usize;

    // Start a nested snapshot, every write goes to it until it ends
    fn start_snapshot(&mut self) -> Result<(), BlockchainError>;

    // Merge the snapshot into its parent or drop it
    // Ending the outermost snapshot writes it to the backend without journaling
    fn end_snapshot(&mut self, apply: bool) -> Result<(), BlockchainError>;
}

impl<B: StorageBackend> SnapshotProvider for ChainStore<B> {
    fn has_snapshot(&self) -> bool {
        !self.snapshots.is_empty()
    }

    fn snapshot_depth(&self) -> usize {
        self.snapshots.len()
    }

    fn start_snapshot(&mut self) -> Result<(), BlockchainError> {
        if log::log_enabled!(log::Level::Trace) {
            trace!("start snapshot at depth {}", self.snapshots.len());
        }
        self.snapshots.push(Snapshot::new());
        Ok(())
    }

    fn end_snapshot(&mut self, apply: bool) -> Result<(), BlockchainError> {
        if log::log_enabled!(log::Level::Trace) {
            trace!("end snapshot at depth {} (apply={})", self.snapshots.len(), apply);
        }

        let snapshot = self
            .snapshots
            .pop()
            .ok_or_else(|| BlockchainError::InvalidState("No snapshot to end".to_owned()))?;

        if !apply {
            return Ok(());
        }

        match self.snapshots.last_mut() {
            Some(parent) => parent.merge(snapshot),
            None => {
                let batch = snapshot.into_writes();
                self.backend.write_batch(batch)?;
                self.cache.clear();
            }
        }
        Ok(())
    }
}

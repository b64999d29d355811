use log::trace;
use tessera_common::history::{HistoryEntry, HistoryFilter, HistorySubject};

use crate::{
    config::{DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT},
    core::{
        error::BlockchainError,
        storage::{build_history_key, build_history_prefix, ChainStore, Column, StorageBackend},
    },
};

/// Per subject history, newest first.
pub trait HistoryProvider {
    fn add_history(&mut self, subject: &HistorySubject, entry: &HistoryEntry) -> Result<(), BlockchainError>;

    fn list_history(
        &self,
        subject: &HistorySubject,
        filter: &HistoryFilter,
        tip: u32,
    ) -> Result<Vec<HistoryEntry>, BlockchainError>;

    // Every account's history merged, newest first
    fn list_all_account_history(&self, filter: &HistoryFilter, tip: u32) -> Result<Vec<HistoryEntry>, BlockchainError>;
}

fn effective_limit(filter: &HistoryFilter) -> usize {
    filter.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).min(MAX_HISTORY_LIMIT)
}

impl<B: StorageBackend> HistoryProvider for ChainStore<B> {
    fn add_history(&mut self, subject: &HistorySubject, entry: &HistoryEntry) -> Result<(), BlockchainError> {
        if log::log_enabled!(log::Level::Trace) {
            trace!(
                "add history {} at {}/{} for {:?}",
                entry.kind.name(),
                entry.block_height,
                entry.tx_index,
                subject
            );
        }

        // several entries of the same transaction keep their insertion order
        let mut prefix = build_history_prefix(subject);
        prefix.extend_from_slice(&(!entry.block_height).to_be_bytes());
        prefix.extend_from_slice(&(!entry.tx_index).to_be_bytes());
        let sequence = self.scan_prefix_raw(Column::History, &prefix)?.len() as u32;

        let key = build_history_key(subject, entry.block_height, entry.tx_index, sequence);
        self.insert_into_disk(Column::History, key, entry)
    }

    fn list_history(
        &self,
        subject: &HistorySubject,
        filter: &HistoryFilter,
        tip: u32,
    ) -> Result<Vec<HistoryEntry>, BlockchainError> {
        let limit = effective_limit(filter);
        // keys already sort newest first
        Ok(self
            .scan_prefix::<HistoryEntry>(Column::History, &build_history_prefix(subject))?
            .into_iter()
            .map(|(_, entry)| entry)
            .filter(|entry| filter.matches(entry, tip))
            .take(limit)
            .collect())
    }

    fn list_all_account_history(&self, filter: &HistoryFilter, tip: u32) -> Result<Vec<HistoryEntry>, BlockchainError> {
        let limit = effective_limit(filter);
        let mut entries: Vec<HistoryEntry> = self
            .scan_prefix::<HistoryEntry>(Column::History, &[b'a'])?
            .into_iter()
            .map(|(_, entry)| entry)
            .filter(|entry| filter.matches(entry, tip))
            .collect();
        sort_newest_first(&mut entries);
        entries.truncate(limit);
        Ok(entries)
    }
}

// Stable sort, entries of the same transaction keep their relative order
fn sort_newest_first(entries: &mut [HistoryEntry]) {
    entries.sort_by(|a, b| {
        b.block_height
            .cmp(&a.block_height)
            .then(b.tx_index.cmp(&a.tx_index))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_common::{
        amount::Balances,
        crypto::Hash,
        script::Script,
        history::{EngineEvent, HistoryKind},
        transaction::CustomTxType,
    };

    fn entry(height: u32, tx_index: u32, kind: HistoryKind, owner: &Script) -> HistoryEntry {
        HistoryEntry {
            block_height: height,
            tx_index,
            tx_hash: Hash::new([height as u8; 32]),
            kind,
            owner: owner.clone(),
            amounts: Balances::from_single(0, 10),
            vault_snapshot: None,
            cycle: None,
        }
    }

    #[test]
    fn test_history_is_newest_first_with_limit() {
        let mut store = ChainStore::in_memory();
        let owner = Script::p2pkh([3; 20]);
        let subject = HistorySubject::Account(owner.clone());
        for height in 1..=5 {
            store
                .add_history(&subject, &entry(height, 0, HistoryKind::Tx(CustomTxType::UtxosToAccount), &owner))
                .unwrap();
        }
        let filter = HistoryFilter {
            limit: Some(2),
            ..Default::default()
        };
        let heights: Vec<u32> = store
            .list_history(&subject, &filter, 5)
            .unwrap()
            .iter()
            .map(|e| e.block_height)
            .collect();
        assert_eq!(heights, vec![5, 4]);
    }

    #[test]
    fn test_same_tx_entries_keep_every_record() {
        let mut store = ChainStore::in_memory();
        let owner = Script::p2pkh([4; 20]);
        let subject = HistorySubject::Account(owner.clone());
        store
            .add_history(&subject, &entry(7, 1, HistoryKind::Tx(CustomTxType::PoolSwap), &owner))
            .unwrap();
        store
            .add_history(&subject, &entry(7, 1, HistoryKind::Engine(EngineEvent::Commission), &owner))
            .unwrap();
        let all = store.list_history(&subject, &HistoryFilter::default(), 7).unwrap();
        assert_eq!(all.len(), 2);

        let filter = HistoryFilter {
            tx_type: Some(CustomTxType::PoolSwap),
            ..Default::default()
        };
        assert_eq!(store.list_history(&subject, &filter, 7).unwrap().len(), 1);
        assert_eq!(store.list_all_account_history(&HistoryFilter::default(), 7).unwrap().len(), 2);
    }
}

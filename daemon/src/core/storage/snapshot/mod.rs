mod changes;

use std::{collections::HashMap, hash::Hash};

use bytes::Bytes;

pub use changes::Changes;

/// What a snapshot knows about a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryState<T> {
    Stored(T),
    // Hides any value in the layers below
    Deleted,
    // Untouched, look further down
    Absent,
}

impl<T> EntryState<T> {
    pub fn is_absent(&self) -> bool {
        matches!(self, EntryState::Absent)
    }
}

/// Staged writes grouped per column.
///
/// The store keeps a stack of them: the block opens the outermost one and
/// every custom transaction works in a nested one, folded into its parent
/// when it is applied and thrown away when it is rejected.
#[derive(Debug, Clone)]
pub struct Snapshot<C: Hash + Eq> {
    columns: HashMap<C, Changes>,
}

impl<C: Hash + Eq> Default for Snapshot<C> {
    fn default() -> Self {
        Self {
            columns: HashMap::new(),
        }
    }
}

impl<C: Hash + Eq + Copy + Ord> Snapshot<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put<K: Into<Bytes>, V: Into<Bytes>>(&mut self, column: C, key: K, value: V) {
        self.columns.entry(column).or_default().insert(key, value);
    }

    pub fn delete<K: Into<Bytes>>(&mut self, column: C, key: K) {
        self.columns.entry(column).or_default().remove(key);
    }

    pub fn get(&self, column: C, key: &[u8]) -> EntryState<&Bytes> {
        self.columns
            .get(&column)
            .map_or(EntryState::Absent, |changes| changes.get(key))
    }

    pub fn changes(&self, column: C) -> Option<&Changes> {
        self.columns.get(&column)
    }

    /// Touched columns in a stable order.
    pub fn columns(&self) -> Vec<C> {
        let mut columns: Vec<C> = self.columns.keys().copied().collect();
        columns.sort();
        columns
    }

    pub fn merge(&mut self, child: Snapshot<C>) {
        for (column, changes) in child.columns {
            self.columns.entry(column).or_default().extend(changes);
        }
    }

    /// Flattens every write into `(column, key, value)`, `None` being a delete.
    pub fn into_writes(self) -> Vec<(C, Bytes, Option<Bytes>)> {
        self.columns
            .into_iter()
            .flat_map(|(column, changes)| changes.into_iter().map(move |(key, value)| (column, key, value)))
            .collect()
    }
}

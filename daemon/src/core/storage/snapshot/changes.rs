use std::{
    collections::{btree_map::IntoIter, BTreeMap},
    ops::Bound,
};

use bytes::Bytes;

use super::EntryState;

/// Pending writes of one column, `None` being a delete.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Changes {
    pub writes: BTreeMap<Bytes, Option<Bytes>>,
}

impl Changes {
    pub fn insert<K: Into<Bytes>, V: Into<Bytes>>(&mut self, key: K, value: V) {
        self.writes.insert(key.into(), Some(value.into()));
    }

    pub fn remove<K: Into<Bytes>>(&mut self, key: K) {
        self.writes.insert(key.into(), None);
    }

    pub fn get(&self, key: &[u8]) -> EntryState<&Bytes> {
        match self.writes.get(key) {
            Some(Some(value)) => EntryState::Stored(value),
            Some(None) => EntryState::Deleted,
            None => EntryState::Absent,
        }
    }

    // Later writes replace earlier ones key by key
    pub fn extend(&mut self, other: Changes) {
        self.writes.extend(other.writes);
    }

    /// Writes whose key starts with `prefix`, in key order.
    pub fn with_prefix<'a>(&'a self, prefix: &'a [u8]) -> impl Iterator<Item = (&'a Bytes, &'a Option<Bytes>)> + 'a {
        self.writes
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(move |(key, _)| key.starts_with(prefix))
    }

    pub fn keys(&self) -> impl Iterator<Item = &Bytes> {
        self.writes.keys()
    }
}

impl IntoIterator for Changes {
    type Item = (Bytes, Option<Bytes>);
    type IntoIter = IntoIter<Bytes, Option<Bytes>>;

    fn into_iter(self) -> Self::IntoIter {
        self.writes.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_shadows_value() {
        let mut changes = Changes::default();
        changes.insert(&b"a"[..], &b"1"[..]);
        assert_eq!(changes.get(b"a"), EntryState::Stored(&Bytes::from_static(b"1")));
        changes.remove(&b"a"[..]);
        assert_eq!(changes.get(b"a"), EntryState::Deleted);
        assert_eq!(changes.get(b"b"), EntryState::Absent);

        let mut later = Changes::default();
        later.insert(&b"a"[..], &b"2"[..]);
        changes.extend(later);
        assert_eq!(changes.get(b"a"), EntryState::Stored(&Bytes::from_static(b"2")));
    }

    #[test]
    fn test_prefix_iteration() {
        let mut changes = Changes::default();
        changes.insert(&b"ab1"[..], &b"x"[..]);
        changes.insert(&b"ab2"[..], &b"y"[..]);
        changes.insert(&b"ac"[..], &b"z"[..]);
        changes.remove(&b"aa"[..]);
        let keys: Vec<_> = changes.with_prefix(b"ab").map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![Bytes::from_static(b"ab1"), Bytes::from_static(b"ab2")]);
    }
}

use std::collections::HashMap;

use spanstore_set::OrderedSet;
use spanstore_types::{RecordId, TypeHash};

use crate::layout::IndexEntry;

/// In-memory lookup tables over the live records.
///
/// Keeps ids and locations ordered, maps id to entry and location to id,
/// and groups ids by type hash. Cloning is a full, independent copy; the
/// store keeps one clone as its committed generation.
#[derive(Debug, Clone, Default)]
pub struct RecordIndex {
    ids: OrderedSet,
    locs: OrderedSet,
    by_id: HashMap<RecordId, IndexEntry>,
    by_loc: HashMap<u64, RecordId>,
    by_type: HashMap<TypeHash, OrderedSet>,
}

impl RecordIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = IndexEntry>) -> Self {
        let mut index = Self::new();
        for entry in entries {
            index.insert(entry);
        }
        index
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn get(&self, id: RecordId) -> Option<IndexEntry> {
        self.by_id.get(&id).copied()
    }

    /// Add or replace the entry for `entry.id`.
    pub fn insert(&mut self, entry: IndexEntry) {
        self.remove(entry.id);
        self.ids.insert(entry.id);
        self.locs.insert(entry.loc);
        self.by_loc.insert(entry.loc, entry.id);
        self.by_type
            .entry(entry.type_hash)
            .or_default()
            .insert(entry.id);
        self.by_id.insert(entry.id, entry);
    }

    pub fn remove(&mut self, id: RecordId) -> Option<IndexEntry> {
        let entry = self.by_id.remove(&id)?;
        self.ids.remove(id);
        self.locs.remove(entry.loc);
        self.by_loc.remove(&entry.loc);
        if let Some(ids) = self.by_type.get_mut(&entry.type_hash) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_type.remove(&entry.type_hash);
            }
        }
        Some(entry)
    }

    /// Point `id` at a new location.
    pub fn relocate(&mut self, id: RecordId, loc: u64) -> Option<IndexEntry> {
        let mut entry = self.get(id)?;
        entry.loc = loc;
        self.insert(entry);
        Some(entry)
    }

    /// The record starting exactly at `loc`.
    pub fn id_at(&self, loc: u64) -> Option<RecordId> {
        self.by_loc.get(&loc).copied()
    }

    /// The record starting at or before `offset`.
    pub fn entry_at_or_before(&self, offset: u64) -> Option<IndexEntry> {
        let loc = self.locs.floor(offset)?;
        self.id_at(loc).and_then(|id| self.get(id))
    }

    pub fn max_id(&self) -> Option<RecordId> {
        self.ids.max()
    }

    /// All ids, ascending.
    pub fn ids(&self) -> Vec<RecordId> {
        self.ids.values()
    }

    /// Ids stored under `type_hash`, ascending.
    pub fn ids_of(&self, type_hash: TypeHash) -> Vec<RecordId> {
        self.by_type
            .get(&type_hash)
            .map(OrderedSet::values)
            .unwrap_or_default()
    }

    /// Entries in id order, as written to an index block.
    pub fn entries(&self) -> Vec<IndexEntry> {
        self.ids
            .iter()
            .filter_map(|id| self.by_id.get(&id).copied())
            .collect()
    }

    /// Record count per type hash, by descending count.
    pub fn type_histogram(&self) -> Vec<(TypeHash, usize)> {
        let mut hist: Vec<(TypeHash, usize)> = self
            .by_type
            .iter()
            .map(|(hash, ids)| (*hash, ids.len()))
            .collect();
        hist.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        hist
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: RecordId, loc: u64, th: u32) -> IndexEntry {
        IndexEntry {
            id,
            loc,
            type_hash: TypeHash::from_raw(th),
        }
    }

    #[test]
    fn insert_and_lookup() {
        let index = RecordIndex::from_entries([entry(5, 100, 1), entry(2, 40, 1), entry(9, 70, 2)]);
        assert_eq!(index.len(), 3);
        assert_eq!(index.get(2), Some(entry(2, 40, 1)));
        assert_eq!(index.id_at(70), Some(9));
        assert_eq!(index.max_id(), Some(9));
        assert_eq!(index.ids(), vec![2, 5, 9]);
        assert_eq!(index.ids_of(TypeHash::from_raw(1)), vec![2, 5]);
        assert!(index.ids_of(TypeHash::from_raw(3)).is_empty());
    }

    #[test]
    fn replace_moves_every_table() {
        let mut index = RecordIndex::from_entries([entry(1, 30, 1)]);
        index.insert(entry(1, 60, 2));
        assert_eq!(index.len(), 1);
        assert_eq!(index.id_at(30), None);
        assert_eq!(index.id_at(60), Some(1));
        assert!(index.ids_of(TypeHash::from_raw(1)).is_empty());
        assert_eq!(index.ids_of(TypeHash::from_raw(2)), vec![1]);
    }

    #[test]
    fn remove_clears_every_table() {
        let mut index = RecordIndex::from_entries([entry(1, 30, 1), entry(2, 50, 1)]);
        assert_eq!(index.remove(1), Some(entry(1, 30, 1)));
        assert_eq!(index.remove(1), None);
        assert_eq!(index.id_at(30), None);
        assert_eq!(index.ids_of(TypeHash::from_raw(1)), vec![2]);
        index.remove(2);
        assert!(index.is_empty());
        assert!(index.type_histogram().is_empty());
        assert_eq!(index.max_id(), None);
    }

    #[test]
    fn relocate_keeps_id_and_type() {
        let mut index = RecordIndex::from_entries([entry(4, 90, 3)]);
        assert_eq!(index.relocate(4, 25), Some(entry(4, 25, 3)));
        assert_eq!(index.id_at(25), Some(4));
        assert_eq!(index.id_at(90), None);
        assert_eq!(index.relocate(8, 1), None);
    }

    #[test]
    fn entries_are_in_id_order() {
        let index = RecordIndex::from_entries([entry(7, 25, 1), entry(3, 60, 1), entry(5, 90, 2)]);
        let ids: Vec<RecordId> = index.entries().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![3, 5, 7]);
    }

    #[test]
    fn entry_at_or_before_finds_owner() {
        let index = RecordIndex::from_entries([entry(1, 25, 1), entry(2, 60, 1)]);
        assert_eq!(index.entry_at_or_before(59).map(|e| e.id), Some(1));
        assert_eq!(index.entry_at_or_before(60).map(|e| e.id), Some(2));
        assert_eq!(index.entry_at_or_before(10), None);
    }

    #[test]
    fn clones_are_independent() {
        let mut current = RecordIndex::from_entries([entry(1, 25, 1)]);
        let committed = current.clone();
        current.remove(1);
        assert!(committed.contains(1));
        assert!(!current.contains(1));
    }

    #[test]
    fn histogram_orders_by_count() {
        let index = RecordIndex::from_entries([entry(1, 25, 9), entry(2, 60, 4), entry(3, 90, 4)]);
        assert_eq!(
            index.type_histogram(),
            vec![(TypeHash::from_raw(4), 2), (TypeHash::from_raw(9), 1)]
        );
    }
}

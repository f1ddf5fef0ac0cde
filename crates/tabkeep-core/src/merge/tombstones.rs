//! Tombstone union and optional retention pruning

use std::collections::HashMap;

use crate::models::{RecordId, Tombstone};

/// Tombstones keyed by id, in first-insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletedMap {
    index: HashMap<RecordId, usize>,
    entries: Vec<Tombstone>,
}

impl DeletedMap {
    /// Insert a tombstone, replacing the fields of an existing entry in place.
    pub fn insert(&mut self, tombstone: Tombstone) {
        if let Some(&slot) = self.index.get(&tombstone.id) {
            self.entries[slot] = tombstone;
        } else {
            self.index.insert(tombstone.id, self.entries.len());
            self.entries.push(tombstone);
        }
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &RecordId) -> Option<&Tombstone> {
        self.index.get(id).map(|&slot| &self.entries[slot])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_tombstones(self) -> Vec<Tombstone> {
        self.entries
    }
}

impl FromIterator<Tombstone> for DeletedMap {
    fn from_iter<I: IntoIterator<Item = Tombstone>>(iter: I) -> Self {
        let mut map = Self::default();
        for tombstone in iter {
            map.insert(tombstone);
        }
        map
    }
}

/// Union of both tombstone sets; the remote entry wins on a duplicate id.
pub fn merge_tombstones(local: &[Tombstone], remote: &[Tombstone]) -> DeletedMap {
    local.iter().chain(remote).copied().collect()
}

/// Drop tombstones deleted more than `retention_ms` before `now_ms`.
///
/// Once a tombstone is pruned, a replica that never saw the deletion can
/// resurrect the record, so this only runs when a retention window is
/// configured.
pub fn prune_tombstones(tombstones: Vec<Tombstone>, now_ms: i64, retention_ms: i64) -> Vec<Tombstone> {
    let cutoff = now_ms.saturating_sub(retention_ms);
    tombstones
        .into_iter()
        .filter(|tombstone| tombstone.deleted_at >= cutoff)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn id(n: u128) -> RecordId {
        RecordId::from_uuid(Uuid::from_u128(n))
    }

    #[test]
    fn test_remote_tombstone_wins_on_duplicate_id() {
        let local = [Tombstone::new(id(1), 10), Tombstone::new(id(2), 20)];
        let remote = [Tombstone::new(id(2), 5), Tombstone::new(id(3), 30)];

        let merged = merge_tombstones(&local, &remote);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.get(&id(2)).map(|t| t.deleted_at), Some(5));
        assert_eq!(
            merged.into_tombstones(),
            vec![
                Tombstone::new(id(1), 10),
                Tombstone::new(id(2), 5),
                Tombstone::new(id(3), 30),
            ]
        );
    }

    #[test]
    fn test_empty_inputs_produce_empty_map() {
        let merged = merge_tombstones(&[], &[]);
        assert!(merged.is_empty());
        assert!(!merged.contains(&id(1)));
    }

    #[test]
    fn test_prune_keeps_recent_tombstones() {
        let tombstones = vec![
            Tombstone::new(id(1), 1_000),
            Tombstone::new(id(2), 9_000),
            Tombstone::new(id(3), 5_000),
        ];

        let kept = prune_tombstones(tombstones, 10_000, 5_000);
        assert_eq!(
            kept,
            vec![Tombstone::new(id(2), 9_000), Tombstone::new(id(3), 5_000)]
        );
    }
}

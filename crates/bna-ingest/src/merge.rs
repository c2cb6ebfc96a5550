//! Keyed record sets and the override/retain merge
//!
//! A fresh batch is reconciled with persisted state by business key: batch
//! values override, keys missing from the batch are kept as they are, and an
//! empty batch changes nothing. [`merge`] is the in-memory form of that rule;
//! the storage writer applies the same rule as a keyed upsert and reports
//! [`MergeStats`] through [`MergeStats::from_counts`].

use serde::{Deserialize, Serialize};
use std::collections::btree_map::{self, BTreeMap};
use std::fmt::Debug;

/// A record with a durable business key
pub trait Keyed {
    type Key: Ord + Clone + Debug + Send + Sync;

    fn key(&self) -> Self::Key;
}

/// Ordered set of records, at most one per business key
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedSet<T: Keyed> {
    records: BTreeMap<T::Key, T>,
}

impl<T: Keyed> Default for KeyedSet<T> {
    fn default() -> Self {
        Self {
            records: BTreeMap::new(),
        }
    }
}

impl<T: Keyed> KeyedSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, replacing any record with the same key.
    /// Returns `true` if a record was replaced.
    pub fn insert(&mut self, record: T) -> bool {
        self.records.insert(record.key(), record).is_some()
    }

    pub fn remove(&mut self, key: &T::Key) -> Option<T> {
        self.records.remove(key)
    }

    pub fn get(&self, key: &T::Key) -> Option<&T> {
        self.records.get(key)
    }

    pub fn contains_key(&self, key: &T::Key) -> bool {
        self.records.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &T::Key> {
        self.records.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.records.values()
    }

    pub fn into_vec(self) -> Vec<T> {
        self.records.into_values().collect()
    }
}

impl<T: Keyed> FromIterator<T> for KeyedSet<T> {
    /// Later records win over earlier ones with the same key
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = Self::new();
        for record in iter {
            set.insert(record);
        }
        set
    }
}

impl<T: Keyed> IntoIterator for KeyedSet<T> {
    type Item = T;
    type IntoIter = btree_map::IntoValues<T::Key, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_values()
    }
}

/// Per-key outcome counts of one merge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStats {
    /// Keys that did not exist before
    pub inserted: u64,
    /// Existing keys whose record was replaced by the batch
    pub overridden: u64,
    /// Existing keys absent from the batch, left unchanged
    pub retained: u64,
}

impl MergeStats {
    /// Derive stats from row counts around a keyed upsert of `batch_len` unique keys
    pub fn from_counts(before: u64, after: u64, batch_len: u64) -> Self {
        let inserted = after.saturating_sub(before);
        let overridden = batch_len.saturating_sub(inserted);
        let retained = before.saturating_sub(overridden);
        Self {
            inserted,
            overridden,
            retained,
        }
    }

    /// Stats for an empty batch against `persisted` existing keys
    pub fn unchanged(persisted: u64) -> Self {
        Self {
            inserted: 0,
            overridden: 0,
            retained: persisted,
        }
    }

    pub fn total(&self) -> u64 {
        self.inserted + self.overridden + self.retained
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeResult<T: Keyed> {
    pub merged: KeyedSet<T>,
    pub stats: MergeStats,
}

/// Reconcile `batch` with `persisted`: batch values override, persisted-only
/// keys are retained, an empty batch returns `persisted` unchanged.
pub fn merge<T>(persisted: &KeyedSet<T>, batch: &KeyedSet<T>) -> MergeResult<T>
where
    T: Keyed + Clone,
{
    let mut merged = persisted.clone();
    let mut stats = MergeStats::default();

    for record in batch.iter() {
        if merged.insert(record.clone()) {
            stats.overridden += 1;
        } else {
            stats.inserted += 1;
        }
    }
    stats.retained = persisted.len() as u64 - stats.overridden;

    MergeResult { merged, stats }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Priced {
        id: String,
        price: u32,
    }

    impl Keyed for Priced {
        type Key = String;

        fn key(&self) -> String {
            self.id.clone()
        }
    }

    fn set(items: &[(&str, u32)]) -> KeyedSet<Priced> {
        items
            .iter()
            .map(|(id, price)| Priced {
                id: id.to_string(),
                price: *price,
            })
            .collect()
    }

    #[test]
    fn test_override_and_insert() {
        let persisted = set(&[("111", 300_000)]);
        let batch = set(&[("111", 310_000), ("222", 200_000)]);

        let result = merge(&persisted, &batch);

        assert_eq!(result.merged, set(&[("111", 310_000), ("222", 200_000)]));
        assert_eq!(
            result.stats,
            MergeStats {
                inserted: 1,
                overridden: 1,
                retained: 0
            }
        );
    }

    #[test]
    fn test_empty_batch_keeps_everything() {
        let persisted = set(&[("111", 300_000), ("333", 1)]);
        let result = merge(&persisted, &KeyedSet::new());

        assert_eq!(result.merged, persisted);
        assert_eq!(result.stats, MergeStats::unchanged(2));
    }

    #[test]
    fn test_last_occurrence_wins_on_collect() {
        let batch = set(&[("1", 10), ("2", 20), ("1", 11)]);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.get(&"1".to_string()).unwrap().price, 11);
    }

    #[test]
    fn test_from_counts_matches_merge() {
        let persisted = set(&[("a", 1), ("b", 2), ("c", 3)]);
        let batch = set(&[("b", 20), ("d", 4), ("e", 5)]);
        let result = merge(&persisted, &batch);

        let derived = MergeStats::from_counts(
            persisted.len() as u64,
            result.merged.len() as u64,
            batch.len() as u64,
        );
        assert_eq!(derived, result.stats);
        assert_eq!(derived.total(), result.merged.len() as u64);
    }

    fn arb_set() -> impl Strategy<Value = KeyedSet<Priced>> {
        prop::collection::vec((0u8..20, any::<u32>()), 0..30).prop_map(|items| {
            items
                .into_iter()
                .map(|(id, price)| Priced {
                    id: format!("{id:03}"),
                    price,
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_merge_is_idempotent(d in arb_set(), b in arb_set()) {
            let once = merge(&d, &b).merged;
            let twice = merge(&once, &b).merged;
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_empty_batch_is_identity(d in arb_set()) {
            prop_assert_eq!(merge(&d, &KeyedSet::new()).merged, d);
        }

        #[test]
        fn prop_batch_overrides(d in arb_set(), b in arb_set()) {
            let merged = merge(&d, &b).merged;
            for record in b.iter() {
                prop_assert_eq!(merged.get(&record.id), Some(record));
            }
        }

        #[test]
        fn prop_absent_keys_are_retained(d in arb_set(), b in arb_set()) {
            let merged = merge(&d, &b).merged;
            for record in d.iter().filter(|r| !b.contains_key(&r.id)) {
                prop_assert_eq!(merged.get(&record.id), Some(record));
            }
        }

        #[test]
        fn prop_one_record_per_key(d in arb_set(), b in arb_set()) {
            let result = merge(&d, &b);
            let mut keys: Vec<String> = d.keys().chain(b.keys()).cloned().collect();
            keys.sort();
            keys.dedup();
            prop_assert_eq!(result.merged.len(), keys.len());
            prop_assert_eq!(result.stats.total() as usize, keys.len());
        }

        #[test]
        fn prop_from_counts_agrees(d in arb_set(), b in arb_set()) {
            let result = merge(&d, &b);
            let derived = MergeStats::from_counts(
                d.len() as u64,
                result.merged.len() as u64,
                b.len() as u64,
            );
            prop_assert_eq!(derived, result.stats);
        }
    }
}

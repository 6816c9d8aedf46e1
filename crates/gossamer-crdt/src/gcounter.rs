//! Grow-only Counter CRDT
//!
//! Each replica owns one entry and only ever increases it. The counter's
//! value is the sum of all entries; join takes the per-replica maximum.

use crate::lattice::Lattice;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Serialized as a JSON object mapping replica id to its count.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GCounter<K: Ord + Clone> {
    counts: BTreeMap<K, u64>,
}

impl<K: Ord + Clone> GCounter<K> {
    pub fn new() -> Self {
        Self {
            counts: BTreeMap::new(),
        }
    }

    /// Returns a new counter with `delta` added to `replica_id`'s entry
    pub fn add(&self, replica_id: K, delta: u64) -> Self {
        let mut counts = self.counts.clone();
        let entry = counts.entry(replica_id).or_insert(0);
        *entry = entry.saturating_add(delta);
        Self { counts }
    }

    /// Sum of all entries
    pub fn read(&self) -> u64 {
        self.counts
            .values()
            .fold(0u64, |sum, v| sum.saturating_add(*v))
    }

    pub fn get(&self, replica_id: &K) -> u64 {
        self.counts.get(replica_id).copied().unwrap_or(0)
    }
}

impl<K: Ord + Clone> Default for GCounter<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone> Lattice for GCounter<K> {
    fn bottom() -> Self {
        Self::new()
    }

    fn join(&self, other: &Self) -> Self {
        let mut counts = self.counts.clone();
        for (k, v) in &other.counts {
            counts
                .entry(k.clone())
                .and_modify(|e| *e = (*e).max(*v))
                .or_insert(*v);
        }
        Self { counts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gcounter_sums_entries() {
        let counter = GCounter::new().add("a", 3).add("b", 4).add("a", 2);
        assert_eq!(counter.read(), 9);
        assert_eq!(counter.get(&"a"), 5);
        assert_eq!(counter.get(&"c"), 0);
    }

    #[test]
    fn test_gcounter_join_takes_maximum() {
        let left = GCounter::new().add("a", 5).add("b", 1);
        let right = GCounter::new().add("a", 2).add("b", 7);

        let joined = left.join(&right);
        assert_eq!(joined.get(&"a"), 5);
        assert_eq!(joined.get(&"b"), 7);
        assert_eq!(joined.read(), 12);
    }

    #[test]
    fn test_gcounter_add_leaves_original_untouched() {
        let before = GCounter::new().add("n1", 1);
        let after = before.add("n1", 1);
        assert_eq!(before.read(), 1);
        assert_eq!(after.read(), 2);
    }

    #[test]
    fn test_gcounter_serializes_as_object() {
        let counter = GCounter::new().add("n1".to_string(), 4);
        let json = serde_json::to_value(&counter).unwrap();
        assert_eq!(json, serde_json::json!({"n1": 4}));

        let back: GCounter<String> = serde_json::from_value(json).unwrap();
        assert_eq!(back, counter);
    }
}

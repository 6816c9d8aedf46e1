//! PN-Counter (Positive-Negative Counter) CRDT
//!
//! A PN-Counter supports both increment and decrement operations by
//! maintaining two grow-only counters: one for increments (P) and one for
//! decrements (N). The value is P - N and may be negative.
//!
//! Both halves only ever grow, so joining them component-wise keeps every
//! entry monotonic.

use crate::gcounter::GCounter;
use crate::lattice::Lattice;
use serde::{Deserialize, Serialize};

/// A Positive-Negative Counter CRDT
///
/// Serialized as `{"inc": {...}, "dec": {...}}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PNCounter<K: Ord + Clone> {
    /// Per-replica increment counters
    inc: GCounter<K>,
    /// Per-replica decrement counters
    dec: GCounter<K>,
}

impl<K: Ord + Clone> PNCounter<K> {
    /// Create a new PN-Counter
    pub fn new() -> Self {
        Self {
            inc: GCounter::new(),
            dec: GCounter::new(),
        }
    }

    /// Returns a new counter with `delta` applied on behalf of `replica_id`.
    ///
    /// Non-negative deltas grow `inc`; negative deltas grow `dec` by their
    /// absolute value.
    pub fn add(&self, replica_id: K, delta: i64) -> Self {
        if delta >= 0 {
            Self {
                inc: self.inc.add(replica_id, delta.unsigned_abs()),
                dec: self.dec.clone(),
            }
        } else {
            Self {
                inc: self.inc.clone(),
                dec: self.dec.add(replica_id, delta.unsigned_abs()),
            }
        }
    }

    /// Get the current value (sum of increments - sum of decrements)
    pub fn read(&self) -> i64 {
        let inc = i128::from(self.inc.read());
        let dec = i128::from(self.dec.read());
        (inc - dec).clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
    }

    /// Get the increment counter for a replica
    pub fn get_increment(&self, replica_id: &K) -> u64 {
        self.inc.get(replica_id)
    }

    /// Get the decrement counter for a replica
    pub fn get_decrement(&self, replica_id: &K) -> u64 {
        self.dec.get(replica_id)
    }
}

impl<K: Ord + Clone> Default for PNCounter<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone> Lattice for PNCounter<K> {
    fn bottom() -> Self {
        Self::new()
    }

    /// Join operation performs component-wise max on both counters
    fn join(&self, other: &Self) -> Self {
        Self {
            inc: self.inc.join(&other.inc),
            dec: self.dec.join(&other.dec),
        }
    }
}

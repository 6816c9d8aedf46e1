//! State merging for replicated values.
//!
//! Replicas exchange whole states and fold them together with [`Lattice::join`].
//! Because join is commutative, associative and idempotent, a replica ends
//! up in the same state whatever order pushes arrive in and however often
//! they repeat.

use std::cmp::Ordering;

/// A value replicas can merge.
///
/// `join` never mutates: a server swaps in the returned value under its own
/// lock.
pub trait Lattice: Clone + PartialEq {
    /// The state a fresh replica starts from; `x.join(&bottom()) == x`.
    fn bottom() -> Self;

    /// Least upper bound of `self` and `other`.
    fn join(&self, other: &Self) -> Self;

    /// Order induced by join. `None` when neither state has seen all of
    /// the other's updates.
    fn partial_cmp_lattice(&self, other: &Self) -> Option<Ordering> {
        match (self.leq(other), other.leq(self)) {
            (true, true) => Some(Ordering::Equal),
            (true, false) => Some(Ordering::Less),
            (false, true) => Some(Ordering::Greater),
            (false, false) => None,
        }
    }

    /// `other` already includes everything in `self`.
    fn leq(&self, other: &Self) -> bool {
        self.join(other) == *other
    }
}

//! Property-based tests that MUST pass for all CRDT implementations
//!
//! These tests verify the lattice laws that guarantee convergence:
//!  - Commutativity: a ⊔ b = b ⊔ a
//!  - Associativity: (a ⊔ b) ⊔ c = a ⊔ (b ⊔ c)
//!  - Idempotence:  a ⊔ a = a
//!  - Bottom is identity: a ⊔ ⊥ = a

use gossamer_crdt::{Datum, GCounter, GSet, Lattice, PNCounter};
use proptest::prelude::*;

const REPLICAS: [&str; 3] = ["n0", "n1", "n2"];

fn gset_strategy() -> impl Strategy<Value = GSet<Datum>> {
    prop::collection::vec(0i64..100, 0..20).prop_map(|elements| {
        elements
            .into_iter()
            .fold(GSet::new(), |set, e| set.add(Datum::new(e)))
    })
}

fn gcounter_strategy() -> impl Strategy<Value = GCounter<String>> {
    prop::collection::vec((0usize..3, 0u64..50), 0..10).prop_map(|adds| {
        adds.into_iter().fold(GCounter::new(), |counter, (r, d)| {
            counter.add(REPLICAS[r].to_string(), d)
        })
    })
}

fn pncounter_strategy() -> impl Strategy<Value = PNCounter<String>> {
    prop::collection::vec((0usize..3, -50i64..50), 0..10).prop_map(|adds| {
        adds.into_iter().fold(PNCounter::new(), |counter, (r, d)| {
            counter.add(REPLICAS[r].to_string(), d)
        })
    })
}

// ============================================================================
// GSet Property Tests
// ============================================================================

proptest! {
    #[test]
    fn gset_join_is_commutative(a in gset_strategy(), b in gset_strategy()) {
        prop_assert_eq!(a.join(&b), b.join(&a));
    }

    #[test]
    fn gset_join_is_associative(
        a in gset_strategy(),
        b in gset_strategy(),
        c in gset_strategy()
    ) {
        prop_assert_eq!(a.join(&b).join(&c), a.join(&b.join(&c)));
    }

    #[test]
    fn gset_join_is_idempotent(a in gset_strategy()) {
        prop_assert_eq!(a.join(&a), a);
    }

    #[test]
    fn gset_bottom_is_identity(a in gset_strategy()) {
        let bottom = GSet::bottom();
        prop_assert_eq!(a.join(&bottom), a.clone());
        prop_assert_eq!(bottom.join(&a), a);
    }

    #[test]
    fn gset_repeated_add_is_idempotent(a in gset_strategy(), x in 0i64..100) {
        let once = a.add(Datum::new(x));
        prop_assert_eq!(once.add(Datum::new(x)), once);
    }
}

// ============================================================================
// GCounter Property Tests
// ============================================================================

proptest! {
    #[test]
    fn gcounter_join_is_commutative(a in gcounter_strategy(), b in gcounter_strategy()) {
        prop_assert_eq!(a.join(&b), b.join(&a));
    }

    #[test]
    fn gcounter_join_is_associative(
        a in gcounter_strategy(),
        b in gcounter_strategy(),
        c in gcounter_strategy()
    ) {
        prop_assert_eq!(a.join(&b).join(&c), a.join(&b.join(&c)));
    }

    #[test]
    fn gcounter_join_is_idempotent(a in gcounter_strategy()) {
        prop_assert_eq!(a.join(&a), a);
    }

    #[test]
    fn gcounter_read_is_sum_of_deltas(
        adds in prop::collection::vec((0usize..3, 0u64..1000), 0..20)
    ) {
        let expected: u64 = adds.iter().map(|(_, d)| d).sum();
        let counter = adds.iter().fold(GCounter::new(), |c, (r, d)| c.add(REPLICAS[*r], *d));
        prop_assert_eq!(counter.read(), expected);
    }

    #[test]
    fn gcounter_join_never_decreases(a in gcounter_strategy(), b in gcounter_strategy()) {
        let joined = a.join(&b);
        prop_assert!(a.leq(&joined));
        prop_assert!(b.leq(&joined));
    }
}

// ============================================================================
// PNCounter Property Tests
// ============================================================================

proptest! {
    #[test]
    fn pncounter_join_is_commutative(a in pncounter_strategy(), b in pncounter_strategy()) {
        prop_assert_eq!(a.join(&b), b.join(&a));
    }

    #[test]
    fn pncounter_join_is_associative(
        a in pncounter_strategy(),
        b in pncounter_strategy(),
        c in pncounter_strategy()
    ) {
        prop_assert_eq!(a.join(&b).join(&c), a.join(&b.join(&c)));
    }

    #[test]
    fn pncounter_join_is_idempotent(a in pncounter_strategy()) {
        prop_assert_eq!(a.join(&a), a);
    }

    #[test]
    fn pncounter_bottom_is_identity(a in pncounter_strategy()) {
        prop_assert_eq!(a.join(&PNCounter::bottom()), a);
    }

    #[test]
    fn pncounter_read_is_increments_minus_decrements(
        adds in prop::collection::vec((0usize..3, -1000i64..1000), 0..20)
    ) {
        let expected: i64 = adds.iter().map(|(_, d)| d).sum();
        let counter = adds.iter().fold(PNCounter::new(), |c, (r, d)| c.add(REPLICAS[*r], *d));
        prop_assert_eq!(counter.read(), expected);
    }
}

// ============================================================================
// Convergence under arbitrary delivery order
// ============================================================================

proptest! {
    #[test]
    fn replicas_converge_regardless_of_merge_order(
        states in prop::collection::vec(pncounter_strategy(), 1..6),
        seed in any::<u64>()
    ) {
        let forward = states
            .iter()
            .fold(PNCounter::bottom(), |acc, s| acc.join(s));

        // deterministic shuffle with duplicates
        let mut shuffled: Vec<&PNCounter<String>> = states.iter().chain(states.iter()).collect();
        let mut x = seed | 1;
        for i in (1..shuffled.len()).rev() {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            shuffled.swap(i, (x % (i as u64 + 1)) as usize);
        }
        let reordered = shuffled
            .into_iter()
            .fold(PNCounter::bottom(), |acc, s| acc.join(s));

        prop_assert_eq!(forward, reordered);
    }
}

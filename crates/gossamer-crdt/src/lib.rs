//! State-based CRDTs for gossamer nodes.
//!
//! Every type here is an immutable value: mutators and [`Lattice::join`]
//! return a new value and never touch `self`. Servers that hold a CRDT keep it
//! behind a lock and rebind it to the returned value.
//!
//! - [`gset::GSet`]: grow-only set, serialized as a JSON array
//! - [`gcounter::GCounter`]: grow-only counter, serialized as a JSON object
//! - [`pncounter::PNCounter`]: a pair of G-Counters, serialized as `{inc, dec}`
//! - [`datum::Datum`]: a totally ordered JSON value usable as an element or key

pub mod datum;
pub mod gcounter;
pub mod gset;
pub mod lattice;
pub mod pncounter;

pub use datum::Datum;
pub use gcounter::GCounter;
pub use gset::GSet;
pub use lattice::Lattice;
pub use pncounter::PNCounter;

//! Operator node state primitives
//!
//! Deterministic data structures with no I/O:
//! - [`hash_ring::ConsistentHashRing`] maps stream parts to the nodes that
//!   should serve them, with replication.
//! - [`set_sync::SetMembershipSynchronizer`] merges snapshots and patches
//!   delivered out of order into one consistent set.

pub mod hash_ring;
pub mod set_sync;

pub use hash_ring::{ConsistentHashRing, VIRTUAL_NODES_PER_NODE};
pub use set_sync::{Diff, PatchOp, SetMembershipSynchronizer};

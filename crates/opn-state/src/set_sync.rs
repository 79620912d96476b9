//! Reconciles a set from full snapshots and incremental patches that may
//! arrive out of order.
//!
//! Every update carries a sequence number (typically a block number). A
//! snapshot replaces the state, except for elements touched by a newer
//! patch. A patch only affects elements whose last applied update is older.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchOp {
    Added,
    Removed,
}

/// Net effect of an update on the reconciled set. Both lists are sorted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diff<E> {
    pub added: Vec<E>,
    pub removed: Vec<E>,
}

impl<E> Diff<E> {
    pub fn empty() -> Self {
        Self { added: Vec::new(), removed: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

impl<E> Default for Diff<E> {
    fn default() -> Self {
        Self::empty()
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    seq: u64,
    present: bool,
}

#[derive(Debug, Clone)]
pub struct SetMembershipSynchronizer<E> {
    last_snapshot_seq: Option<u64>,
    entries: BTreeMap<E, Entry>,
}

impl<E: Ord + Clone> SetMembershipSynchronizer<E> {
    pub fn new() -> Self {
        Self { last_snapshot_seq: None, entries: BTreeMap::new() }
    }

    pub fn ingest_snapshot(&mut self, elements: impl IntoIterator<Item = E>, seq: u64) -> Diff<E> {
        if self.is_stale(seq) {
            return Diff::empty();
        }
        let before = self.state();

        let mut snapshot: Vec<E> = elements.into_iter().collect();
        snapshot.sort();
        snapshot.dedup();

        // Entries at or below `seq` are superseded by the snapshot.
        self.entries.retain(|element, entry| {
            entry.seq > seq || snapshot.binary_search(element).is_ok()
        });
        for element in snapshot {
            let entry = self.entries.entry(element).or_insert(Entry { seq, present: true });
            if entry.seq <= seq {
                *entry = Entry { seq, present: true };
            }
        }
        self.last_snapshot_seq = Some(seq);

        diff(&before, &self.state())
    }

    pub fn ingest_patch(&mut self, elements: impl IntoIterator<Item = E>, op: PatchOp, seq: u64) -> Diff<E> {
        if self.is_stale(seq) {
            return Diff::empty();
        }
        let before = self.state();

        let present = op == PatchOp::Added;
        for element in elements {
            match self.entries.get_mut(&element) {
                Some(entry) if entry.seq >= seq => {}
                Some(entry) => *entry = Entry { seq, present },
                None => {
                    self.entries.insert(element, Entry { seq, present });
                }
            }
        }

        diff(&before, &self.state())
    }

    /// Current members in ascending order.
    pub fn state(&self) -> Vec<E> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.present)
            .map(|(element, _)| element.clone())
            .collect()
    }

    pub fn contains(&self, element: &E) -> bool {
        self.entries.get(element).is_some_and(|e| e.present)
    }

    fn is_stale(&self, seq: u64) -> bool {
        self.last_snapshot_seq.is_some_and(|last| seq <= last)
    }
}

impl<E: Ord + Clone> Default for SetMembershipSynchronizer<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Both inputs must be sorted.
fn diff<E: Ord + Clone>(before: &[E], after: &[E]) -> Diff<E> {
    Diff {
        added: after.iter().filter(|e| before.binary_search(e).is_err()).cloned().collect(),
        removed: before.iter().filter(|e| after.binary_search(e).is_err()).cloned().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_equal_to_last_is_ignored() {
        let mut sync = SetMembershipSynchronizer::new();
        sync.ingest_snapshot([1, 2], 10);
        assert!(sync.ingest_snapshot([3], 10).is_empty());
        assert_eq!(sync.state(), vec![1, 2]);
    }

    #[test]
    fn duplicate_snapshot_elements_are_collapsed() {
        let mut sync = SetMembershipSynchronizer::new();
        let d = sync.ingest_snapshot([2, 1, 2], 1);
        assert_eq!(d.added, vec![1, 2]);
        assert!(sync.contains(&1));
        assert!(!sync.contains(&3));
    }

    #[test]
    fn patch_replayed_twice_is_idempotent() {
        let mut sync = SetMembershipSynchronizer::new();
        assert_eq!(sync.ingest_patch([7], PatchOp::Added, 4).added, vec![7]);
        assert!(sync.ingest_patch([7], PatchOp::Added, 4).is_empty());
        assert!(sync.ingest_patch([7], PatchOp::Removed, 4).is_empty());
        assert_eq!(sync.state(), vec![7]);
    }
}

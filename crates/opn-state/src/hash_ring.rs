//! Consistent hashing of stream parts onto fleet nodes.
//!
//! Every node contributes a fixed number of virtual points on a 64-bit ring.
//! A key is owned by the first `R` distinct nodes found walking clockwise from
//! the key's own position.

use std::collections::BTreeSet;

use opn_protocol::{NodeId, StreamPartId};
use sha2::{Digest, Sha256};

pub const VIRTUAL_NODES_PER_NODE: u32 = 100;

/// Position on the ring: the first 8 bytes of SHA-256, big endian.
fn ring_position(input: &str) -> u64 {
    let digest = Sha256::digest(input.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}

#[derive(Debug, Clone)]
pub struct ConsistentHashRing {
    replication_factor: usize,
    nodes: BTreeSet<NodeId>,
    /// Materialized ring: (position, index into `members`), sorted.
    points: Vec<(u64, usize)>,
    members: Vec<NodeId>,
    dirty: bool,
}

impl ConsistentHashRing {
    /// A replication factor of zero is treated as one.
    pub fn new(replication_factor: usize) -> Self {
        Self {
            replication_factor: replication_factor.max(1),
            nodes: BTreeSet::new(),
            points: Vec::new(),
            members: Vec::new(),
            dirty: false,
        }
    }

    pub fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    /// Returns `false` if the node was already present.
    pub fn add(&mut self, node: NodeId) -> bool {
        let inserted = self.nodes.insert(node);
        self.dirty |= inserted;
        inserted
    }

    /// Returns `false` if the node was not present.
    pub fn remove(&mut self, node: &NodeId) -> bool {
        let removed = self.nodes.remove(node);
        self.dirty |= removed;
        removed
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.nodes.contains(node)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes responsible for `part`, exactly `min(R, len())` of them.
    pub fn get(&mut self, part: &StreamPartId) -> Vec<NodeId> {
        self.get_by_key(&part.ring_key())
    }

    pub fn get_by_key(&mut self, key: &str) -> Vec<NodeId> {
        if self.dirty {
            self.rebuild();
        }
        if self.points.is_empty() {
            return Vec::new();
        }

        let wanted = self.replication_factor.min(self.members.len());
        let position = ring_position(key);
        let start = self.points.partition_point(|(p, _)| *p < position);

        let mut chosen: Vec<usize> = Vec::with_capacity(wanted);
        for offset in 0..self.points.len() {
            let (_, member) = self.points[(start + offset) % self.points.len()];
            if !chosen.contains(&member) {
                chosen.push(member);
                if chosen.len() == wanted {
                    break;
                }
            }
        }
        chosen.into_iter().map(|i| self.members[i].clone()).collect()
    }

    /// Rebuild from the sorted node set so insertion order never leaks into
    /// the layout. Ties on position are broken by member index.
    fn rebuild(&mut self) {
        self.members = self.nodes.iter().cloned().collect();
        self.points = self
            .members
            .iter()
            .enumerate()
            .flat_map(|(idx, node)| {
                (0..VIRTUAL_NODES_PER_NODE)
                    .map(move |v| (ring_position(&format!("{}#{}", node, v)), idx))
            })
            .collect();
        self.points.sort_unstable();
        self.dirty = false;
        tracing::trace!(nodes = self.members.len(), points = self.points.len(), "Hash ring rebuilt");
    }
}

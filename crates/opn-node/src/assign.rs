//! Offline view of the ring: which nodes serve each partition of a stream.

use anyhow::{bail, Result};
use opn_protocol::{NodeId, StreamId, StreamPartId};
use opn_state::ConsistentHashRing;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentRow {
    pub part: StreamPartId,
    pub nodes: Vec<NodeId>,
}

pub fn assignment_table(
    nodes: &[NodeId],
    stream: &StreamId,
    partitions: u32,
    redundancy_factor: usize,
) -> Result<Vec<AssignmentRow>> {
    if nodes.is_empty() {
        bail!("At least one node is required");
    }
    if redundancy_factor == 0 {
        bail!("Redundancy factor must be greater than zero");
    }
    let mut ring = ConsistentHashRing::new(redundancy_factor);
    for node in nodes {
        ring.add(node.clone());
    }
    let mut rows = Vec::new();
    for part in StreamPartId::all_of(stream, partitions) {
        let nodes = ring.get(&part);
        rows.push(AssignmentRow { part, nodes });
    }
    Ok(rows)
}

pub fn render(rows: &[AssignmentRow]) -> String {
    let mut out = String::new();
    for row in rows {
        let nodes: Vec<&str> = row.nodes.iter().map(NodeId::as_str).collect();
        out.push_str(&format!("{}\t{}\n", row.part, nodes.join(",")));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(ids: &[&str]) -> Vec<NodeId> {
        ids.iter().map(|id| NodeId::new(*id)).collect()
    }

    #[test]
    fn every_partition_gets_redundancy_factor_nodes() {
        let rows = assignment_table(&nodes(&["a", "b", "c"]), &StreamId::new("helloworld"), 10, 2).unwrap();
        assert_eq!(rows.len(), 10);
        for row in &rows {
            assert_eq!(row.nodes.len(), 2);
            assert_ne!(row.nodes[0], row.nodes[1]);
        }
    }

    #[test]
    fn node_order_does_not_matter() {
        let stream = StreamId::new("helloworld");
        let forward = assignment_table(&nodes(&["a", "b", "c"]), &stream, 20, 1).unwrap();
        let backward = assignment_table(&nodes(&["c", "b", "a"]), &stream, 20, 1).unwrap();
        assert_eq!(forward, backward);
    }

    #[test]
    fn rejects_empty_inputs() {
        let stream = StreamId::new("helloworld");
        assert!(assignment_table(&[], &stream, 1, 1).is_err());
        assert!(assignment_table(&nodes(&["a"]), &stream, 1, 0).is_err());
    }

    #[test]
    fn render_one_line_per_partition() {
        let rows = assignment_table(&nodes(&["a"]), &StreamId::new("s"), 3, 1).unwrap();
        let text = render(&rows);
        assert_eq!(text.lines().count(), 3);
        assert!(text.lines().all(|line| line.ends_with("\ta")));
    }
}

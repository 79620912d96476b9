//! Weak leader election: the smallest online node id leads.
//!
//! There are no terms and no quorum. Two nodes with different views of the
//! fleet may both believe they lead for a while; callers only use this to
//! avoid duplicate work, never for safety.

use std::sync::Arc;

use opn_protocol::NodeId;

use crate::FleetView;

pub type IsLeaderFn = Arc<dyn Fn() -> bool + Send + Sync>;

pub fn is_leader(view: &FleetView, my_node_id: &NodeId) -> bool {
    view.leader_node_id().as_ref() == Some(my_node_id)
}

/// Recomputes leadership on every call.
pub fn leader_fn(view: FleetView, my_node_id: NodeId) -> IsLeaderFn {
    Arc::new(move || is_leader(&view, &my_node_id))
}

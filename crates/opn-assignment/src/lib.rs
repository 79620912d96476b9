//! Stream partition assignment
//!
//! [`TopologyTracker`] follows which sponsorships (and therefore which
//! streams) the operator is staked in. [`PartitionAssignment`] combines that
//! with fleet membership and the consistent hash ring to decide which stream
//! parts this node must serve, emitting `Assigned`/`Unassigned` as the
//! inputs change.

pub mod partition_assignment;
pub mod topology;

pub use partition_assignment::{
    AssignmentChange, AssignmentEvent, AssignmentInput, PartitionAssignment, PeerDirectory,
};
pub use topology::{TopologyEvent, TopologyTracker};

use opn_protocol::ProtocolError;

#[derive(Debug, thiserror::Error)]
pub enum AssignmentError {
    #[error("Topology tracker already started")]
    AlreadyStarted,

    #[error("Chain error: {0}")]
    Chain(#[from] ProtocolError),
}

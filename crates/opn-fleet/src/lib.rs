//! Operator fleet membership
//!
//! Nodes of one operator announce themselves with periodic heartbeats on
//! the operator's coordination stream. [`FleetState`] listens to that
//! stream, tracks which nodes are online and prunes the silent ones. The
//! smallest online node id acts as the fleet leader.

pub mod fleet_state;
pub mod heartbeat;
pub mod leader;
pub mod local_bus;

pub use fleet_state::{FleetEvent, FleetState, FleetStateConfig, FleetStatus, FleetView, HeartbeatRecord};
pub use heartbeat::{publish_heartbeat, run_heartbeat_loop};
pub use leader::{is_leader, leader_fn, IsLeaderFn};
pub use local_bus::LocalBus;

use opn_protocol::ProtocolError;

/// Errors raised by fleet membership tracking.
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    #[error("Fleet state already started")]
    AlreadyStarted,

    #[error("Fleet state destroyed")]
    Destroyed,

    #[error("Coordination channel error: {0}")]
    Channel(#[from] ProtocolError),
}

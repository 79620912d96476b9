//! Operator accountability: inspection, flagging and vote-kick
//!
//! Operators police each other without a coordinator:
//! - [`target::find_target`] picks a random operator sharing one of our
//!   sponsorships, and a stream part we serve ourselves.
//! - [`over_time::InspectOverTime`] follows the target's fleet and
//!   repeatedly probes the nodes that should serve that part.
//! - [`flagging::inspect_random_node`] raises a flag when every conclusive
//!   inspection failed.
//! - [`review::ReviewHandler`] answers flags raised by others with a
//!   kick/no-kick vote at the middle of the voting window.
//!
//! Every step fails safe: when the outcome is uncertain, nothing is
//! flagged and no vote is cast.

pub mod flagging;
pub mod over_time;
pub mod review;
pub mod service;
pub mod target;
pub mod voting;

pub use flagging::{inspect_random_node, EpisodeOutcome};
pub use over_time::{
    channel_fleet_factory, find_nodes_for_target, FleetFactory, InspectOverTime, InspectOverTimeConfig,
    InspectionContext, InspectionProgress,
};
pub use review::{ReviewHandler, ReviewOutcome, ReviewStrategy};
pub use service::{InspectionService, InspectionServiceConfig};
pub use target::{find_target, pick_weighted, InspectionTarget};
pub use voting::{decide_kick, time_until_vote, vote_at_midpoint, VoteOutcome};

use opn_fleet::FleetError;
use opn_protocol::ProtocolError;

/// Errors raised by the inspection protocol.
#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Chain error: {0}")]
    Chain(#[from] ProtocolError),

    #[error("Fleet error: {0}")]
    Fleet(#[from] FleetError),
}

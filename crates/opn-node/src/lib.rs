//! Operator node - orchestration, configuration and local mode
//!
//! [`OperatorNode`] starts the fleet state, partition assignment, topology
//! tracker and heartbeat loop of a node, then once the fleet is ready
//! schedules the leader's contract announcement, random peer inspection and
//! review-request handling.

pub mod announce;
pub mod assign;
pub mod config;
pub mod local;
pub mod node;

pub use announce::announce_node_to_contract;
pub use assign::{assignment_table, AssignmentRow};
pub use config::NodeConfig;
pub use local::{local_environment, LocalEnvironment};
pub use node::{Collaborators, OperatorNode};

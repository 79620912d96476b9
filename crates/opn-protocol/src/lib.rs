//! Operator node protocol - core identifiers and interfaces
//!
//! Defines the identifiers shared by every subsystem of an operator node,
//! the JSON coordination messages exchanged inside an operator fleet, the
//! narrow interfaces to external collaborators (chain, pub/sub transport,
//! stream registry, network probe) and the cancellation primitives used by
//! every long-running loop.

pub mod abort;
pub mod constants;
pub mod error;
pub mod ids;
pub mod interfaces;
pub mod messages;
pub mod mock_chain;

pub use abort::{schedule_at_interval, sleep_or_abort, AbortController, AbortSignal};
pub use constants::*;
pub use error::*;
pub use ids::*;
pub use interfaces::*;
pub use messages::*;
pub use mock_chain::{FlagRecord, MockChain, VoteRecord};

//! Narrow interfaces to the collaborators the operator node consumes.
//!
//! Implementations wrap the chain client, the indexer, the pub/sub transport
//! and the network layer. Everything here is object safe so callers can hold
//! `Arc<dyn Trait>`.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::ids::{Address, PeerDescriptor, StreamId, StreamPartId};
use crate::messages::{ReviewRequest, StakeEvent};
use crate::ProtocolError;

/// A sponsorship the operator is staked in, as reported by the indexer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SponsorshipInfo {
    pub sponsorship: Address,
    pub stream_id: StreamId,
    /// Number of operators staked in the sponsorship, including ourselves.
    pub operator_count: u32,
}

/// Full set of sponsorships an operator is staked in at a given block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakedStreams {
    pub block_number: u64,
    pub sponsorships: Vec<(Address, StreamId)>,
}

/// Contract calls, chain event subscriptions and indexer queries.
pub trait ChainFacade: Send + Sync {
    fn sponsorships_of_operator<'a>(
        &'a self,
        operator: &'a Address,
    ) -> BoxFuture<'a, Result<Vec<SponsorshipInfo>, ProtocolError>>;

    fn operators_in_sponsorship<'a>(
        &'a self,
        sponsorship: &'a Address,
    ) -> BoxFuture<'a, Result<Vec<Address>, ProtocolError>>;

    fn stream_id_of_sponsorship<'a>(
        &'a self,
        sponsorship: &'a Address,
    ) -> BoxFuture<'a, Result<StreamId, ProtocolError>>;

    /// Raise a flag against `target`. The partition goes into the flag metadata.
    fn flag<'a>(
        &'a self,
        sponsorship: &'a Address,
        target: &'a Address,
        partition: u32,
    ) -> BoxFuture<'a, Result<(), ProtocolError>>;

    fn vote_on_flag<'a>(
        &'a self,
        sponsorship: &'a Address,
        target: &'a Address,
        kick: bool,
    ) -> BoxFuture<'a, Result<(), ProtocolError>>;

    fn has_open_flag<'a>(
        &'a self,
        operator: &'a Address,
        sponsorship: &'a Address,
    ) -> BoxFuture<'a, Result<bool, ProtocolError>>;

    /// A uniformly random operator other than `excluded`, `None` when there is none.
    fn random_operator<'a>(
        &'a self,
        excluded: &'a Address,
    ) -> BoxFuture<'a, Result<Option<Address>, ProtocolError>>;

    /// `None` when the operator never published a redundancy factor.
    fn fetch_redundancy_factor<'a>(
        &'a self,
        operator: &'a Address,
    ) -> BoxFuture<'a, Result<Option<u32>, ProtocolError>>;

    fn pull_staked_streams<'a>(
        &'a self,
        operator: &'a Address,
    ) -> BoxFuture<'a, Result<StakedStreams, ProtocolError>>;

    fn subscribe_stake_events<'a>(
        &'a self,
        operator: &'a Address,
    ) -> BoxFuture<'a, Result<mpsc::Receiver<StakeEvent>, ProtocolError>>;

    fn subscribe_review_requests<'a>(
        &'a self,
        operator: &'a Address,
    ) -> BoxFuture<'a, Result<mpsc::Receiver<ReviewRequest>, ProtocolError>>;

    fn write_heartbeat<'a>(
        &'a self,
        operator: &'a Address,
        descriptor: &'a PeerDescriptor,
    ) -> BoxFuture<'a, Result<(), ProtocolError>>;

    fn last_heartbeat_timestamp<'a>(
        &'a self,
        operator: &'a Address,
    ) -> BoxFuture<'a, Result<Option<DateTime<Utc>>, ProtocolError>>;
}

/// Pub/sub transport for coordination streams.
///
/// Dropping the returned receiver releases the subscription.
pub trait CoordinationChannel: Send + Sync {
    fn subscribe<'a>(
        &'a self,
        stream: &'a StreamId,
    ) -> BoxFuture<'a, Result<mpsc::Receiver<Vec<u8>>, ProtocolError>>;

    fn publish<'a>(
        &'a self,
        stream: &'a StreamId,
        payload: Vec<u8>,
    ) -> BoxFuture<'a, Result<(), ProtocolError>>;
}

/// Stream registry lookups.
pub trait StreamPartResolver: Send + Sync {
    /// Fails with [`ProtocolError::NotFound`] for streams that no longer exist.
    fn stream_parts<'a>(
        &'a self,
        stream: &'a StreamId,
    ) -> BoxFuture<'a, Result<Vec<StreamPartId>, ProtocolError>>;
}

/// Checks whether a peer actually serves a stream part.
pub trait NetworkProbe: Send + Sync {
    fn inspect<'a>(&'a self, peer: &'a PeerDescriptor, part: &'a StreamPartId) -> BoxFuture<'a, bool>;
}

//! In-memory chain for tests and local mode
//!
//! Keeps sponsorships, stakes, flags and votes in process memory. Stake
//! changes bump a fake block number and are pushed to stake event
//! subscribers, so the full snapshot-plus-events flow can be exercised
//! without a chain.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use rand::seq::SliceRandom;
use tokio::sync::{mpsc, Mutex};

use crate::ids::{Address, PeerDescriptor, StreamId};
use crate::interfaces::{ChainFacade, SponsorshipInfo, StakedStreams};
use crate::messages::{ReviewRequest, StakeEvent};
use crate::ProtocolError;

const SUBSCRIPTION_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagRecord {
    pub sponsorship: Address,
    pub target: Address,
    pub partition: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteRecord {
    pub sponsorship: Address,
    pub target: Address,
    pub kick: bool,
}

#[derive(Debug, Clone)]
struct Sponsorship {
    stream_id: StreamId,
    operators: BTreeSet<Address>,
}

#[derive(Default)]
struct ChainState {
    block_number: u64,
    sponsorships: BTreeMap<Address, Sponsorship>,
    redundancy_factors: HashMap<Address, u32>,
    open_flags: BTreeSet<(Address, Address)>,
    flags: Vec<FlagRecord>,
    votes: Vec<VoteRecord>,
    heartbeats: HashMap<Address, (PeerDescriptor, DateTime<Utc>)>,
    stake_subscribers: Vec<(Address, mpsc::Sender<StakeEvent>)>,
    review_subscribers: Vec<(Address, mpsc::Sender<ReviewRequest>)>,
}

#[derive(Default)]
pub struct MockChain {
    state: Mutex<ChainState>,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sponsorship of `stream_id` with an initial set of staked operators.
    pub async fn add_sponsorship(&self, sponsorship: Address, stream_id: StreamId, operators: &[Address]) {
        let mut state = self.state.lock().await;
        state.block_number += 1;
        state.sponsorships.insert(
            sponsorship,
            Sponsorship { stream_id, operators: operators.iter().cloned().collect() },
        );
    }

    pub async fn set_redundancy_factor(&self, operator: Address, redundancy_factor: u32) {
        self.state.lock().await.redundancy_factors.insert(operator, redundancy_factor);
    }

    pub async fn stake(&self, operator: &Address, sponsorship: &Address) -> Result<(), ProtocolError> {
        self.change_stake(operator, sponsorship, true).await
    }

    pub async fn unstake(&self, operator: &Address, sponsorship: &Address) -> Result<(), ProtocolError> {
        self.change_stake(operator, sponsorship, false).await
    }

    async fn change_stake(&self, operator: &Address, sponsorship: &Address, staked: bool) -> Result<(), ProtocolError> {
        let mut state = self.state.lock().await;
        state.block_number += 1;
        let block_number = state.block_number;
        let entry = state
            .sponsorships
            .get_mut(sponsorship)
            .ok_or_else(|| ProtocolError::NotFound(format!("sponsorship {sponsorship}")))?;
        let changed = if staked {
            entry.operators.insert(operator.clone())
        } else {
            entry.operators.remove(operator)
        };
        if !changed {
            return Ok(());
        }

        let event = if staked {
            StakeEvent::Staked { sponsorship: sponsorship.clone(), block_number }
        } else {
            StakeEvent::Unstaked { sponsorship: sponsorship.clone(), block_number }
        };
        state.stake_subscribers.retain(|(_, tx)| !tx.is_closed());
        for (subscriber, tx) in &state.stake_subscribers {
            if subscriber == operator && tx.try_send(event.clone()).is_err() {
                tracing::warn!(operator = %operator, "Stake event subscriber lagging, event dropped");
            }
        }
        Ok(())
    }

    /// Deliver a review request to the subscribers of `reviewer`.
    pub async fn send_review_request(&self, reviewer: &Address, request: ReviewRequest) {
        let mut state = self.state.lock().await;
        state.review_subscribers.retain(|(_, tx)| !tx.is_closed());
        for (subscriber, tx) in &state.review_subscribers {
            if subscriber == reviewer && tx.try_send(request.clone()).is_err() {
                tracing::warn!(operator = %reviewer, "Review request subscriber lagging, request dropped");
            }
        }
    }

    pub async fn open_flag(&self, target: Address, sponsorship: Address) {
        self.state.lock().await.open_flags.insert((target, sponsorship));
    }

    pub async fn flags(&self) -> Vec<FlagRecord> {
        self.state.lock().await.flags.clone()
    }

    pub async fn votes(&self) -> Vec<VoteRecord> {
        self.state.lock().await.votes.clone()
    }

    pub async fn heartbeat_of(&self, operator: &Address) -> Option<(PeerDescriptor, DateTime<Utc>)> {
        self.state.lock().await.heartbeats.get(operator).cloned()
    }

    pub async fn set_last_heartbeat(&self, operator: Address, peer: PeerDescriptor, at: DateTime<Utc>) {
        self.state.lock().await.heartbeats.insert(operator, (peer, at));
    }
}

impl ChainFacade for MockChain {
    fn sponsorships_of_operator<'a>(
        &'a self,
        operator: &'a Address,
    ) -> BoxFuture<'a, Result<Vec<SponsorshipInfo>, ProtocolError>> {
        async move {
            let state = self.state.lock().await;
            Ok(state
                .sponsorships
                .iter()
                .filter(|(_, s)| s.operators.contains(operator))
                .map(|(address, s)| SponsorshipInfo {
                    sponsorship: address.clone(),
                    stream_id: s.stream_id.clone(),
                    operator_count: s.operators.len() as u32,
                })
                .collect())
        }
        .boxed()
    }

    fn operators_in_sponsorship<'a>(
        &'a self,
        sponsorship: &'a Address,
    ) -> BoxFuture<'a, Result<Vec<Address>, ProtocolError>> {
        async move {
            let state = self.state.lock().await;
            state
                .sponsorships
                .get(sponsorship)
                .map(|s| s.operators.iter().cloned().collect())
                .ok_or_else(|| ProtocolError::NotFound(format!("sponsorship {sponsorship}")))
        }
        .boxed()
    }

    fn stream_id_of_sponsorship<'a>(
        &'a self,
        sponsorship: &'a Address,
    ) -> BoxFuture<'a, Result<StreamId, ProtocolError>> {
        async move {
            let state = self.state.lock().await;
            state
                .sponsorships
                .get(sponsorship)
                .map(|s| s.stream_id.clone())
                .ok_or_else(|| ProtocolError::NotFound(format!("sponsorship {sponsorship}")))
        }
        .boxed()
    }

    fn flag<'a>(
        &'a self,
        sponsorship: &'a Address,
        target: &'a Address,
        partition: u32,
    ) -> BoxFuture<'a, Result<(), ProtocolError>> {
        async move {
            let mut state = self.state.lock().await;
            if !state.open_flags.insert((target.clone(), sponsorship.clone())) {
                return Err(ProtocolError::Chain(format!("flag already open against {target}")));
            }
            state.flags.push(FlagRecord { sponsorship: sponsorship.clone(), target: target.clone(), partition });
            Ok(())
        }
        .boxed()
    }

    fn vote_on_flag<'a>(
        &'a self,
        sponsorship: &'a Address,
        target: &'a Address,
        kick: bool,
    ) -> BoxFuture<'a, Result<(), ProtocolError>> {
        async move {
            let mut state = self.state.lock().await;
            state.votes.push(VoteRecord { sponsorship: sponsorship.clone(), target: target.clone(), kick });
            Ok(())
        }
        .boxed()
    }

    fn has_open_flag<'a>(
        &'a self,
        operator: &'a Address,
        sponsorship: &'a Address,
    ) -> BoxFuture<'a, Result<bool, ProtocolError>> {
        async move {
            let state = self.state.lock().await;
            Ok(state.open_flags.contains(&(operator.clone(), sponsorship.clone())))
        }
        .boxed()
    }

    fn random_operator<'a>(
        &'a self,
        excluded: &'a Address,
    ) -> BoxFuture<'a, Result<Option<Address>, ProtocolError>> {
        async move {
            let state = self.state.lock().await;
            let operators: BTreeSet<&Address> = state
                .sponsorships
                .values()
                .flat_map(|s| s.operators.iter())
                .filter(|op| *op != excluded)
                .collect();
            let operators: Vec<&Address> = operators.into_iter().collect();
            Ok(operators.choose(&mut rand::thread_rng()).map(|op| (*op).clone()))
        }
        .boxed()
    }

    fn fetch_redundancy_factor<'a>(
        &'a self,
        operator: &'a Address,
    ) -> BoxFuture<'a, Result<Option<u32>, ProtocolError>> {
        async move { Ok(self.state.lock().await.redundancy_factors.get(operator).copied()) }.boxed()
    }

    fn pull_staked_streams<'a>(
        &'a self,
        operator: &'a Address,
    ) -> BoxFuture<'a, Result<StakedStreams, ProtocolError>> {
        async move {
            let state = self.state.lock().await;
            Ok(StakedStreams {
                block_number: state.block_number,
                sponsorships: state
                    .sponsorships
                    .iter()
                    .filter(|(_, s)| s.operators.contains(operator))
                    .map(|(address, s)| (address.clone(), s.stream_id.clone()))
                    .collect(),
            })
        }
        .boxed()
    }

    fn subscribe_stake_events<'a>(
        &'a self,
        operator: &'a Address,
    ) -> BoxFuture<'a, Result<mpsc::Receiver<StakeEvent>, ProtocolError>> {
        async move {
            let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
            self.state.lock().await.stake_subscribers.push((operator.clone(), tx));
            Ok(rx)
        }
        .boxed()
    }

    fn subscribe_review_requests<'a>(
        &'a self,
        operator: &'a Address,
    ) -> BoxFuture<'a, Result<mpsc::Receiver<ReviewRequest>, ProtocolError>> {
        async move {
            let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
            self.state.lock().await.review_subscribers.push((operator.clone(), tx));
            Ok(rx)
        }
        .boxed()
    }

    fn write_heartbeat<'a>(
        &'a self,
        operator: &'a Address,
        descriptor: &'a PeerDescriptor,
    ) -> BoxFuture<'a, Result<(), ProtocolError>> {
        async move {
            self.state
                .lock()
                .await
                .heartbeats
                .insert(operator.clone(), (descriptor.clone(), Utc::now()));
            Ok(())
        }
        .boxed()
    }

    fn last_heartbeat_timestamp<'a>(
        &'a self,
        operator: &'a Address,
    ) -> BoxFuture<'a, Result<Option<DateTime<Utc>>, ProtocolError>> {
        async move { Ok(self.state.lock().await.heartbeats.get(operator).map(|(_, at)| *at)) }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> Address {
        Address::parse(&format!("0x{}", format!("{n:02x}").repeat(20))).unwrap()
    }

    #[tokio::test]
    async fn stake_changes_reach_subscribers_and_snapshot() {
        let chain = MockChain::new();
        let me = addr(1);
        chain.add_sponsorship(addr(10), StreamId::new("s"), &[]).await;
        let mut events = chain.subscribe_stake_events(&me).await.unwrap();

        chain.stake(&me, &addr(10)).await.unwrap();
        let event = events.recv().await.unwrap();
        assert!(matches!(event, StakeEvent::Staked { .. }));

        let snapshot = chain.pull_staked_streams(&me).await.unwrap();
        assert_eq!(snapshot.sponsorships, vec![(addr(10), StreamId::new("s"))]);
        assert_eq!(snapshot.block_number, event.block_number());

        chain.unstake(&me, &addr(10)).await.unwrap();
        assert!(matches!(events.recv().await.unwrap(), StakeEvent::Unstaked { .. }));
    }

    #[tokio::test]
    async fn random_operator_skips_excluded() {
        let chain = MockChain::new();
        assert_eq!(chain.random_operator(&addr(1)).await.unwrap(), None);

        chain.add_sponsorship(addr(10), StreamId::new("s"), &[addr(1), addr(2)]).await;
        chain.add_sponsorship(addr(11), StreamId::new("t"), &[addr(1)]).await;
        for _ in 0..10 {
            assert_eq!(chain.random_operator(&addr(1)).await.unwrap(), Some(addr(2)));
        }
    }

    #[tokio::test]
    async fn flag_opens_flag_once() {
        let chain = MockChain::new();
        chain.flag(&addr(10), &addr(2), 3).await.unwrap();
        assert!(chain.has_open_flag(&addr(2), &addr(10)).await.unwrap());
        assert!(chain.flag(&addr(10), &addr(2), 3).await.is_err());
        assert_eq!(chain.flags().await.len(), 1);
    }
}

//! Which streams the operator is staked in.
//!
//! Sponsorship membership is reconciled from an indexer snapshot and live
//! stake events, each stamped with a block number. Several sponsorships
//! may fund the same stream, so streams are reference counted: a stream is
//! staked when its first sponsorship appears and unstaked when its last
//! one goes away.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use opn_protocol::{AbortSignal, Address, ChainFacade, StakeEvent, StakedStreams, StreamId};
use opn_state::{Diff, PatchOp, SetMembershipSynchronizer};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::AssignmentError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyEvent {
    StreamsStaked(Vec<StreamId>),
    StreamUnstaked(StreamId),
}

type Listener = Arc<dyn Fn(&TopologyEvent) + Send + Sync>;

#[derive(Default)]
struct Topology {
    sponsorships: SetMembershipSynchronizer<Address>,
    stream_of: HashMap<Address, StreamId>,
    stream_refs: BTreeMap<StreamId, usize>,
    /// Staked sponsorships whose stream lookup failed, retried on every update.
    unresolved: BTreeSet<Address>,
}

#[derive(Clone)]
pub struct TopologyTracker {
    operator: Address,
    chain: Arc<dyn ChainFacade>,
    inner: Arc<Mutex<Topology>>,
    listeners: Arc<StdMutex<Vec<Listener>>>,
    started: Arc<AtomicBool>,
}

impl TopologyTracker {
    pub fn new(operator: Address, chain: Arc<dyn ChainFacade>) -> Self {
        Self {
            operator,
            chain,
            inner: Arc::new(Mutex::new(Topology::default())),
            listeners: Arc::new(StdMutex::new(Vec::new())),
            started: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn on_change<F>(&self, listener: F)
    where
        F: Fn(&TopologyEvent) + Send + Sync + 'static,
    {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    /// Subscribe to stake events, ingest the current snapshot, then follow
    /// events until `signal` fires.
    ///
    /// The subscription is opened before the snapshot is pulled so that no
    /// event between the two is missed; events older than the snapshot are
    /// discarded by sequence number.
    pub async fn start(&self, signal: AbortSignal) -> Result<JoinHandle<()>, AssignmentError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(AssignmentError::AlreadyStarted);
        }
        let events = self.chain.subscribe_stake_events(&self.operator).await?;
        let snapshot = self.chain.pull_staked_streams(&self.operator).await?;
        tracing::info!(
            operator = %self.operator,
            block_number = snapshot.block_number,
            sponsorships = snapshot.sponsorships.len(),
            "Pulled staked streams"
        );
        self.ingest_snapshot(snapshot).await;

        let tracker = self.clone();
        Ok(tokio::spawn(tracker.follow(events, signal)))
    }

    async fn follow(self, mut events: mpsc::Receiver<StakeEvent>, signal: AbortSignal) {
        loop {
            tokio::select! {
                _ = signal.aborted() => break,
                event = events.recv() => match event {
                    Some(event) => self.ingest_event(event).await,
                    None => {
                        tracing::warn!(operator = %self.operator, "Stake event subscription closed");
                        break;
                    }
                },
            }
        }
    }

    pub async fn ingest_snapshot(&self, snapshot: StakedStreams) {
        let known: HashMap<Address, StreamId> = snapshot.sponsorships.iter().cloned().collect();
        let diff = {
            let mut inner = self.inner.lock().await;
            inner
                .sponsorships
                .ingest_snapshot(known.keys().cloned(), snapshot.block_number)
        };
        self.apply(diff, &known).await;
    }

    pub async fn ingest_event(&self, event: StakeEvent) {
        let op = match event {
            StakeEvent::Staked { .. } => PatchOp::Added,
            StakeEvent::Unstaked { .. } => PatchOp::Removed,
        };
        tracing::debug!(
            sponsorship = %event.sponsorship(),
            block_number = event.block_number(),
            ?op,
            "Stake event"
        );
        let diff = {
            let mut inner = self.inner.lock().await;
            inner
                .sponsorships
                .ingest_patch([event.sponsorship().clone()], op, event.block_number())
        };
        self.apply(diff, &HashMap::new()).await;
    }

    /// Streams with at least one staked sponsorship, in ascending order.
    pub async fn staked_streams(&self) -> Vec<StreamId> {
        self.inner.lock().await.stream_refs.keys().cloned().collect()
    }

    async fn apply(&self, diff: Diff<Address>, known: &HashMap<Address, StreamId>) {
        let candidates = {
            let mut guard = self.inner.lock().await;
            let inner = &mut *guard;
            for sponsorship in &diff.removed {
                inner.unresolved.remove(sponsorship);
            }
            let mut candidates = diff.added.clone();
            candidates.extend(
                inner
                    .unresolved
                    .iter()
                    .filter(|s| inner.sponsorships.contains(s) && !diff.added.contains(s))
                    .cloned(),
            );
            candidates
        };
        if candidates.is_empty() && diff.removed.is_empty() {
            return;
        }

        let mut resolved = Vec::with_capacity(candidates.len());
        let mut failed = Vec::new();
        for sponsorship in candidates {
            let stream = match known.get(&sponsorship) {
                Some(stream) => stream.clone(),
                None => match self.chain.stream_id_of_sponsorship(&sponsorship).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        tracing::warn!(sponsorship = %sponsorship, error = %e, "Unable to resolve stream of sponsorship, will retry");
                        failed.push(sponsorship);
                        continue;
                    }
                },
            };
            resolved.push((sponsorship, stream));
        }

        let mut staked = Vec::new();
        let mut unstaked = Vec::new();
        {
            let mut inner = self.inner.lock().await;
            for sponsorship in failed {
                if inner.sponsorships.contains(&sponsorship) {
                    inner.unresolved.insert(sponsorship);
                }
            }
            for (sponsorship, stream) in resolved {
                inner.unresolved.remove(&sponsorship);
                if !inner.sponsorships.contains(&sponsorship) || inner.stream_of.contains_key(&sponsorship) {
                    continue;
                }
                inner.stream_of.insert(sponsorship, stream.clone());
                let refs = inner.stream_refs.entry(stream.clone()).or_insert(0);
                *refs += 1;
                if *refs == 1 {
                    staked.push(stream);
                }
            }
            for sponsorship in diff.removed {
                let Some(stream) = inner.stream_of.remove(&sponsorship) else {
                    continue;
                };
                if let Some(refs) = inner.stream_refs.get_mut(&stream) {
                    *refs -= 1;
                    if *refs == 0 {
                        inner.stream_refs.remove(&stream);
                        unstaked.push(stream);
                    }
                }
            }
        }

        if !staked.is_empty() {
            tracing::info!(operator = %self.operator, streams = ?staked, "Streams staked");
            self.notify(&TopologyEvent::StreamsStaked(staked));
        }
        for stream in unstaked {
            tracing::info!(operator = %self.operator, stream = %stream, "Stream unstaked");
            self.notify(&TopologyEvent::StreamUnstaked(stream));
        }
    }

    fn notify(&self, event: &TopologyEvent) {
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener(event);
        }
    }
}

//! Inspection of one target over a period of time.
//!
//! A single probe says little: the target's nodes may be restarting, or our
//! view of its fleet may be stale. [`InspectOverTime`] therefore follows the
//! target operator's fleet and repeats the inspection several times with a
//! fixed interval, collecting one pass/fail result per conclusive attempt.
//!
//! Each attempt:
//! 1. fetches the target's redundancy factor,
//! 2. places the target's online nodes on a consistent hash ring and takes
//!    the nodes that should serve the inspected stream part,
//! 3. probes those nodes in random order until one of them passes.
//!
//! An attempt is inconclusive (and not recorded) when the redundancy factor
//! is unknown or no online node is responsible for the part.

use std::sync::Arc;
use std::time::Duration;

use opn_fleet::{FleetState, FleetStateConfig};
use opn_protocol::constants::{
    DEFAULT_HEARTBEAT_TIMEOUT_MS, DEFAULT_INSPECTION_INTERVAL_MS, DEFAULT_MAX_DELAY_BEFORE_FIRST_INSPECTION_MS,
    DEFAULT_MAX_INSPECTION_COUNT,
};
use opn_protocol::{
    AbortController, AbortSignal, Address, ChainFacade, CoordinationChannel, NetworkProbe, NodeId, PeerDescriptor,
    StreamPartId,
};
use opn_state::ConsistentHashRing;
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::InspectionTarget;

// ---------------------------------------------------------------------------
// Configuration and collaborators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct InspectOverTimeConfig {
    /// How long to wait for the target's fleet to become ready.
    pub heartbeat_timeout: Duration,
    /// Upper bound of the random delay before the first attempt.
    pub max_delay_before_first_inspection: Duration,
    pub max_inspections: u32,
    pub inspection_interval: Duration,
}

impl Default for InspectOverTimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_millis(DEFAULT_HEARTBEAT_TIMEOUT_MS),
            max_delay_before_first_inspection: Duration::from_millis(DEFAULT_MAX_DELAY_BEFORE_FIRST_INSPECTION_MS),
            max_inspections: DEFAULT_MAX_INSPECTION_COUNT,
            inspection_interval: Duration::from_millis(DEFAULT_INSPECTION_INTERVAL_MS),
        }
    }
}

/// Builds an unstarted fleet state for a target operator.
pub type FleetFactory = Arc<dyn Fn(&Address) -> FleetState + Send + Sync>;

/// Fleet states that listen on `channel`.
pub fn channel_fleet_factory(channel: Arc<dyn CoordinationChannel>, config: FleetStateConfig) -> FleetFactory {
    Arc::new(move |operator: &Address| FleetState::new(operator.clone(), channel.clone(), config.clone()))
}

/// Collaborators shared by every inspection.
#[derive(Clone)]
pub struct InspectionContext {
    pub chain: Arc<dyn ChainFacade>,
    pub probe: Arc<dyn NetworkProbe>,
    pub fleet_factory: FleetFactory,
}

/// The nodes among `online` that should serve `part` when the target runs
/// with `redundancy_factor`.
pub fn find_nodes_for_target(
    online: &[PeerDescriptor],
    redundancy_factor: usize,
    part: &StreamPartId,
) -> Vec<PeerDescriptor> {
    if online.is_empty() || redundancy_factor == 0 {
        return Vec::new();
    }
    let mut ring = ConsistentHashRing::new(redundancy_factor);
    for peer in online {
        ring.add(peer.node_id.clone());
    }
    let owners: Vec<NodeId> = ring.get(part);
    owners
        .iter()
        .filter_map(|node| online.iter().find(|p| p.node_id == *node).cloned())
        .collect()
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Results gathered so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InspectionProgress {
    pub results: Vec<bool>,
    pub done: bool,
}

impl InspectionProgress {
    pub fn any_passed(&self) -> bool {
        self.results.iter().any(|r| *r)
    }
}

// ---------------------------------------------------------------------------
// Inspection task
// ---------------------------------------------------------------------------

/// A running inspection of one target. Dropping it aborts the inspection.
pub struct InspectOverTime {
    target: InspectionTarget,
    progress: watch::Receiver<InspectionProgress>,
    abort: AbortController,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl InspectOverTime {
    /// Spawn the inspection. It ends after `max_inspections` attempts, or
    /// as soon as `parent` or [`InspectOverTime::stop`] aborts it.
    pub fn start(
        target: InspectionTarget,
        context: InspectionContext,
        config: InspectOverTimeConfig,
        parent: AbortSignal,
    ) -> Self {
        let (progress_tx, progress) = watch::channel(InspectionProgress::default());
        let abort = AbortController::new();
        let inspector = Inspector { target: target.clone(), context, config, progress: progress_tx };
        let task = tokio::spawn(inspector.run(parent, abort.signal()));
        Self { target, progress, abort, task: Mutex::new(Some(task)) }
    }

    pub fn target(&self) -> &InspectionTarget {
        &self.target
    }

    pub fn progress(&self) -> InspectionProgress {
        self.progress.borrow().clone()
    }

    pub fn results(&self) -> Vec<bool> {
        self.progress.borrow().results.clone()
    }

    /// Resolves on the first pass or when the inspection ends, whichever
    /// comes first. Returns whether any attempt passed.
    pub async fn wait_for_result(&self) -> bool {
        let mut progress = self.progress.clone();
        let passed = match progress.wait_for(|p| p.done || p.any_passed()).await {
            Ok(p) => p.any_passed(),
            Err(_) => self.progress.borrow().any_passed(),
        };
        passed
    }

    /// Resolves when every attempt has run or the inspection was aborted.
    pub async fn wait_until_done(&self) -> Vec<bool> {
        let mut progress = self.progress.clone();
        let results = match progress.wait_for(|p| p.done).await {
            Ok(p) => p.results.clone(),
            Err(_) => self.results(),
        };
        results
    }

    /// Abort the remaining attempts and wait until the target's fleet state
    /// has been released. Returns the results gathered so far.
    pub async fn stop(&self) -> Vec<bool> {
        self.abort.abort();
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(inspection = %self.target, error = %e, "Inspection task ended abnormally");
            }
        }
        self.results()
    }
}

impl Drop for InspectOverTime {
    fn drop(&mut self) {
        self.abort.abort();
    }
}

struct Inspector {
    target: InspectionTarget,
    context: InspectionContext,
    config: InspectOverTimeConfig,
    progress: watch::Sender<InspectionProgress>,
}

impl Inspector {
    async fn run(self, parent: AbortSignal, own: AbortSignal) {
        let fleet = (self.context.fleet_factory)(&self.target.operator);
        tokio::select! {
            _ = parent.aborted() => {
                tracing::debug!(inspection = %self.target, "Inspection aborted");
            }
            _ = own.aborted() => {
                tracing::debug!(inspection = %self.target, "Inspection stopped");
            }
            _ = self.inspect(&fleet) => {}
        }
        fleet.destroy().await;
        self.progress.send_modify(|p| p.done = true);
    }

    async fn inspect(&self, fleet: &FleetState) {
        if let Err(e) = fleet.start().await {
            tracing::warn!(inspection = %self.target, error = %e, "Unable to follow fleet of target");
            return;
        }
        if !fleet.wait_until_ready(Some(self.config.heartbeat_timeout)).await {
            tracing::info!(inspection = %self.target, "Fleet of target not ready in time, inspecting anyway");
        }

        let max_delay = self.config.max_delay_before_first_inspection.as_millis() as u64;
        if max_delay > 0 {
            let delay = rand::thread_rng().gen_range(0..max_delay);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        for attempt in 0..self.config.max_inspections {
            if attempt > 0 {
                tokio::time::sleep(self.config.inspection_interval).await;
            }
            match self.attempt(fleet).await {
                Some(passed) => {
                    tracing::info!(inspection = %self.target, attempt, passed, "Inspection attempt finished");
                    self.progress.send_modify(|p| p.results.push(passed));
                }
                None => {
                    tracing::info!(inspection = %self.target, attempt, "Inspection attempt inconclusive");
                }
            }
        }
    }

    /// `None` when the attempt cannot tell anything about the target.
    async fn attempt(&self, fleet: &FleetState) -> Option<bool> {
        let redundancy_factor = match self.context.chain.fetch_redundancy_factor(&self.target.operator).await {
            Ok(Some(factor)) => factor as usize,
            Ok(None) => {
                tracing::warn!(operator = %self.target.operator, "Redundancy factor of target unknown");
                return None;
            }
            Err(e) => {
                tracing::warn!(operator = %self.target.operator, error = %e, "Unable to fetch redundancy factor");
                return None;
            }
        };

        let view = fleet.view();
        let online: Vec<PeerDescriptor> = view
            .node_ids()
            .iter()
            .filter_map(|node| view.peer_descriptor(node))
            .collect();
        let mut candidates = find_nodes_for_target(&online, redundancy_factor, &self.target.stream_part);
        if candidates.is_empty() {
            tracing::warn!(inspection = %self.target, online = online.len(), "No online node of target serves the stream part");
            return None;
        }
        candidates.shuffle(&mut rand::thread_rng());

        for peer in &candidates {
            if self.context.probe.inspect(peer, &self.target.stream_part).await {
                tracing::debug!(inspection = %self.target, node_id = %peer.node_id, "Node serves stream part");
                return Some(true);
            }
            tracing::debug!(inspection = %self.target, node_id = %peer.node_id, "Node does not serve stream part");
        }
        Some(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opn_protocol::StreamId;

    fn peers(ids: &[&str]) -> Vec<PeerDescriptor> {
        ids.iter().map(|id| PeerDescriptor::new(NodeId::new(*id))).collect()
    }

    fn part() -> StreamPartId {
        StreamPartId::new(StreamId::new("stream"), 4).unwrap()
    }

    #[test]
    fn no_online_nodes_no_candidates() {
        assert!(find_nodes_for_target(&[], 2, &part()).is_empty());
    }

    #[test]
    fn zero_redundancy_factor_no_candidates() {
        assert!(find_nodes_for_target(&peers(&["a", "b"]), 0, &part()).is_empty());
    }

    #[test]
    fn candidates_follow_redundancy_factor() {
        let online = peers(&["a", "b", "c"]);
        assert_eq!(find_nodes_for_target(&online, 1, &part()).len(), 1);

        let two = find_nodes_for_target(&online, 2, &part());
        assert_eq!(two.len(), 2);
        assert_ne!(two[0].node_id, two[1].node_id);

        // Never more candidates than online nodes.
        assert_eq!(find_nodes_for_target(&online, 5, &part()).len(), 3);
    }

    #[test]
    fn progress_tracks_passes() {
        let mut progress = InspectionProgress::default();
        assert!(!progress.any_passed());
        progress.results.extend([false, true]);
        assert!(progress.any_passed());
    }
}

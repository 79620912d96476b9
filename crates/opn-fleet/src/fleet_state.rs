use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use opn_protocol::constants::{
    DEFAULT_HEARTBEAT_UPDATE_INTERVAL_MS, DEFAULT_LATENCY_EXTRA_MS, DEFAULT_PRUNE_AGE_MS,
    DEFAULT_PRUNE_INTERVAL_MS, DEFAULT_WARMUP_PERIOD_MS,
};
use opn_protocol::{
    AbortController, AbortSignal, Address, CoordinationChannel, CoordinationMessage, NodeId,
    PeerDescriptor, StreamId,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::FleetError;

#[derive(Debug, Clone)]
pub struct FleetStateConfig {
    /// Nodes silent for at least this long are dropped.
    pub prune_age: Duration,
    pub prune_interval: Duration,
    /// Interval at which fleet members publish heartbeats.
    pub heartbeat_interval: Duration,
    /// Extra wait on top of `heartbeat_interval` after the first heartbeat
    /// before the fleet is considered complete.
    pub latency_extra: Duration,
    /// The fleet is ready at the latest this long after start.
    pub warmup_period: Duration,
}

impl Default for FleetStateConfig {
    fn default() -> Self {
        Self {
            prune_age: Duration::from_millis(DEFAULT_PRUNE_AGE_MS),
            prune_interval: Duration::from_millis(DEFAULT_PRUNE_INTERVAL_MS),
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_UPDATE_INTERVAL_MS),
            latency_extra: Duration::from_millis(DEFAULT_LATENCY_EXTRA_MS),
            warmup_period: Duration::from_millis(DEFAULT_WARMUP_PERIOD_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatRecord {
    pub last_seen: Instant,
    pub peer: PeerDescriptor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FleetEvent {
    Added(NodeId),
    Removed(NodeId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FleetStatus {
    Stopped,
    Starting,
    Ready,
    Destroyed,
}

type Members = BTreeMap<NodeId, HeartbeatRecord>;
type Listener = Arc<dyn Fn(&FleetEvent) + Send + Sync>;
type Listeners = Arc<Mutex<Vec<Listener>>>;

/// Read-only handle on a fleet's membership. Cheap to clone.
#[derive(Debug, Clone)]
pub struct FleetView {
    members: watch::Receiver<Members>,
    ready: watch::Receiver<bool>,
}

impl FleetView {
    /// Online node ids in ascending order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.members.borrow().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.members.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.borrow().is_empty()
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.members.borrow().contains_key(node)
    }

    pub fn peer_descriptor(&self, node: &NodeId) -> Option<PeerDescriptor> {
        self.members.borrow().get(node).map(|r| r.peer.clone())
    }

    /// Smallest online node id.
    pub fn leader_node_id(&self) -> Option<NodeId> {
        self.members.borrow().keys().next().cloned()
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Wait for the ready gate, giving up after `timeout`. Returns whether
    /// the fleet is ready.
    pub async fn wait_until_ready(&self, timeout: Option<Duration>) -> bool {
        let mut ready = self.ready.clone();
        let gate = async move { ready.wait_for(|r| *r).await.is_ok() };
        match timeout {
            Some(limit) => tokio::time::timeout(limit, gate).await.unwrap_or(false),
            None => gate.await,
        }
    }
}

/// Membership of one operator's fleet, fed by heartbeats on its
/// coordination stream.
///
/// All mutation happens inside a single spawned task, so heartbeat handling
/// and the prune sweep never interleave.
pub struct FleetState {
    operator: Address,
    stream_id: StreamId,
    config: FleetStateConfig,
    channel: Arc<dyn CoordinationChannel>,
    members: Arc<watch::Sender<Members>>,
    ready: Arc<watch::Sender<bool>>,
    listeners: Listeners,
    started: AtomicBool,
    destroyed: AtomicBool,
    abort: AbortController,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FleetState {
    pub fn new(operator: Address, channel: Arc<dyn CoordinationChannel>, config: FleetStateConfig) -> Self {
        let (members, _) = watch::channel(Members::new());
        let (ready, _) = watch::channel(false);
        Self {
            stream_id: StreamId::coordination_stream(&operator),
            operator,
            config,
            channel,
            members: Arc::new(members),
            ready: Arc::new(ready),
            listeners: Arc::new(Mutex::new(Vec::new())),
            started: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            abort: AbortController::new(),
            task: Mutex::new(None),
        }
    }

    pub fn operator(&self) -> &Address {
        &self.operator
    }

    pub fn view(&self) -> FleetView {
        FleetView { members: self.members.subscribe(), ready: self.ready.subscribe() }
    }

    pub fn status(&self) -> FleetStatus {
        if self.destroyed.load(Ordering::SeqCst) {
            FleetStatus::Destroyed
        } else if !self.started.load(Ordering::SeqCst) {
            FleetStatus::Stopped
        } else if *self.ready.borrow() {
            FleetStatus::Ready
        } else {
            FleetStatus::Starting
        }
    }

    /// Register an observer. Callbacks run on the fleet task and must not block.
    pub fn on_change<F>(&self, listener: F)
    where
        F: Fn(&FleetEvent) + Send + Sync + 'static,
    {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    pub async fn start(&self) -> Result<(), FleetError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(FleetError::Destroyed);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(FleetError::AlreadyStarted);
        }

        let inbound = match self.channel.subscribe(&self.stream_id).await {
            Ok(rx) => rx,
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };

        let worker = FleetWorker {
            operator: self.operator.clone(),
            config: self.config.clone(),
            members: self.members.clone(),
            ready: self.ready.clone(),
            listeners: self.listeners.clone(),
        };
        let handle = tokio::spawn(worker.run(inbound, self.abort.signal()));
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        tracing::info!(operator = %self.operator, stream = %self.stream_id, "Fleet state started");
        Ok(())
    }

    /// Stop the fleet task and release the subscription. Idempotent.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.abort.abort();
        let handle = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(operator = %self.operator, error = %e, "Fleet task ended abnormally");
            }
        }
        tracing::debug!(operator = %self.operator, "Fleet state destroyed");
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.view().node_ids()
    }

    pub fn peer_descriptor(&self, node: &NodeId) -> Option<PeerDescriptor> {
        self.view().peer_descriptor(node)
    }

    pub fn leader_node_id(&self) -> Option<NodeId> {
        self.view().leader_node_id()
    }

    pub async fn wait_until_ready(&self, timeout: Option<Duration>) -> bool {
        self.view().wait_until_ready(timeout).await
    }
}

impl Drop for FleetState {
    fn drop(&mut self) {
        self.abort.abort();
    }
}

struct FleetWorker {
    operator: Address,
    config: FleetStateConfig,
    members: Arc<watch::Sender<Members>>,
    ready: Arc<watch::Sender<bool>>,
    listeners: Listeners,
}

impl FleetWorker {
    async fn run(self, mut inbound: mpsc::Receiver<Vec<u8>>, signal: AbortSignal) {
        let started_at = Instant::now();
        let mut prune = tokio::time::interval_at(
            started_at + self.config.prune_interval,
            self.config.prune_interval,
        );
        let ready_timer = tokio::time::sleep_until(started_at + self.config.warmup_period);
        tokio::pin!(ready_timer);
        let mut ready_deadline = started_at + self.config.warmup_period;
        let mut first_heartbeat_seen = false;
        let mut inbound_open = true;

        loop {
            tokio::select! {
                _ = signal.aborted() => break,
                payload = inbound.recv(), if inbound_open => {
                    let Some(payload) = payload else {
                        tracing::warn!(operator = %self.operator, "Coordination subscription closed");
                        inbound_open = false;
                        continue;
                    };
                    if self.handle_payload(&payload) && !first_heartbeat_seen {
                        first_heartbeat_seen = true;
                        let candidate = Instant::now()
                            + self.config.heartbeat_interval
                            + self.config.latency_extra;
                        if candidate < ready_deadline {
                            ready_deadline = candidate;
                            ready_timer.as_mut().reset(candidate);
                        }
                    }
                }
                _ = prune.tick() => self.prune(),
                _ = &mut ready_timer, if !*self.ready.borrow() => {
                    self.ready.send_replace(true);
                    tracing::info!(
                        operator = %self.operator,
                        nodes = self.members.borrow().len(),
                        "Fleet state ready"
                    );
                }
            }
        }
    }

    /// Returns `true` if the payload was a valid heartbeat.
    fn handle_payload(&self, payload: &[u8]) -> bool {
        let peer = match CoordinationMessage::decode(payload) {
            Ok(CoordinationMessage::Heartbeat(peer)) => peer,
            Err(e) => {
                tracing::warn!(operator = %self.operator, error = %e, "Dropping malformed coordination message");
                return false;
            }
        };

        let node_id = peer.node_id.clone();
        let record = HeartbeatRecord { last_seen: Instant::now(), peer };
        let mut added = false;
        self.members.send_modify(|members| {
            added = members.insert(node_id.clone(), record).is_none();
        });
        if added {
            tracing::info!(operator = %self.operator, node_id = %node_id, "Fleet node added");
            self.notify(&FleetEvent::Added(node_id));
        } else {
            tracing::trace!(operator = %self.operator, node_id = %node_id, "Heartbeat refreshed");
        }
        true
    }

    fn prune(&self) {
        let now = Instant::now();
        let prune_age = self.config.prune_age;
        let mut removed = Vec::new();
        self.members.send_if_modified(|members| {
            members.retain(|node_id, record| {
                let keep = now.duration_since(record.last_seen) < prune_age;
                if !keep {
                    removed.push(node_id.clone());
                }
                keep
            });
            !removed.is_empty()
        });
        for node_id in removed {
            tracing::info!(operator = %self.operator, node_id = %node_id, "Fleet node pruned");
            self.notify(&FleetEvent::Removed(node_id));
        }
    }

    fn notify(&self, event: &FleetEvent) {
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

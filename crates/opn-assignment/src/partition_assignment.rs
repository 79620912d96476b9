use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use opn_fleet::{FleetEvent, FleetState, FleetView};
use opn_protocol::{
    AbortController, AbortSignal, NodeId, PeerDescriptor, StreamId, StreamPartId, StreamPartResolver,
};
use opn_state::ConsistentHashRing;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::TopologyEvent;

/// Lookup of the peer descriptor of a fleet member.
pub trait PeerDirectory: Send + Sync {
    fn peer_descriptor(&self, node: &NodeId) -> Option<PeerDescriptor>;
}

impl PeerDirectory for FleetView {
    fn peer_descriptor(&self, node: &NodeId) -> Option<PeerDescriptor> {
        FleetView::peer_descriptor(self, node)
    }
}

/// An input that may change which stream parts this node owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentChange {
    NodeAdded(NodeId),
    NodeRemoved(NodeId),
    StreamsStaked(Vec<StreamId>),
    StreamUnstaked(StreamId),
}

impl From<FleetEvent> for AssignmentChange {
    fn from(event: FleetEvent) -> Self {
        match event {
            FleetEvent::Added(node) => Self::NodeAdded(node),
            FleetEvent::Removed(node) => Self::NodeRemoved(node),
        }
    }
}

impl From<TopologyEvent> for AssignmentChange {
    fn from(event: TopologyEvent) -> Self {
        match event {
            TopologyEvent::StreamsStaked(streams) => Self::StreamsStaked(streams),
            TopologyEvent::StreamUnstaked(stream) => Self::StreamUnstaked(stream),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentEvent {
    Assigned(StreamPartId),
    Unassigned(StreamPartId),
}

enum LaneItem {
    Change(AssignmentChange),
    Barrier(oneshot::Sender<()>),
}

/// Sending half of the assignment lane. Cheap to clone, never blocks.
#[derive(Clone)]
pub struct AssignmentInput {
    tx: mpsc::UnboundedSender<LaneItem>,
}

impl AssignmentInput {
    pub fn submit(&self, change: impl Into<AssignmentChange>) {
        if self.tx.send(LaneItem::Change(change.into())).is_err() {
            tracing::debug!("Assignment lane closed, change dropped");
        }
    }
}

type Listener = Arc<dyn Fn(&AssignmentEvent) + Send + Sync>;
type Listeners = Arc<StdMutex<Vec<Listener>>>;

struct AssignmentState {
    ring: ConsistentHashRing,
    /// Known streams in the order they were first staked.
    streams: Vec<(StreamId, Vec<StreamPartId>)>,
    mine: Vec<StreamPartId>,
}

impl AssignmentState {
    fn upsert_stream(&mut self, stream: StreamId, parts: Vec<StreamPartId>) {
        match self.streams.iter_mut().find(|(id, _)| *id == stream) {
            Some((_, existing)) => *existing = parts,
            None => self.streams.push((stream, parts)),
        }
    }

    fn remove_stream(&mut self, stream: &StreamId) {
        self.streams.retain(|(id, _)| id != stream);
    }

    fn parts_of(&self, stream: &StreamId) -> Option<&[StreamPartId]> {
        self.streams
            .iter()
            .find(|(id, _)| id == stream)
            .map(|(_, parts)| parts.as_slice())
    }

    /// Recompute ownership and return the transitions: assignments first in
    /// key-universe order, then unassignments.
    fn recompute(&mut self, me: &NodeId) -> Vec<AssignmentEvent> {
        let mut next = Vec::new();
        for (_, parts) in &self.streams {
            for part in parts {
                if self.ring.get(part).contains(me) {
                    next.push(part.clone());
                }
            }
        }

        let before: HashSet<&StreamPartId> = self.mine.iter().collect();
        let after: HashSet<&StreamPartId> = next.iter().collect();
        let mut events: Vec<AssignmentEvent> = next
            .iter()
            .filter(|p| !before.contains(p))
            .cloned()
            .map(AssignmentEvent::Assigned)
            .collect();
        events.extend(
            self.mine
                .iter()
                .filter(|p| !after.contains(p))
                .cloned()
                .map(AssignmentEvent::Unassigned),
        );

        self.mine = next;
        events
    }
}

/// Maintains the set of stream parts this node is responsible for.
///
/// Every input goes through one FIFO lane drained by a single task, so a
/// change (including its stream lookups) is fully applied before the next
/// one starts.
pub struct PartitionAssignment {
    my_node_id: NodeId,
    input: AssignmentInput,
    state: Arc<Mutex<AssignmentState>>,
    peers: Arc<dyn PeerDirectory>,
    listeners: Listeners,
    abort: AbortController,
}

impl PartitionAssignment {
    /// Must be called within a tokio runtime. The ring starts with only the
    /// local node.
    pub fn new(
        my_node_id: NodeId,
        redundancy_factor: usize,
        resolver: Arc<dyn StreamPartResolver>,
        peers: Arc<dyn PeerDirectory>,
    ) -> Self {
        let mut ring = ConsistentHashRing::new(redundancy_factor);
        ring.add(my_node_id.clone());
        let state = Arc::new(Mutex::new(AssignmentState { ring, streams: Vec::new(), mine: Vec::new() }));
        let listeners: Listeners = Arc::new(StdMutex::new(Vec::new()));
        let abort = AbortController::new();
        let (tx, rx) = mpsc::unbounded_channel();

        let worker = AssignmentWorker {
            my_node_id: my_node_id.clone(),
            resolver,
            state: state.clone(),
            listeners: listeners.clone(),
        };
        tokio::spawn(worker.run(rx, abort.signal()));

        Self { my_node_id, input: AssignmentInput { tx }, state, peers, listeners, abort }
    }

    pub fn my_node_id(&self) -> &NodeId {
        &self.my_node_id
    }

    pub fn input(&self) -> AssignmentInput {
        self.input.clone()
    }

    pub fn submit(&self, change: impl Into<AssignmentChange>) {
        self.input.submit(change);
    }

    /// Feed fleet membership changes into the lane.
    pub fn attach_fleet(&self, fleet: &FleetState) {
        let input = self.input();
        fleet.on_change(move |event| input.submit(event.clone()));
    }

    /// Register an observer. Callbacks run on the lane task and must not block.
    pub fn on_change<F>(&self, listener: F)
    where
        F: Fn(&AssignmentEvent) + Send + Sync + 'static,
    {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    /// Resolves once every change submitted before this call has been applied.
    pub async fn settled(&self) {
        let (tx, rx) = oneshot::channel();
        if self.input.tx.send(LaneItem::Barrier(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    pub async fn my_stream_parts(&self) -> Vec<StreamPartId> {
        self.state.lock().await.mine.clone()
    }

    pub async fn partitions_of_stream_assigned_to_me(&self, stream: &StreamId) -> Vec<StreamPartId> {
        self.state
            .lock()
            .await
            .mine
            .iter()
            .filter(|p| p.stream_id == *stream)
            .cloned()
            .collect()
    }

    pub async fn is_any_partition_of_stream_assigned_to_me(&self, stream: &StreamId) -> bool {
        self.state.lock().await.mine.iter().any(|p| p.stream_id == *stream)
    }

    /// Peers that should serve `part` according to the ring. Empty when the
    /// stream is not staked.
    pub async fn assigned_nodes_for_stream_part(&self, part: &StreamPartId) -> Vec<PeerDescriptor> {
        let mut state = self.state.lock().await;
        let known = state
            .parts_of(&part.stream_id)
            .is_some_and(|parts| parts.contains(part));
        if !known {
            return Vec::new();
        }
        state
            .ring
            .get(part)
            .iter()
            .filter_map(|node| self.peers.peer_descriptor(node))
            .collect()
    }

    pub fn stop(&self) {
        self.abort.abort();
    }
}

impl Drop for PartitionAssignment {
    fn drop(&mut self) {
        self.abort.abort();
    }
}

struct AssignmentWorker {
    my_node_id: NodeId,
    resolver: Arc<dyn StreamPartResolver>,
    state: Arc<Mutex<AssignmentState>>,
    listeners: Listeners,
}

impl AssignmentWorker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<LaneItem>, signal: AbortSignal) {
        loop {
            tokio::select! {
                _ = signal.aborted() => break,
                item = rx.recv() => match item {
                    Some(LaneItem::Change(change)) => self.apply(change).await,
                    Some(LaneItem::Barrier(done)) => {
                        let _ = done.send(());
                    }
                    None => break,
                },
            }
        }
        tracing::debug!(node_id = %self.my_node_id, "Assignment lane stopped");
    }

    async fn apply(&self, change: AssignmentChange) {
        let events = match change {
            AssignmentChange::NodeAdded(node) => {
                let mut state = self.state.lock().await;
                state.ring.add(node);
                state.recompute(&self.my_node_id)
            }
            AssignmentChange::NodeRemoved(node) => {
                let mut state = self.state.lock().await;
                state.ring.remove(&node);
                state.recompute(&self.my_node_id)
            }
            AssignmentChange::StreamsStaked(streams) => {
                // Lookups happen outside the lock; queries stay answerable meanwhile.
                let mut resolved = Vec::with_capacity(streams.len());
                for stream in streams {
                    match self.resolver.stream_parts(&stream).await {
                        Ok(parts) => resolved.push((stream, Some(parts))),
                        Err(e) => {
                            tracing::warn!(stream = %stream, error = %e, "Unable to fetch stream parts, ignoring stream");
                            resolved.push((stream, None));
                        }
                    }
                }
                let mut state = self.state.lock().await;
                for (stream, parts) in resolved {
                    match parts {
                        Some(parts) => state.upsert_stream(stream, parts),
                        None => state.remove_stream(&stream),
                    }
                }
                state.recompute(&self.my_node_id)
            }
            AssignmentChange::StreamUnstaked(stream) => {
                let mut state = self.state.lock().await;
                state.remove_stream(&stream);
                state.recompute(&self.my_node_id)
            }
        };
        self.emit(&events);
    }

    fn emit(&self, events: &[AssignmentEvent]) {
        if events.is_empty() {
            return;
        }
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for event in events {
            match event {
                AssignmentEvent::Assigned(part) => {
                    tracing::info!(node_id = %self.my_node_id, stream_part = %part, "Stream part assigned")
                }
                AssignmentEvent::Unassigned(part) => {
                    tracing::info!(node_id = %self.my_node_id, stream_part = %part, "Stream part unassigned")
                }
            }
            for listener in &listeners {
                listener(event);
            }
        }
    }
}

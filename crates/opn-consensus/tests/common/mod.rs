#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use opn_assignment::{AssignmentChange, PartitionAssignment, PeerDirectory};
use opn_consensus::{channel_fleet_factory, InspectOverTimeConfig, InspectionContext};
use opn_fleet::{run_heartbeat_loop, FleetStateConfig, LocalBus};
use opn_protocol::{
    AbortController, Address, MockChain, NetworkProbe, NodeId, PeerDescriptor, ProtocolError, StreamId, StreamPartId,
    StreamPartResolver,
};

pub const PARTITIONS: u32 = 5;

pub fn addr(n: u8) -> Address {
    Address::parse(&format!("0x{}", format!("{n:02x}").repeat(20))).unwrap()
}

pub fn me() -> Address {
    addr(1)
}

pub fn target() -> Address {
    addr(2)
}

pub fn sponsorship() -> Address {
    addr(10)
}

pub fn stream() -> StreamId {
    StreamId::new("0x0101010101010101010101010101010101010101/inspected")
}

pub fn peer(id: &str) -> PeerDescriptor {
    PeerDescriptor { node_id: NodeId::new(id), addresses: vec![format!("ws://{id}:32200")] }
}

/// Every stream has [`PARTITIONS`] partitions.
pub struct UniformResolver;

impl StreamPartResolver for UniformResolver {
    fn stream_parts<'a>(&'a self, stream: &'a StreamId) -> BoxFuture<'a, Result<Vec<StreamPartId>, ProtocolError>> {
        async move { Ok(StreamPartId::all_of(stream, PARTITIONS)) }.boxed()
    }
}

pub struct NoPeers;

impl PeerDirectory for NoPeers {
    fn peer_descriptor(&self, _node: &NodeId) -> Option<PeerDescriptor> {
        None
    }
}

/// Affirms coverage for the listed nodes only.
#[derive(Default)]
pub struct ScriptedProbe {
    serving: HashSet<NodeId>,
    calls: AtomicUsize,
}

impl ScriptedProbe {
    pub fn serving(nodes: &[&str]) -> Self {
        Self { serving: nodes.iter().map(|n| NodeId::new(*n)).collect(), calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl NetworkProbe for ScriptedProbe {
    fn inspect<'a>(&'a self, peer: &'a PeerDescriptor, _part: &'a StreamPartId) -> BoxFuture<'a, bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let serving = self.serving.contains(&peer.node_id);
        async move { serving }.boxed()
    }
}

pub fn fleet_config() -> FleetStateConfig {
    FleetStateConfig {
        prune_age: Duration::from_secs(30),
        prune_interval: Duration::from_secs(5),
        heartbeat_interval: Duration::from_secs(10),
        latency_extra: Duration::from_secs(2),
        warmup_period: Duration::from_secs(60),
    }
}

pub fn inspection_config() -> InspectOverTimeConfig {
    InspectOverTimeConfig {
        heartbeat_timeout: Duration::from_secs(60),
        max_delay_before_first_inspection: Duration::ZERO,
        max_inspections: 3,
        inspection_interval: Duration::from_secs(1),
    }
}

/// My operator and the target operator share one sponsorship; my single
/// node owns every partition of its stream.
pub struct World {
    pub chain: Arc<MockChain>,
    pub bus: LocalBus,
    pub assignment: Arc<PartitionAssignment>,
    pub heartbeats: AbortController,
}

impl World {
    pub async fn new(target_nodes: &[&str], redundancy_factor: Option<u32>) -> Self {
        let chain = Arc::new(MockChain::new());
        chain.add_sponsorship(sponsorship(), stream(), &[me(), target()]).await;
        if let Some(factor) = redundancy_factor {
            chain.set_redundancy_factor(target(), factor).await;
        }

        let assignment = Arc::new(PartitionAssignment::new(
            NodeId::new("my-node"),
            1,
            Arc::new(UniformResolver),
            Arc::new(NoPeers),
        ));
        assignment.submit(AssignmentChange::StreamsStaked(vec![stream()]));
        assignment.settled().await;

        let bus = LocalBus::new();
        let heartbeats = AbortController::new();
        for node in target_nodes {
            tokio::spawn(run_heartbeat_loop(
                Arc::new(bus.clone()),
                target(),
                peer(node),
                Duration::from_secs(10),
                heartbeats.signal(),
            ));
        }

        Self { chain, bus, assignment, heartbeats }
    }

    pub fn context(&self, probe: Arc<ScriptedProbe>) -> InspectionContext {
        InspectionContext {
            chain: self.chain.clone(),
            probe,
            fleet_factory: channel_fleet_factory(Arc::new(self.bus.clone()), fleet_config()),
        }
    }

    pub async fn target_subscribers(&self) -> usize {
        self.bus.subscriber_count(&StreamId::coordination_stream(&target())).await
    }
}

impl Drop for World {
    fn drop(&mut self) {
        self.heartbeats.abort();
    }
}

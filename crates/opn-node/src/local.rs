//! In-process collaborators for running a node without a chain.
//!
//! The chain is a [`MockChain`] seeded from the `[local]` config section,
//! coordination goes over a [`LocalBus`] and probes return a fixed answer.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use opn_fleet::LocalBus;
use opn_protocol::{
    Address, MockChain, NetworkProbe, PeerDescriptor, ProtocolError, StreamId, StreamPartId, StreamPartResolver,
};

use crate::config::NodeConfig;
use crate::node::Collaborators;

/// Partition counts known up front.
pub struct StaticResolver {
    partitions: HashMap<StreamId, u32>,
}

impl StaticResolver {
    pub fn new(partitions: HashMap<StreamId, u32>) -> Self {
        Self { partitions }
    }
}

impl StreamPartResolver for StaticResolver {
    fn stream_parts<'a>(&'a self, stream: &'a StreamId) -> BoxFuture<'a, Result<Vec<StreamPartId>, ProtocolError>> {
        async move {
            self.partitions
                .get(stream)
                .map(|count| StreamPartId::all_of(stream, *count))
                .ok_or_else(|| ProtocolError::NotFound(format!("stream {stream}")))
        }
        .boxed()
    }
}

pub struct StaticProbe {
    answer: bool,
}

impl StaticProbe {
    pub fn new(answer: bool) -> Self {
        Self { answer }
    }
}

impl NetworkProbe for StaticProbe {
    fn inspect<'a>(&'a self, peer: &'a PeerDescriptor, part: &'a StreamPartId) -> BoxFuture<'a, bool> {
        tracing::debug!(node_id = %peer.node_id, stream_part = %part, answer = self.answer, "Simulated probe");
        let answer = self.answer;
        async move { answer }.boxed()
    }
}

/// Handles kept by local mode next to the collaborators it hands out.
pub struct LocalEnvironment {
    pub chain: Arc<MockChain>,
    pub bus: LocalBus,
    pub collaborators: Collaborators,
}

pub async fn local_environment(config: &NodeConfig) -> Result<LocalEnvironment> {
    let me = config.operator()?;
    let chain = Arc::new(MockChain::new());
    let mut partitions = HashMap::new();

    chain.set_redundancy_factor(me.clone(), config.local.redundancy_factor).await;
    for sponsorship in &config.local.sponsorships {
        let address = Address::parse(&sponsorship.address)
            .with_context(|| format!("Invalid local sponsorship {}", sponsorship.address))?;
        let mut operators = vec![me.clone()];
        for operator in &sponsorship.operators {
            let operator =
                Address::parse(operator).with_context(|| format!("Invalid local operator {operator}"))?;
            chain.set_redundancy_factor(operator.clone(), config.local.redundancy_factor).await;
            operators.push(operator);
        }
        let stream_id = StreamId::new(sponsorship.stream_id.clone());
        partitions.insert(stream_id.clone(), sponsorship.partitions);
        chain.add_sponsorship(address, stream_id, &operators).await;
    }
    tracing::info!(sponsorships = config.local.sponsorships.len(), "Local chain seeded");

    let bus = LocalBus::new();
    let collaborators = Collaborators {
        chain: chain.clone(),
        channel: Arc::new(bus.clone()),
        resolver: Arc::new(StaticResolver::new(partitions)),
        probe: Arc::new(StaticProbe::new(config.local.probe_result)),
    };
    Ok(LocalEnvironment { chain, bus, collaborators })
}

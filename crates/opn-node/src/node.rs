//! The operator node: wires fleet membership, partition assignment and the
//! inspection protocol together and runs their loops.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use opn_assignment::{PartitionAssignment, TopologyTracker};
use opn_consensus::{channel_fleet_factory, InspectionContext, InspectionService, ReviewHandler};
use opn_fleet::{leader_fn, run_heartbeat_loop, FleetState, FleetView, IsLeaderFn};
use opn_protocol::{
    schedule_at_interval, AbortController, AbortSignal, Address, ChainFacade, CoordinationChannel, NetworkProbe,
    NodeId, PeerDescriptor, StreamPartResolver,
};
use tokio::task::JoinHandle;

use crate::announce::announce_node_to_contract;
use crate::config::NodeConfig;

/// External collaborators of a node.
#[derive(Clone)]
pub struct Collaborators {
    pub chain: Arc<dyn ChainFacade>,
    pub channel: Arc<dyn CoordinationChannel>,
    pub resolver: Arc<dyn StreamPartResolver>,
    pub probe: Arc<dyn NetworkProbe>,
}

pub struct OperatorNode {
    operator: Address,
    me: PeerDescriptor,
    fleet: Arc<FleetState>,
    assignment: Arc<PartitionAssignment>,
    abort: AbortController,
    tasks: Vec<JoinHandle<()>>,
}

impl OperatorNode {
    /// Start every subsystem. Fails when the operator's redundancy factor
    /// cannot be read from the chain.
    pub async fn start(config: &NodeConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        let operator = config.operator()?;
        let mut me = PeerDescriptor::new(config.node_id());
        me.addresses = config.addresses.clone();
        let Collaborators { chain, channel, resolver, probe } = collaborators;

        let redundancy_factor = chain
            .fetch_redundancy_factor(&operator)
            .await
            .context("Failed to retrieve redundancy factor")?
            .ok_or_else(|| anyhow!("Failed to retrieve redundancy factor"))?;
        if redundancy_factor == 0 {
            bail!("Operator {operator} has a redundancy factor of zero");
        }
        tracing::info!(
            operator = %operator,
            node_id = %me.node_id,
            redundancy_factor,
            "Starting operator node"
        );

        let abort = AbortController::new();
        let fleet = Arc::new(FleetState::new(operator.clone(), channel.clone(), config.fleet_state_config()));
        let assignment = Arc::new(PartitionAssignment::new(
            me.node_id.clone(),
            redundancy_factor as usize,
            resolver,
            Arc::new(fleet.view()),
        ));
        assignment.attach_fleet(&fleet);
        let topology = TopologyTracker::new(operator.clone(), chain.clone());
        let input = assignment.input();
        topology.on_change(move |event| input.submit(event.clone()));

        fleet.start().await.context("Failed to start fleet state")?;
        let mut tasks = Vec::new();
        match topology.start(abort.signal()).await {
            Ok(handle) => tasks.push(handle),
            Err(e) => {
                fleet.destroy().await;
                assignment.stop();
                return Err(e).context("Failed to start topology tracker");
            }
        }
        tasks.push(tokio::spawn(run_heartbeat_loop(
            channel.clone(),
            operator.clone(),
            me.clone(),
            config.heartbeat_update_interval(),
            abort.signal(),
        )));

        let context = InspectionContext {
            chain: chain.clone(),
            probe,
            fleet_factory: channel_fleet_factory(channel, config.fleet_state_config()),
        };
        let duties = Duties {
            operator: operator.clone(),
            me: me.clone(),
            view: fleet.view(),
            chain,
            context,
            assignment: assignment.clone(),
            config: config.clone(),
        };
        tasks.push(tokio::spawn(duties.run(abort.signal())));

        Ok(Self { operator, me, fleet, assignment, abort, tasks })
    }

    pub fn node_id(&self) -> &NodeId {
        &self.me.node_id
    }

    pub fn operator(&self) -> &Address {
        &self.operator
    }

    pub fn assignment(&self) -> &Arc<PartitionAssignment> {
        &self.assignment
    }

    pub fn fleet(&self) -> FleetView {
        self.fleet.view()
    }

    /// Abort every loop and wait for them to exit.
    pub async fn stop(mut self) {
        tracing::info!(node_id = %self.me.node_id, "Stopping operator node");
        self.abort.abort();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Node task ended abnormally");
            }
        }
        self.fleet.destroy().await;
        self.assignment.stop();
    }
}

impl Drop for OperatorNode {
    fn drop(&mut self) {
        self.abort.abort();
    }
}

/// Work that starts once the node's own fleet is known.
struct Duties {
    operator: Address,
    me: PeerDescriptor,
    view: FleetView,
    chain: Arc<dyn ChainFacade>,
    context: InspectionContext,
    assignment: Arc<PartitionAssignment>,
    config: NodeConfig,
}

impl Duties {
    async fn run(self, signal: AbortSignal) {
        tokio::select! {
            _ = signal.aborted() => return,
            _ = self.view.wait_until_ready(None) => {}
        }
        let is_leader = leader_fn(self.view.clone(), self.me.node_id.clone());
        tracing::info!(
            node_id = %self.me.node_id,
            fleet_size = self.view.len(),
            leader = is_leader(),
            "Fleet ready"
        );

        let announce = announce_loop(
            self.chain.as_ref(),
            &self.operator,
            &self.me,
            is_leader.clone(),
            Duration::from_millis(self.config.announce_node_to_contract.poll_interval_ms),
            Duration::from_millis(self.config.announce_node_to_contract.write_interval_ms),
            signal.clone(),
        );

        let inspection_enabled = self.config.inspect_random_node.enabled;
        let service = InspectionService::new(
            self.operator.clone(),
            self.context.clone(),
            self.assignment.clone(),
            self.config.inspection_service_config(),
        );
        let inspection = async {
            if inspection_enabled {
                service.run(signal.clone()).await;
            }
        };

        let review_enabled = self.config.review_suspect_node.enabled;
        let handler = Arc::new(ReviewHandler::new(
            self.operator.clone(),
            self.context.clone(),
            self.config.review_suspect_node.strategy,
            self.config.review_inspection_config(),
            is_leader,
        ));
        let review = async {
            if review_enabled {
                if let Err(e) = handler.run(signal.clone()).await {
                    tracing::error!(error = %e, "Review request handling stopped");
                }
            }
        };

        tokio::join!(announce, inspection, review);
    }
}

async fn announce_loop(
    chain: &dyn ChainFacade,
    operator: &Address,
    me: &PeerDescriptor,
    is_leader: IsLeaderFn,
    poll_interval: Duration,
    write_interval: Duration,
    signal: AbortSignal,
) {
    let is_leader = &is_leader;
    schedule_at_interval(
        "announce-node-to-contract",
        move || async move {
            if !is_leader() {
                return Ok(());
            }
            announce_node_to_contract(chain, operator, me, write_interval).await.map(|_| ())
        },
        poll_interval,
        true,
        signal,
    )
    .await;
}

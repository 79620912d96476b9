use std::sync::Arc;
use std::time::Duration;

use opn_assignment::PartitionAssignment;
use opn_protocol::constants::DEFAULT_INSPECT_RANDOM_NODE_INTERVAL_MS;
use opn_protocol::{schedule_at_interval, AbortSignal, Address};
use uuid::Uuid;

use crate::{inspect_random_node, ConsensusError, EpisodeOutcome, InspectOverTimeConfig, InspectionContext};

#[derive(Debug, Clone)]
pub struct InspectionServiceConfig {
    /// Time between two random inspection episodes.
    pub interval: Duration,
    pub inspection: InspectOverTimeConfig,
}

impl Default for InspectionServiceConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_INSPECT_RANDOM_NODE_INTERVAL_MS),
            inspection: InspectOverTimeConfig::default(),
        }
    }
}

/// Periodically inspects a random operator sharing a sponsorship with us.
pub struct InspectionService {
    my_operator: Address,
    context: InspectionContext,
    assignment: Arc<PartitionAssignment>,
    config: InspectionServiceConfig,
}

impl InspectionService {
    pub fn new(
        my_operator: Address,
        context: InspectionContext,
        assignment: Arc<PartitionAssignment>,
        config: InspectionServiceConfig,
    ) -> Self {
        Self { my_operator, context, assignment, config }
    }

    /// Run one episode: select a target, inspect it over time and flag it
    /// if it fails.
    pub async fn start_inspection_episode(&self, signal: &AbortSignal) -> Result<EpisodeOutcome, ConsensusError> {
        let episode_id = Uuid::new_v4();
        tracing::debug!(episode_id = %episode_id, operator = %self.my_operator, "Inspection episode started");
        let outcome = inspect_random_node(
            &self.my_operator,
            &self.context,
            &self.assignment,
            &self.config.inspection,
            signal,
        )
        .await;
        match &outcome {
            Ok(outcome) => tracing::info!(episode_id = %episode_id, ?outcome, "Inspection episode finished"),
            Err(e) => tracing::warn!(episode_id = %episode_id, error = %e, "Inspection episode failed"),
        }
        outcome
    }

    /// Start an episode every `interval` until aborted. The first episode
    /// runs one interval after the call.
    pub async fn run(&self, signal: AbortSignal) {
        let episode_signal = signal.clone();
        let episode_signal = &episode_signal;
        schedule_at_interval(
            "inspect-random-node",
            move || async move { self.start_inspection_episode(episode_signal).await.map(|_| ()) },
            self.config.interval,
            false,
            signal,
        )
        .await;
    }
}

//! Answering flags raised by other operators.
//!
//! When an operator is flagged, the sponsorship asks a handful of reviewers
//! to vote. Only the current fleet leader of a reviewing operator acts on a
//! request so the operator votes once.

use std::sync::Arc;

use opn_fleet::IsLeaderFn;
use opn_protocol::{AbortSignal, Address, ReviewRequest, StreamPartId};
use serde::{Deserialize, Serialize};

use crate::voting::{vote_at_midpoint, VoteOutcome};
use crate::{ConsensusError, InspectOverTime, InspectOverTimeConfig, InspectionContext, InspectionTarget};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStrategy {
    /// Vote to kick right away, trusting the flagger's own inspection.
    TrustRequester,
    /// Inspect the target ourselves and vote at the middle of the window.
    #[default]
    Inspect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewOutcome {
    NotLeader,
    /// The request carried unusable metadata.
    Rejected,
    Vote(VoteOutcome),
}

pub struct ReviewHandler {
    my_operator: Address,
    context: InspectionContext,
    strategy: ReviewStrategy,
    config: InspectOverTimeConfig,
    is_leader: IsLeaderFn,
}

impl ReviewHandler {
    pub fn new(
        my_operator: Address,
        context: InspectionContext,
        strategy: ReviewStrategy,
        config: InspectOverTimeConfig,
        is_leader: IsLeaderFn,
    ) -> Self {
        Self { my_operator, context, strategy, config, is_leader }
    }

    pub fn strategy(&self) -> ReviewStrategy {
        self.strategy
    }

    pub async fn review(&self, request: ReviewRequest, signal: &AbortSignal) -> Result<ReviewOutcome, ConsensusError> {
        if !(self.is_leader)() {
            tracing::debug!(operator = %request.target_operator, "Not fleet leader, ignoring review request");
            return Ok(ReviewOutcome::NotLeader);
        }
        let partition = match request.partition() {
            Ok(partition) => partition,
            Err(e) => {
                tracing::warn!(
                    sponsorship = %request.sponsorship,
                    operator = %request.target_operator,
                    error = %e,
                    "Dropping review request"
                );
                return Ok(ReviewOutcome::Rejected);
            }
        };
        tracing::info!(
            sponsorship = %request.sponsorship,
            operator = %request.target_operator,
            partition,
            strategy = ?self.strategy,
            "Reviewing flagged operator"
        );

        let outcome = match self.strategy {
            ReviewStrategy::TrustRequester => {
                self.context
                    .chain
                    .vote_on_flag(&request.sponsorship, &request.target_operator, true)
                    .await?;
                tracing::info!(sponsorship = %request.sponsorship, operator = %request.target_operator, kick = true, "Voted on flag");
                VoteOutcome::Cast { kick: true }
            }
            ReviewStrategy::Inspect => self.inspect_and_vote(&request, partition, signal).await?,
        };
        Ok(ReviewOutcome::Vote(outcome))
    }

    async fn inspect_and_vote(
        &self,
        request: &ReviewRequest,
        partition: u32,
        signal: &AbortSignal,
    ) -> Result<VoteOutcome, ConsensusError> {
        let stream_id = self.context.chain.stream_id_of_sponsorship(&request.sponsorship).await?;
        let target = InspectionTarget {
            sponsorship: request.sponsorship.clone(),
            operator: request.target_operator.clone(),
            stream_part: StreamPartId::new(stream_id, partition)?,
        };
        let inspection = InspectOverTime::start(target, self.context.clone(), self.config.clone(), signal.clone());
        let outcome = vote_at_midpoint(
            self.context.chain.as_ref(),
            &request.sponsorship,
            &request.target_operator,
            &request.voting_period,
            || inspection.results(),
            signal,
        )
        .await;
        inspection.stop().await;
        outcome
    }

    /// Handle review requests addressed to this operator until aborted. Each
    /// request is reviewed on its own task.
    pub async fn run(self: Arc<Self>, signal: AbortSignal) -> Result<(), ConsensusError> {
        let mut requests = self.context.chain.subscribe_review_requests(&self.my_operator).await?;
        loop {
            tokio::select! {
                _ = signal.aborted() => break,
                request = requests.recv() => {
                    let Some(request) = request else {
                        tracing::warn!(operator = %self.my_operator, "Review request subscription closed");
                        break;
                    };
                    let handler = self.clone();
                    let signal = signal.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handler.review(request, &signal).await {
                            tracing::error!(error = %e, "Review of flagged operator failed");
                        }
                    });
                }
            }
        }
        Ok(())
    }
}

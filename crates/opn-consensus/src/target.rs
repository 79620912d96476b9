use std::fmt;

use opn_assignment::PartitionAssignment;
use opn_protocol::{Address, ChainFacade, SponsorshipInfo, StreamPartId};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::ConsensusError;

/// What one inspection episode looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectionTarget {
    pub sponsorship: Address,
    pub operator: Address,
    pub stream_part: StreamPartId,
}

impl fmt::Display for InspectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} ({})", self.operator, self.sponsorship, self.stream_part)
    }
}

/// Select a random target to inspect.
///
/// Only sponsorships with at least one other operator and with a partition
/// of their stream assigned to this node qualify. A sponsorship is picked
/// with weight `operator_count - 1`, so every other operator across all
/// sponsorships is equally likely. Returns `None` whenever some candidate
/// set turns out empty.
pub async fn find_target(
    my_operator: &Address,
    chain: &dyn ChainFacade,
    assignment: &PartitionAssignment,
) -> Result<Option<InspectionTarget>, ConsensusError> {
    let sponsorships = chain.sponsorships_of_operator(my_operator).await?;
    let mut candidates = Vec::with_capacity(sponsorships.len());
    for sponsorship in sponsorships {
        if sponsorship.operator_count >= 2
            && assignment
                .is_any_partition_of_stream_assigned_to_me(&sponsorship.stream_id)
                .await
        {
            candidates.push(sponsorship);
        }
    }
    if candidates.is_empty() {
        tracing::info!(operator = %my_operator, "No sponsorship to inspect");
        return Ok(None);
    }

    let sponsorship = pick_weighted(&candidates, &mut rand::thread_rng())?.clone();

    let operators: Vec<Address> = chain
        .operators_in_sponsorship(&sponsorship.sponsorship)
        .await?
        .into_iter()
        .filter(|op| op != my_operator)
        .collect();
    let Some(operator) = operators.choose(&mut rand::thread_rng()).cloned() else {
        tracing::info!(sponsorship = %sponsorship.sponsorship, "No other operator in sponsorship");
        return Ok(None);
    };

    let parts = assignment
        .partitions_of_stream_assigned_to_me(&sponsorship.stream_id)
        .await;
    let Some(stream_part) = parts.choose(&mut rand::thread_rng()).cloned() else {
        tracing::info!(stream = %sponsorship.stream_id, "No partition of stream assigned to me anymore");
        return Ok(None);
    };

    Ok(Some(InspectionTarget { sponsorship: sponsorship.sponsorship, operator, stream_part }))
}

/// Pick a sponsorship with probability proportional to `operator_count - 1`.
///
/// Every candidate must have at least two operators.
pub fn pick_weighted<'a, R: Rng>(
    candidates: &'a [SponsorshipInfo],
    rng: &mut R,
) -> Result<&'a SponsorshipInfo, ConsensusError> {
    if let Some(bad) = candidates.iter().find(|s| s.operator_count < 2) {
        return Err(ConsensusError::Invariant(format!(
            "sponsorship {} has {} operators",
            bad.sponsorship, bad.operator_count
        )));
    }
    let total: u64 = candidates.iter().map(|s| u64::from(s.operator_count - 1)).sum();
    if total == 0 {
        return Err(ConsensusError::Invariant("no candidate sponsorships".into()));
    }

    let target = rng.gen_range(0..total);
    let mut cumulative = 0u64;
    for candidate in candidates {
        cumulative += u64::from(candidate.operator_count - 1);
        if target < cumulative {
            return Ok(candidate);
        }
    }
    Err(ConsensusError::Invariant(format!(
        "weighted pick {target} out of range {total}"
    )))
}

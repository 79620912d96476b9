use opn_assignment::PartitionAssignment;
use opn_protocol::{AbortSignal, Address};

use crate::{find_target, ConsensusError, InspectOverTime, InspectOverTimeConfig, InspectionContext, InspectionTarget};

/// How an active inspection episode ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EpisodeOutcome {
    /// Nothing to inspect right now.
    NoTarget,
    /// Someone already flagged the target in this sponsorship.
    AlreadyFlagged(InspectionTarget),
    Passed(InspectionTarget),
    Flagged(InspectionTarget),
    /// Every attempt was inconclusive; nothing was flagged.
    Inconclusive(InspectionTarget),
    Aborted,
}

/// Inspect a random operator and flag it if it does not serve its part.
///
/// Returns as soon as one attempt passes. The flag is raised only when at
/// least one attempt was conclusive and none passed.
pub async fn inspect_random_node(
    my_operator: &Address,
    context: &InspectionContext,
    assignment: &PartitionAssignment,
    config: &InspectOverTimeConfig,
    signal: &AbortSignal,
) -> Result<EpisodeOutcome, ConsensusError> {
    let Some(target) = find_target(my_operator, context.chain.as_ref(), assignment).await? else {
        return Ok(EpisodeOutcome::NoTarget);
    };
    if context
        .chain
        .has_open_flag(&target.operator, &target.sponsorship)
        .await?
    {
        tracing::info!(operator = %target.operator, sponsorship = %target.sponsorship, "Target already flagged, skipping");
        return Ok(EpisodeOutcome::AlreadyFlagged(target));
    }

    tracing::info!(
        operator = %target.operator,
        sponsorship = %target.sponsorship,
        stream_part = %target.stream_part,
        "Inspecting target"
    );
    let inspection = InspectOverTime::start(target.clone(), context.clone(), config.clone(), signal.clone());
    if inspection.wait_for_result().await {
        inspection.stop().await;
        tracing::info!(operator = %target.operator, "Target passed inspection");
        return Ok(EpisodeOutcome::Passed(target));
    }
    let results = inspection.stop().await;
    if signal.is_aborted() {
        return Ok(EpisodeOutcome::Aborted);
    }
    if results.is_empty() {
        tracing::info!(operator = %target.operator, "Inspection inconclusive, not flagging");
        return Ok(EpisodeOutcome::Inconclusive(target));
    }

    tracing::info!(
        operator = %target.operator,
        sponsorship = %target.sponsorship,
        partition = target.stream_part.partition,
        failures = results.len(),
        "Target failed inspection, flagging"
    );
    context
        .chain
        .flag(&target.sponsorship, &target.operator, target.stream_part.partition)
        .await?;
    Ok(EpisodeOutcome::Flagged(target))
}

//! Vote-kick decision and vote timing.

use std::time::Duration;

use chrono::{DateTime, Utc};
use opn_protocol::{sleep_or_abort, AbortSignal, Address, ChainFacade, VotingPeriod};

use crate::ConsensusError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Cast { kick: bool },
    /// Nothing conclusive to vote on.
    Abstained,
    Aborted,
}

/// Kick when at most half of the attempts passed. A tie kicks.
///
/// Returns `None` for zero attempts: with nothing inspected there is
/// nothing to accuse the target of.
pub fn decide_kick(results: &[bool]) -> Option<bool> {
    if results.is_empty() {
        return None;
    }
    let passes = results.iter().filter(|passed| **passed).count();
    Some(passes <= results.len() / 2)
}

/// Time left until the middle of the voting window, zero if already past.
pub fn time_until_vote(period: &VotingPeriod, now: DateTime<Utc>) -> Duration {
    (period.midpoint() - now).to_std().unwrap_or(Duration::ZERO)
}

/// Wait for the middle of the voting window, then vote once on the results
/// `collect` returns at that moment.
///
/// An abort before the vote skips it.
pub async fn vote_at_midpoint<F>(
    chain: &dyn ChainFacade,
    sponsorship: &Address,
    target: &Address,
    period: &VotingPeriod,
    collect: F,
    signal: &AbortSignal,
) -> Result<VoteOutcome, ConsensusError>
where
    F: FnOnce() -> Vec<bool>,
{
    let wait = time_until_vote(period, Utc::now());
    tracing::debug!(sponsorship = %sponsorship, operator = %target, wait_secs = wait.as_secs(), "Vote scheduled");
    if !sleep_or_abort(wait, signal).await {
        tracing::info!(sponsorship = %sponsorship, operator = %target, "Vote skipped, aborted");
        return Ok(VoteOutcome::Aborted);
    }

    let results = collect();
    let Some(kick) = decide_kick(&results) else {
        tracing::info!(sponsorship = %sponsorship, operator = %target, "No conclusive inspection, abstaining");
        return Ok(VoteOutcome::Abstained);
    };
    chain.vote_on_flag(sponsorship, target, kick).await?;
    tracing::info!(
        sponsorship = %sponsorship,
        operator = %target,
        kick,
        attempts = results.len(),
        passes = results.iter().filter(|r| **r).count(),
        "Voted on flag"
    );
    Ok(VoteOutcome::Cast { kick })
}

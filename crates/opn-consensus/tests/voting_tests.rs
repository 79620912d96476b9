use chrono::Utc;
use opn_consensus::{vote_at_midpoint, VoteOutcome};
use opn_protocol::{AbortController, Address, MockChain, VoteRecord, VotingPeriod};

fn addr(n: u8) -> Address {
    Address::parse(&format!("0x{}", format!("{n:02x}").repeat(20))).unwrap()
}

fn window() -> VotingPeriod {
    let now = Utc::now();
    VotingPeriod::new(now, now + chrono::Duration::minutes(30))
}

/// Ten attempts, the first `passes` of which passed.
fn ten_attempts(passes: usize) -> Vec<bool> {
    (0..10).map(|i| i < passes).collect()
}

#[tokio::test(start_paused = true)]
async fn test_six_failures_out_of_ten_vote_kick() {
    let chain = MockChain::new();
    let outcome = vote_at_midpoint(
        &chain,
        &addr(10),
        &addr(2),
        &window(),
        || ten_attempts(4),
        &AbortController::new().signal(),
    )
    .await
    .unwrap();

    assert_eq!(outcome, VoteOutcome::Cast { kick: true });
    assert_eq!(chain.votes().await, vec![VoteRecord { sponsorship: addr(10), target: addr(2), kick: true }]);
}

#[tokio::test(start_paused = true)]
async fn test_four_failures_out_of_ten_vote_no_kick() {
    let chain = MockChain::new();
    let outcome = vote_at_midpoint(
        &chain,
        &addr(10),
        &addr(2),
        &window(),
        || ten_attempts(6),
        &AbortController::new().signal(),
    )
    .await
    .unwrap();

    assert_eq!(outcome, VoteOutcome::Cast { kick: false });
    assert_eq!(chain.votes().await, vec![VoteRecord { sponsorship: addr(10), target: addr(2), kick: false }]);
}

#[tokio::test(start_paused = true)]
async fn test_vote_waits_for_midpoint() {
    let chain = MockChain::new();
    let started = tokio::time::Instant::now();
    vote_at_midpoint(&chain, &addr(10), &addr(2), &window(), || vec![true], &AbortController::new().signal())
        .await
        .unwrap();

    let waited = started.elapsed();
    assert!(waited > std::time::Duration::from_secs(14 * 60), "voted after {waited:?}");
    assert!(waited <= std::time::Duration::from_secs(15 * 60), "voted after {waited:?}");
}

#[tokio::test(start_paused = true)]
async fn test_no_attempts_no_vote() {
    let chain = MockChain::new();
    let outcome = vote_at_midpoint(&chain, &addr(10), &addr(2), &window(), Vec::new, &AbortController::new().signal())
        .await
        .unwrap();

    assert_eq!(outcome, VoteOutcome::Abstained);
    assert!(chain.votes().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_aborted_before_midpoint_no_vote() {
    let chain = MockChain::new();
    let abort = AbortController::new();
    abort.abort();
    let outcome = vote_at_midpoint(&chain, &addr(10), &addr(2), &window(), || vec![false], &abort.signal())
        .await
        .unwrap();

    assert_eq!(outcome, VoteOutcome::Aborted);
    assert!(chain.votes().await.is_empty());
}

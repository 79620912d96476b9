use std::sync::{Arc, Mutex};
use std::time::Duration;

use opn_assignment::{AssignmentError, TopologyEvent, TopologyTracker};
use opn_protocol::{AbortController, Address, MockChain, StakeEvent, StakedStreams, StreamId};

fn addr(n: u8) -> Address {
    Address::parse(&format!("0x{}", format!("{n:02x}").repeat(20))).unwrap()
}

fn operator() -> Address {
    addr(1)
}

type Events = Arc<Mutex<Vec<TopologyEvent>>>;

fn tracker(chain: Arc<MockChain>) -> (TopologyTracker, Events) {
    let tracker = TopologyTracker::new(operator(), chain);
    let events: Events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    tracker.on_change(move |e| sink.lock().unwrap().push(e.clone()));
    (tracker, events)
}

fn take(events: &Events) -> Vec<TopologyEvent> {
    std::mem::take(&mut *events.lock().unwrap())
}

fn staked(streams: &[&str]) -> TopologyEvent {
    TopologyEvent::StreamsStaked(streams.iter().map(|s| StreamId::new(*s)).collect())
}

fn unstaked(stream: &str) -> TopologyEvent {
    TopologyEvent::StreamUnstaked(StreamId::new(stream))
}

async fn chain_with_sponsorships() -> Arc<MockChain> {
    let chain = Arc::new(MockChain::new());
    chain.add_sponsorship(addr(10), StreamId::new("A"), &[]).await;
    chain.add_sponsorship(addr(11), StreamId::new("A"), &[]).await;
    chain.add_sponsorship(addr(12), StreamId::new("B"), &[]).await;
    chain
}

#[tokio::test]
async fn test_snapshot_stakes_each_stream_once() {
    let (tracker, events) = tracker(chain_with_sponsorships().await);
    tracker
        .ingest_snapshot(StakedStreams {
            block_number: 5,
            sponsorships: vec![
                (addr(10), StreamId::new("A")),
                (addr(11), StreamId::new("A")),
                (addr(12), StreamId::new("B")),
            ],
        })
        .await;

    let mut streams = match take(&events).as_slice() {
        [TopologyEvent::StreamsStaked(streams)] => streams.clone(),
        other => panic!("unexpected events: {other:?}"),
    };
    streams.sort();
    assert_eq!(streams, vec![StreamId::new("A"), StreamId::new("B")]);
    assert_eq!(tracker.staked_streams().await, vec![StreamId::new("A"), StreamId::new("B")]);
}

#[tokio::test]
async fn test_stream_is_reference_counted_across_sponsorships() {
    let (tracker, events) = tracker(chain_with_sponsorships().await);

    tracker.ingest_event(StakeEvent::Staked { sponsorship: addr(10), block_number: 1 }).await;
    assert_eq!(take(&events), vec![staked(&["A"])]);

    tracker.ingest_event(StakeEvent::Staked { sponsorship: addr(11), block_number: 2 }).await;
    assert!(take(&events).is_empty(), "stream A already staked");

    tracker.ingest_event(StakeEvent::Unstaked { sponsorship: addr(10), block_number: 3 }).await;
    assert!(take(&events).is_empty(), "stream A still has a sponsorship");

    tracker.ingest_event(StakeEvent::Unstaked { sponsorship: addr(11), block_number: 4 }).await;
    assert_eq!(take(&events), vec![unstaked("A")]);
    assert!(tracker.staked_streams().await.is_empty());
}

#[tokio::test]
async fn test_events_older_than_snapshot_are_ignored() {
    let (tracker, events) = tracker(chain_with_sponsorships().await);
    tracker
        .ingest_snapshot(StakedStreams { block_number: 10, sponsorships: vec![(addr(12), StreamId::new("B"))] })
        .await;
    take(&events);

    tracker.ingest_event(StakeEvent::Unstaked { sponsorship: addr(12), block_number: 9 }).await;
    tracker.ingest_event(StakeEvent::Staked { sponsorship: addr(10), block_number: 10 }).await;
    assert!(take(&events).is_empty());

    tracker.ingest_event(StakeEvent::Unstaked { sponsorship: addr(12), block_number: 11 }).await;
    assert_eq!(take(&events), vec![unstaked("B")]);
}

#[tokio::test]
async fn test_unresolvable_sponsorship_is_skipped() {
    let (tracker, events) = tracker(chain_with_sponsorships().await);
    tracker.ingest_event(StakeEvent::Staked { sponsorship: addr(99), block_number: 1 }).await;
    assert!(take(&events).is_empty());
    tracker.ingest_event(StakeEvent::Unstaked { sponsorship: addr(99), block_number: 2 }).await;
    assert!(take(&events).is_empty());
}

#[tokio::test]
async fn test_failed_lookup_is_retried_on_next_snapshot() {
    let chain = chain_with_sponsorships().await;
    let (tracker, events) = tracker(chain.clone());
    tracker.ingest_event(StakeEvent::Staked { sponsorship: addr(99), block_number: 1 }).await;
    assert!(take(&events).is_empty());

    chain.add_sponsorship(addr(99), StreamId::new("C"), &[]).await;
    tracker
        .ingest_snapshot(StakedStreams { block_number: 5, sponsorships: vec![(addr(99), StreamId::new("C"))] })
        .await;
    assert_eq!(take(&events), vec![staked(&["C"])]);
    assert_eq!(tracker.staked_streams().await, vec![StreamId::new("C")]);
}

#[tokio::test]
async fn test_failed_lookup_is_retried_on_next_event() {
    let chain = chain_with_sponsorships().await;
    let (tracker, events) = tracker(chain.clone());
    tracker.ingest_event(StakeEvent::Staked { sponsorship: addr(99), block_number: 1 }).await;
    assert!(take(&events).is_empty());

    chain.add_sponsorship(addr(99), StreamId::new("C"), &[]).await;
    tracker.ingest_event(StakeEvent::Staked { sponsorship: addr(10), block_number: 2 }).await;
    assert_eq!(take(&events), vec![staked(&["A", "C"])]);

    // Resolved once, so a repeated update does not stake it again.
    tracker.ingest_event(StakeEvent::Staked { sponsorship: addr(12), block_number: 3 }).await;
    assert_eq!(take(&events), vec![staked(&["B"])]);
}

#[tokio::test(start_paused = true)]
async fn test_start_follows_chain() {
    let chain = chain_with_sponsorships().await;
    chain.stake(&operator(), &addr(10)).await.unwrap();
    let (tracker, events) = tracker(chain.clone());
    let abort = AbortController::new();

    let handle = tracker.start(abort.signal()).await.unwrap();
    assert_eq!(take(&events), vec![staked(&["A"])]);
    assert!(matches!(tracker.start(abort.signal()).await, Err(AssignmentError::AlreadyStarted)));

    chain.stake(&operator(), &addr(12)).await.unwrap();
    // Stakes of other operators are not ours.
    chain.stake(&addr(2), &addr(11)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(take(&events), vec![staked(&["B"])]);

    chain.unstake(&operator(), &addr(10)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(take(&events), vec![unstaked("A")]);

    abort.abort();
    handle.await.unwrap();
}

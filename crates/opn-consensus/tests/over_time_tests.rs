mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{inspection_config, sponsorship, target, ScriptedProbe, World};
use opn_consensus::{InspectOverTime, InspectionTarget};
use opn_protocol::{AbortController, StreamPartId};

fn inspection_target() -> InspectionTarget {
    InspectionTarget {
        sponsorship: sponsorship(),
        operator: target(),
        stream_part: StreamPartId::new(common::stream(), 2).unwrap(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_every_attempt_fails_when_no_node_serves() {
    let world = World::new(&["target-a", "target-b"], Some(1)).await;
    let probe = Arc::new(ScriptedProbe::serving(&[]));
    let abort = AbortController::new();

    let inspection =
        InspectOverTime::start(inspection_target(), world.context(probe.clone()), inspection_config(), abort.signal());

    assert!(!inspection.wait_for_result().await);
    assert_eq!(inspection.wait_until_done().await, vec![false, false, false]);
    // One responsible node per attempt with a redundancy factor of 1.
    assert_eq!(probe.calls(), 3);
    assert!(inspection.progress().done);
}

#[tokio::test(start_paused = true)]
async fn test_probing_stops_at_first_serving_replica() {
    let world = World::new(&["target-a", "target-b"], Some(2)).await;
    let probe = Arc::new(ScriptedProbe::serving(&["target-b"]));
    let abort = AbortController::new();

    let inspection =
        InspectOverTime::start(inspection_target(), world.context(probe.clone()), inspection_config(), abort.signal());

    assert!(inspection.wait_for_result().await);
    assert_eq!(inspection.wait_until_done().await, vec![true, true, true]);
    // Each attempt probes target-b, and target-a only when it came first.
    assert!((3..=6).contains(&probe.calls()), "calls: {}", probe.calls());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_redundancy_factor_is_inconclusive() {
    let world = World::new(&["target-a"], None).await;
    let probe = Arc::new(ScriptedProbe::serving(&[]));
    let abort = AbortController::new();

    let inspection =
        InspectOverTime::start(inspection_target(), world.context(probe.clone()), inspection_config(), abort.signal());

    assert!(inspection.wait_until_done().await.is_empty());
    assert_eq!(probe.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_empty_fleet_is_inconclusive() {
    let world = World::new(&[], Some(1)).await;
    let probe = Arc::new(ScriptedProbe::serving(&[]));
    let abort = AbortController::new();

    let inspection =
        InspectOverTime::start(inspection_target(), world.context(probe.clone()), inspection_config(), abort.signal());

    assert!(!inspection.wait_for_result().await);
    assert!(inspection.wait_until_done().await.is_empty());
    assert_eq!(probe.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_abort_ends_inspection_and_releases_fleet() {
    let world = World::new(&["target-a"], Some(1)).await;
    let probe = Arc::new(ScriptedProbe::serving(&[]));
    let abort = AbortController::new();

    let inspection =
        InspectOverTime::start(inspection_target(), world.context(probe.clone()), inspection_config(), abort.signal());
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(world.target_subscribers().await, 1);

    // Still waiting for the fleet of the target.
    abort.abort();
    assert!(inspection.wait_until_done().await.is_empty());
    inspection.stop().await;
    assert_eq!(world.target_subscribers().await, 0);
    assert_eq!(probe.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_keeps_results_so_far() {
    let world = World::new(&["target-a"], Some(1)).await;
    let probe = Arc::new(ScriptedProbe::serving(&[]));
    let mut config = inspection_config();
    config.max_inspections = 10;
    config.inspection_interval = Duration::from_secs(60);

    let inspection = InspectOverTime::start(
        inspection_target(),
        world.context(probe.clone()),
        config,
        AbortController::new().signal(),
    );
    // Ready at 22s, attempts at 22s and 82s.
    tokio::time::sleep(Duration::from_secs(100)).await;
    assert_eq!(inspection.stop().await, vec![false, false]);
    assert_eq!(world.target_subscribers().await, 0);
}

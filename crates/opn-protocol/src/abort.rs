//! Cooperative cancellation for long-running loops.
//!
//! An [`AbortController`] owns a watch channel; every loop holds an
//! [`AbortSignal`] and selects on [`AbortSignal::aborted`] next to its timers.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Triggers cancellation for every signal created from it.
#[derive(Debug, Clone)]
pub struct AbortController {
    sender: Arc<watch::Sender<bool>>,
}

impl AbortController {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender: Arc::new(sender) }
    }

    pub fn signal(&self) -> AbortSignal {
        AbortSignal { receiver: Some(self.sender.subscribe()) }
    }

    /// Idempotent.
    pub fn abort(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.sender.borrow()
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of an [`AbortController`].
#[derive(Debug, Clone)]
pub struct AbortSignal {
    receiver: Option<watch::Receiver<bool>>,
}

impl AbortSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self { receiver: None }
    }

    pub fn is_aborted(&self) -> bool {
        self.receiver.as_ref().is_some_and(|r| *r.borrow())
    }

    /// Resolves once the controller aborts. Pending forever if the
    /// controller is dropped without aborting.
    pub async fn aborted(&self) {
        let Some(mut receiver) = self.receiver.clone() else {
            return std::future::pending().await;
        };
        if receiver.wait_for(|aborted| *aborted).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Sleep for `duration` unless aborted first. Returns `true` if the full
/// duration elapsed.
pub async fn sleep_or_abort(duration: Duration, signal: &AbortSignal) -> bool {
    tokio::select! {
        _ = signal.aborted() => false,
        _ = tokio::time::sleep(duration) => !signal.is_aborted(),
    }
}

/// Run `task` every `interval` until `signal` fires.
///
/// Ticks never overlap: the next tick is scheduled after the previous run
/// completes. Task errors are logged and the schedule keeps going.
pub async fn schedule_at_interval<F, Fut, E>(
    name: &'static str,
    mut task: F,
    interval: Duration,
    execute_at_start: bool,
    signal: AbortSignal,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    if !execute_at_start {
        // The first tick of a tokio interval completes immediately.
        ticker.tick().await;
    }

    loop {
        tokio::select! {
            _ = signal.aborted() => {
                tracing::debug!(task = name, "Scheduled task stopped");
                return;
            }
            _ = ticker.tick() => {
                let run = task();
                tokio::select! {
                    _ = signal.aborted() => return,
                    result = run => {
                        if let Err(e) = result {
                            tracing::error!(task = name, error = %e, "Scheduled task failed");
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn abort_wakes_waiters() {
        let controller = AbortController::new();
        let signal = controller.signal();
        assert!(!signal.is_aborted());

        let handle = tokio::spawn(async move {
            signal.aborted().await;
            42
        });
        controller.abort();
        assert_eq!(handle.await.unwrap(), 42);
        assert!(controller.is_aborted());
    }

    #[tokio::test]
    async fn signal_created_after_abort_is_aborted() {
        let controller = AbortController::new();
        controller.abort();
        controller.abort();
        let signal = controller.signal();
        assert!(signal.is_aborted());
        signal.aborted().await;
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_or_abort_reports_completion() {
        let controller = AbortController::new();
        assert!(sleep_or_abort(Duration::from_secs(5), &controller.signal()).await);

        let signal = controller.signal();
        let sleeper = tokio::spawn(async move { sleep_or_abort(Duration::from_secs(60), &signal).await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        controller.abort();
        assert!(!sleeper.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_runs_until_aborted() {
        let controller = AbortController::new();
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let handle = tokio::spawn(schedule_at_interval(
            "counter",
            move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), String>(())
                }
            },
            Duration::from_secs(10),
            true,
            controller.signal(),
        ));

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3, "runs at 0s, 10s and 20s");

        controller.abort();
        handle.await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_can_skip_first_run_and_survives_errors() {
        let controller = AbortController::new();
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let handle = tokio::spawn(schedule_at_interval(
            "failing",
            move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("boom")
                }
            },
            Duration::from_secs(10),
            false,
            controller.signal(),
        ));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        controller.abort();
        handle.await.unwrap();
    }
}

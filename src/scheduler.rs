// src/scheduler.rs
use metrics::gauge;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::scanner::Scanner;

/// Drive `Scanner::cycle` every `interval` until `shutdown` flips to `true`.
///
/// The first cycle runs immediately. Shutdown is only observed between cycles, so an
/// in-flight cycle always completes (its fetches finish or hit their timeouts). A slow
/// cycle delays the next tick instead of queueing a burst of catch-up cycles.
pub fn spawn_scan_scheduler(
    scanner: Arc<Scanner>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(target: "scan", interval_secs = interval.as_secs(), "scan scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            if *shutdown.borrow() {
                break;
            }

            // Errors are logged and counted inside `cycle`; the next tick proceeds normally.
            let _ = scanner.cycle().await;
            gauge!("scan_scheduler_last_tick_ts").set(chrono::Utc::now().timestamp() as f64);
        }
        tracing::info!(target: "scan", "scan scheduler stopped");
    })
}

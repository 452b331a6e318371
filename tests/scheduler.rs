// tests/scheduler.rs
//
// Periodic driver on a paused clock: immediate first cycle, one cycle per tick,
// clean stop on the shutdown signal.

mod common;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use common::{burst, t0, test_config, RecordingSink, Reply, ScriptedMirror};
use trench_scan::scheduler::spawn_scan_scheduler;
use trench_scan::{MemoryStore, Scanner};

#[tokio::test(start_paused = true)]
async fn ticks_until_shutdown() {
    let mirror = ScriptedMirror::new();
    for m in ["https://m1.example", "https://m2.example", "https://m3.example"] {
        mirror.always(m, Reply::Posts(burst("FROG", "a", 2, t0())));
    }
    let scanner = Arc::new(
        Scanner::from_config(
            test_config(),
            mirror.clone(),
            Arc::new(MemoryStore::new()),
            RecordingSink::new(),
        )
        .unwrap(),
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = spawn_scan_scheduler(scanner, Duration::from_secs(60), stop_rx);

    // Ticks at 0s, 60s and 120s.
    tokio::time::sleep(Duration::from_secs(150)).await;
    stop_tx.send(true).unwrap();
    handle.await.unwrap();
    assert_eq!(mirror.calls().len(), 3);

    // Nothing runs after the stop.
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(mirror.calls().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn dropped_sender_stops_the_loop() {
    let scanner = Arc::new(
        Scanner::from_config(
            test_config(),
            ScriptedMirror::new(),
            Arc::new(MemoryStore::new()),
            RecordingSink::new(),
        )
        .unwrap(),
    );
    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = spawn_scan_scheduler(scanner, Duration::from_secs(60), stop_rx);
    drop(stop_tx);
    tokio::time::timeout(Duration::from_secs(3600), handle)
        .await
        .expect("scheduler exits once the sender is gone")
        .unwrap();
}

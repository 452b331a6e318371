//! trench-scan service entrypoint.
//! Boots the periodic scan scheduler and the read-only Axum API.

use shuttle_axum::ShuttleAxum;
use tokio::sync::watch;

use trench_scan::logging::{init_tracing, DEFAULT_FILTER};
use trench_scan::scheduler::spawn_scan_scheduler;
use trench_scan::{app, build_scanner, ScanConfig};

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    // No-op when the runtime already installed a subscriber.
    init_tracing(DEFAULT_FILTER);

    let cfg = ScanConfig::load_default()?;
    let interval = cfg.scan_interval();
    let scanner = build_scanner(cfg)?;
    let router = app(scanner.clone())?;

    let (stop_tx, stop_rx) = watch::channel(false);
    spawn_scan_scheduler(scanner, interval, stop_rx);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!(target: "scan", "shutdown requested");
                let _ = stop_tx.send(true);
            }
            Err(e) => {
                // Without a signal handler the scheduler runs until the process exits.
                tracing::warn!(target: "scan", error = %e, "ctrl-c handler unavailable");
                let _keep = stop_tx;
                std::future::pending::<()>().await;
            }
        }
    });

    Ok(router.into())
}

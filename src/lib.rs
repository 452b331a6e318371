// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod analyze;
pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod metrics;
pub mod notify;
pub mod scanner;
pub mod scheduler;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::config::ScanConfig;
pub use crate::engine::{AlertEvent, TickerStats, TickerStatus, TrendingEngine};
pub use crate::error::ScanError;
pub use crate::notify::{AlertSink, NotifierMux};
pub use crate::scanner::{CycleReport, Scanner};
pub use crate::store::{ContractStats, MemoryStore, RecordStore, StoreSummary, TrendSnapshot};

use anyhow::Context;
use shuttle_axum::axum::Router;
use std::sync::Arc;

use crate::ingest::providers::nitter_rss::NitterRssClient;

/// Production wiring: Nitter RSS client, in-memory store, env-configured alert channels.
pub fn build_scanner(cfg: ScanConfig) -> anyhow::Result<Arc<Scanner>> {
    let client = NitterRssClient::http(&cfg.fetch.user_agent).context("mirror client")?;
    let sink = NotifierMux::from_env().with_cooldown(cfg.alerts.cooldown_secs);
    let scanner = Scanner::from_config(
        cfg,
        Arc::new(client),
        Arc::new(MemoryStore::new()),
        Arc::new(sink),
    )?;
    Ok(Arc::new(scanner))
}

/// API router (with `/metrics`) over an already-built scanner.
pub fn app(scanner: Arc<Scanner>) -> anyhow::Result<Router> {
    let metrics = crate::metrics::Metrics::init()?;
    metrics.publish_config(scanner.config());
    Ok(api::router(api::AppState { scanner }, Some(&metrics)))
}

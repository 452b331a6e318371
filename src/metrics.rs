use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics::gauge;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

use crate::config::ScanConfig;

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

#[derive(Clone)]
pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder once per process; later calls reuse it.
    pub fn init() -> Result<Self> {
        let handle = HANDLE
            .get_or_try_init(|| {
                PrometheusBuilder::new()
                    .install_recorder()
                    .context("prometheus: install recorder")
            })?
            .clone();
        crate::ingest::ensure_metrics_described();
        Ok(Self { handle })
    }

    /// Static gauges describing the active configuration.
    pub fn publish_config(&self, cfg: &ScanConfig) {
        gauge!("config_scan_interval_secs").set(cfg.scan.interval_secs as f64);
        gauge!("config_velocity_threshold").set(cfg.trending.velocity_threshold);
        gauge!("config_min_mentions").set(f64::from(cfg.trending.min_mentions));
        gauge!("config_endpoints").set(cfg.sources.endpoints.len() as f64);
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router<S>(&self) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

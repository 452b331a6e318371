// src/scanner.rs
//! One scan cycle: fetch → spam filter → extract → store → trend → alert.
//!
//! A cycle where every query failed is skipped (typed [`ScanError`]); partial failures
//! still process what arrived. The `since` cursor only moves forward after a cycle in
//! which every query succeeded, so missed windows are re-fetched and absorbed by the
//! id-keyed dedup in the store and the engine.

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};

use crate::analyze::{AntiSpam, AntiSpamParams, ContractExtractor, ExclusionSet, TickerExtractor};
use crate::config::ScanConfig;
use crate::engine::{AlertEvent, TrendingEngine};
use crate::error::ScanError;
use crate::ingest::fetcher::Fetcher;
use crate::ingest::pool::SourcePool;
use crate::ingest::types::MirrorClient;
use crate::ingest::{collect_posts, ensure_metrics_described};
use crate::notify::AlertSink;
use crate::store::{RecordStore, TrendSnapshot};

/// Summary of one successful cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub started_at: Option<DateTime<Utc>>,
    pub fetched_posts: usize,
    pub new_posts: usize,
    pub spam_blocked: usize,
    pub unreadable_posts: usize,
    pub mentions: usize,
    pub new_mentions: usize,
    pub contract_mentions: usize,
    pub failed_queries: usize,
    pub tracked_tickers: usize,
    /// Stats, snapshot and alert writes that failed after the engine moved on.
    pub store_errors: usize,
    pub alerts: Vec<AlertEvent>,
}

pub struct Scanner {
    cfg: Arc<ScanConfig>,
    fetcher: Fetcher,
    extractor: Arc<TickerExtractor>,
    contracts: ContractExtractor,
    spam: Mutex<AntiSpam>,
    engine: tokio::sync::Mutex<TrendingEngine>,
    store: Arc<dyn RecordStore>,
    sink: Arc<dyn AlertSink>,
    cursor: Mutex<Option<DateTime<Utc>>>,
    running: tokio::sync::Mutex<()>,
}

impl Scanner {
    pub fn new(
        cfg: Arc<ScanConfig>,
        fetcher: Fetcher,
        extractor: Arc<TickerExtractor>,
        store: Arc<dyn RecordStore>,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        let spam = AntiSpam::new(AntiSpamParams::from_config(&cfg.extract));
        let engine = TrendingEngine::from_config(&cfg.trending);
        Self {
            cfg,
            fetcher,
            extractor,
            contracts: ContractExtractor::new(),
            spam: Mutex::new(spam),
            engine: tokio::sync::Mutex::new(engine),
            store,
            sink,
            cursor: Mutex::new(None),
            running: tokio::sync::Mutex::new(()),
        }
    }

    /// Wire pool, fetcher and extractor from configuration.
    pub fn from_config(
        cfg: ScanConfig,
        client: Arc<dyn MirrorClient>,
        store: Arc<dyn RecordStore>,
        sink: Arc<dyn AlertSink>,
    ) -> anyhow::Result<Self> {
        cfg.validate()
            .map_err(|e| ScanError::Config(format!("{e:#}")))?;
        let pool = Arc::new(SourcePool::from_config(&cfg.sources));
        let fetcher = Fetcher::from_config(&cfg.fetch, pool, client);
        let extractor = Arc::new(TickerExtractor::from_config(&cfg.extract)?);
        Ok(Self::new(Arc::new(cfg), fetcher, extractor, store, sink))
    }

    pub fn config(&self) -> &ScanConfig {
        &self.cfg
    }

    pub fn pool(&self) -> &Arc<SourcePool> {
        self.fetcher.pool()
    }

    pub fn extractor(&self) -> &Arc<TickerExtractor> {
        &self.extractor
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn engine(&self) -> &tokio::sync::Mutex<TrendingEngine> {
        &self.engine
    }

    /// Lower bound for the next fetch.
    pub fn cursor(&self) -> Option<DateTime<Utc>> {
        *self.cursor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn cycle(&self) -> Result<CycleReport, ScanError> {
        self.cycle_at(Utc::now()).await
    }

    /// Run one cycle as of `now` (the engine buckets and the alert timestamps use it).
    pub async fn cycle_at(&self, now: DateTime<Utc>) -> Result<CycleReport, ScanError> {
        ensure_metrics_described();
        let _running = self.running.lock().await;
        let t0 = std::time::Instant::now();

        let res = self.run(now).await;

        histogram!("scan_cycle_duration_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        match &res {
            Ok(report) => {
                counter!("scan_cycles_total", "result" => "ok").increment(1);
                gauge!("scan_last_success_ts").set(now.timestamp() as f64);
                tracing::info!(
                    target: "scan",
                    fetched = report.fetched_posts,
                    new_posts = report.new_posts,
                    spam = report.spam_blocked,
                    mentions = report.mentions,
                    new_mentions = report.new_mentions,
                    contracts = report.contract_mentions,
                    failed_queries = report.failed_queries,
                    tracked = report.tracked_tickers,
                    store_errors = report.store_errors,
                    alerts = report.alerts.len(),
                    "scan cycle done"
                );
            }
            Err(e) if e.is_skip() => {
                counter!("scan_cycles_total", "result" => "skipped").increment(1);
                tracing::warn!(target: "scan", error = %e, "scan cycle skipped");
            }
            Err(e) => {
                counter!("scan_cycles_total", "result" => "error").increment(1);
                tracing::error!(target: "scan", error = %e, "scan cycle failed");
            }
        }
        res
    }

    async fn run(&self, now: DateTime<Utc>) -> Result<CycleReport, ScanError> {
        let since = self
            .cursor()
            .unwrap_or_else(|| secs_before(now, self.cfg.scan.initial_lookback_secs));

        // 1) fetch
        let collected = collect_posts(
            &self.fetcher,
            &self.cfg.scan.queries,
            since,
            self.cfg.scan.max_parallel_fetches,
        )
        .await;
        for (q, e) in &collected.failures {
            tracing::warn!(target: "scan", query = %q, error = %e, "query failed this cycle");
        }
        if collected.all_failed() {
            let mut failures = collected.failures;
            let no_endpoint = failures
                .iter()
                .any(|(_, e)| matches!(e, ScanError::NoHealthyEndpoint));
            return Err(if no_endpoint {
                ScanError::NoHealthyEndpoint
            } else {
                failures
                    .pop()
                    .map(|(_, e)| e)
                    .unwrap_or(ScanError::NoHealthyEndpoint)
            });
        }

        let mut report = CycleReport {
            started_at: Some(now),
            fetched_posts: collected.posts.len(),
            failed_queries: collected.failures.len(),
            ..Default::default()
        };

        // 2) spam
        let posts = {
            let mut spam = self.spam.lock().unwrap_or_else(PoisonError::into_inner);
            let (kept, blocked) = spam.retain_posts(collected.posts);
            report.spam_blocked = blocked;
            kept
        };

        // 3) extract
        let batch = self.extractor.extract_batch(&posts);
        report.unreadable_posts = batch.skipped;
        report.mentions = batch.mentions.len();
        let contracts = self.contracts.extract_batch(&posts);

        // 4) persist raw records
        report.new_posts = self.store.save_posts(&posts).await?;
        self.store.save_mentions(&batch.mentions).await?;
        report.contract_mentions = self.store.save_contract_mentions(&contracts).await?;

        // 5) ingest + evaluate as one step
        let outcome = {
            let mut engine = self.engine.lock().await;
            report.new_mentions = engine.ingest(&batch.mentions);
            engine.evaluate(now)
        };
        report.tracked_tickers = outcome.ranking.len();

        // 6) derived stats + history. Engine transitions are committed, so store errors
        // from here on are logged and counted, not returned.
        for st in &outcome.ranking {
            if let Err(e) = self.store.upsert_ticker_stats(st).await {
                report.store_errors += 1;
                tracing::error!(target: "scan", ticker = %st.ticker, error = %format!("{e:#}"), "stats write failed");
            }
        }
        let snapshots: Vec<TrendSnapshot> = outcome
            .ranking
            .iter()
            .map(|st| TrendSnapshot::of(st, now))
            .filter(|snap| snap.window_count > 0)
            .collect();
        if let Err(e) = self.store.save_snapshots(&snapshots).await {
            report.store_errors += 1;
            tracing::error!(target: "scan", error = %format!("{e:#}"), "snapshot write failed");
        }

        // 7) alerts
        for alert in &outcome.alerts {
            tracing::info!(
                target: "trending",
                ticker = %alert.ticker,
                velocity = alert.velocity_score,
                mentions = alert.mention_count,
                "ticker entered trending"
            );
            if let Err(e) = self.store.save_alert(alert).await {
                report.store_errors += 1;
                tracing::error!(target: "scan", ticker = %alert.ticker, error = %format!("{e:#}"), "alert write failed");
            }
            if let Err(e) = self.sink.send(alert).await {
                tracing::warn!(target: "scan", ticker = %alert.ticker, error = %format!("{e:#}"), "alert sink failed");
            }
        }
        report.alerts = outcome.alerts;
        if report.store_errors > 0 {
            counter!("store_errors_total").increment(report.store_errors as u64);
        }

        if report.failed_queries == 0 {
            let mut cur = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
            let next = secs_before(now, self.cfg.scan.interval_secs);
            *cur = Some(cur.map_or(next, |c| c.max(next)));
        }

        Ok(report)
    }

    /// Reload the exclusion list from the configured location.
    pub fn reload_exclusions(&self) -> anyhow::Result<usize> {
        let set = ExclusionSet::load(self.cfg.extract.exclusions_path.as_deref())?;
        let n = set.len();
        self.extractor.replace_exclusions(set);
        tracing::info!(target: "scan", symbols = n, "exclusions reloaded");
        Ok(n)
    }
}

fn secs_before(now: DateTime<Utc>, secs: u64) -> DateTime<Utc> {
    let secs = i64::try_from(secs).unwrap_or(i64::MAX).min(i64::MAX / 1000);
    now.checked_sub_signed(Duration::seconds(secs))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

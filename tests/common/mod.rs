// tests/common/mod.rs
// Shared fakes for integration tests: a scripted mirror and a recording alert sink.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use trench_scan::config::ScanConfig;
use trench_scan::ingest::types::{MirrorClient, MirrorError, Post};
use trench_scan::{AlertEvent, AlertSink};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

pub fn post(id: &str, text: &str, at: DateTime<Utc>) -> Post {
    Post {
        id: id.to_string(),
        author: format!("user_{id}"),
        text: text.to_string(),
        url: Some(format!("https://nitter.example/user_{id}/status/{id}")),
        created_at: at,
        fetched_at: at,
    }
}

/// How a scripted mirror answers one call.
#[derive(Clone, Debug)]
pub enum Reply {
    Posts(Vec<Post>),
    Transient,
    Structural,
    /// Never answers; the fetcher's timeout has to fire.
    Hang,
}

/// Mirror fake: per-endpoint queue of replies, then a fallback reply.
#[derive(Default)]
pub struct ScriptedMirror {
    queued: Mutex<HashMap<String, VecDeque<Reply>>>,
    fallback: Mutex<HashMap<String, Reply>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedMirror {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every call to `url` answers `reply` (after any queued replies).
    pub fn always(&self, url: &str, reply: Reply) {
        self.fallback.lock().insert(url.to_string(), reply);
    }

    pub fn then(&self, url: &str, reply: Reply) {
        self.queued
            .lock()
            .entry(url.to_string())
            .or_default()
            .push_back(reply);
    }

    /// (endpoint, query) in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }

    pub fn endpoints_called(&self) -> Vec<String> {
        self.calls().into_iter().map(|(u, _)| u).collect()
    }
}

#[async_trait]
impl MirrorClient for ScriptedMirror {
    async fn search(&self, base_url: &str, query: &str) -> Result<Vec<Post>, MirrorError> {
        self.calls
            .lock()
            .push((base_url.to_string(), query.to_string()));
        let reply = {
            let next = self
                .queued
                .lock()
                .get_mut(base_url)
                .and_then(|q| q.pop_front());
            next.or_else(|| self.fallback.lock().get(base_url).cloned())
                .unwrap_or(Reply::Transient)
        };
        match reply {
            Reply::Posts(p) => Ok(p),
            Reply::Transient => Err(MirrorError::Transient("http 429".into())),
            Reply::Structural => Err(MirrorError::Structural("not a feed".into())),
            Reply::Hang => {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                Err(MirrorError::Transient("hung".into()))
            }
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub alerts: Mutex<Vec<AlertEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn tickers(&self) -> Vec<String> {
        self.alerts.lock().iter().map(|a| a.ticker.clone()).collect()
    }
}

#[async_trait]
impl AlertSink for RecordingSink {
    async fn send(&self, alert: &AlertEvent) -> anyhow::Result<()> {
        self.alerts.lock().push(alert.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Small deterministic config: 3 mirrors, one query, no delays, 1h buckets.
pub fn test_config() -> ScanConfig {
    let mut cfg = ScanConfig::default();
    cfg.sources.endpoints = vec![
        "https://m1.example".into(),
        "https://m2.example".into(),
        "https://m3.example".into(),
    ];
    cfg.sources.degrade_after = 2;
    cfg.sources.ban_cooldown_secs = 600;
    cfg.scan.queries = vec!["memecoin".into()];
    cfg.scan.initial_lookback_secs = 48 * 3600;
    cfg.fetch.base_delay_ms = 0;
    cfg.fetch.max_delay_ms = 0;
    cfg.fetch.jitter = 0.0;
    cfg.fetch.rate_interval_ms = 0;
    cfg.fetch.timeout_secs = 5;
    cfg.trending.bucket_secs = 3600;
    cfg.trending.current_buckets = 1;
    cfg.trending.baseline_buckets = 23;
    cfg.trending.baseline_floor = 1.0;
    cfg.trending.min_mentions = 5;
    cfg.trending.velocity_threshold = 5.0;
    cfg.extract.spam_similarity = 1.0;
    cfg
}

/// `n` posts mentioning `$ticker`, ids `{tag}-{i}`, one second apart from `at`.
pub fn burst(ticker: &str, tag: &str, n: usize, at: DateTime<Utc>) -> Vec<Post> {
    (0..n)
        .map(|i| {
            post(
                &format!("{tag}-{i}"),
                &format!("${ticker} call #{i} from {tag}"),
                at + Duration::seconds(i as i64),
            )
        })
        .collect()
}

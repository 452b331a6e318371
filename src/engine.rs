// src/engine.rs
//! # Trending Engine
//! Mention log → per-ticker bucket counts → velocity score → ranking + alerts.
//!
//! Time is cut into fixed buckets of `bucket` length (aligned to the Unix epoch). For each
//! ticker the last `K = current_buckets + baseline_buckets` buckets form the ring:
//!
//! ```text
//!   [ baseline (oldest .. ) | current (.. open bucket) ]
//! ```
//!
//! `velocity = (current_count / current_buckets) / max(baseline_mean, baseline_floor)`.
//! The baseline mean only spans buckets since the ticker was first seen, so a coin that
//! appeared three hours ago is not diluted by twenty empty hours. A ticker first seen inside
//! the current window has no baseline and scores `current_rate / baseline_floor` (flagged
//! `is_new`).
//!
//! A ticker is trending when `velocity >= velocity_threshold` and
//! `current_count >= min_mentions`. Alerts are edge-triggered on entering trending.
//!
//! The mention log is the source of truth; stats are rebuilt on every [`TrendingEngine::evaluate`].

use chrono::{DateTime, Duration, TimeZone, Utc};
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use crate::analyze::Mention;
use crate::config::TrendingSection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TickerStatus {
    Tracked,
    Trending,
    Cooling,
}

impl TickerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TickerStatus::Tracked => "tracked",
            TickerStatus::Trending => "trending",
            TickerStatus::Cooling => "cooling",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowCount {
    pub window_start: DateTime<Utc>,
    pub count: u32,
}

/// Derived per-ticker view; rebuilt from the mention log each cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerStats {
    pub ticker: String,
    /// Oldest bucket first; the last entry is the open bucket.
    pub window_counts: Vec<WindowCount>,
    pub velocity_score: f64,
    pub current_count: u32,
    pub baseline_mean: f64,
    pub total_mentions: u64,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub status: TickerStatus,
    pub is_new: bool,
}

/// What the alert sink receives when a ticker enters trending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub ticker: String,
    pub velocity_score: f64,
    pub mention_count: u32,
    pub triggered_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TrendingParams {
    pub bucket: Duration,
    pub current_buckets: usize,
    pub baseline_buckets: usize,
    pub baseline_floor: f64,
    pub min_mentions: u32,
    pub velocity_threshold: f64,
}

impl Default for TrendingParams {
    fn default() -> Self {
        Self::from_config(&TrendingSection::default())
    }
}

impl TrendingParams {
    pub fn from_config(cfg: &TrendingSection) -> Self {
        let secs = i64::try_from(cfg.bucket_secs.max(1)).unwrap_or(86_400);
        Self {
            bucket: Duration::seconds(secs.min(i64::MAX / 1000)),
            current_buckets: cfg.current_buckets.max(1),
            baseline_buckets: cfg.baseline_buckets.max(1),
            baseline_floor: if cfg.baseline_floor > 0.0 {
                cfg.baseline_floor
            } else {
                1.0
            },
            min_mentions: cfg.min_mentions,
            velocity_threshold: cfg.velocity_threshold,
        }
    }

    fn ring_len(&self) -> usize {
        self.current_buckets + self.baseline_buckets
    }

    fn bucket_secs(&self) -> i64 {
        self.bucket.num_seconds().max(1)
    }

    fn bucket_of(&self, at: DateTime<Utc>) -> i64 {
        at.timestamp().div_euclid(self.bucket_secs())
    }

    fn bucket_start(&self, idx: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(idx.saturating_mul(self.bucket_secs()), 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Result of one [`TrendingEngine::evaluate`] pass.
#[derive(Debug, Clone, Default)]
pub struct CycleOutcome {
    pub ranking: Vec<TickerStats>,
    pub alerts: Vec<AlertEvent>,
}

#[derive(Debug)]
struct History {
    /// post id → mention time; the per-ticker mention log.
    posts: HashMap<String, DateTime<Utc>>,
    first_seen_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
    total_mentions: u64,
    status: TickerStatus,
}

#[derive(Debug)]
pub struct TrendingEngine {
    params: TrendingParams,
    tickers: BTreeMap<String, History>,
    /// Mentions before this instant were pruned and are no longer accepted.
    horizon: Option<DateTime<Utc>>,
    ranking: Vec<TickerStats>,
}

impl TrendingEngine {
    pub fn new(params: TrendingParams) -> Self {
        Self {
            params,
            tickers: BTreeMap::new(),
            horizon: None,
            ranking: Vec::new(),
        }
    }

    pub fn from_config(cfg: &TrendingSection) -> Self {
        Self::new(TrendingParams::from_config(cfg))
    }

    pub fn params(&self) -> &TrendingParams {
        &self.params
    }

    pub fn tracked(&self) -> usize {
        self.tickers.len()
    }

    /// Append mentions; returns how many were new. Replays of a (ticker, post) pair are no-ops.
    pub fn ingest(&mut self, mentions: &[Mention]) -> usize {
        let mut added = 0usize;
        for m in mentions {
            if self.horizon.is_some_and(|h| m.mentioned_at < h) {
                continue;
            }
            let h = self
                .tickers
                .entry(m.ticker.clone())
                .or_insert_with(|| History {
                    posts: HashMap::new(),
                    first_seen_at: m.mentioned_at,
                    last_seen_at: m.mentioned_at,
                    total_mentions: 0,
                    status: TickerStatus::Tracked,
                });
            if h.posts.contains_key(&m.post_id) {
                continue;
            }
            h.posts.insert(m.post_id.clone(), m.mentioned_at);
            h.total_mentions += 1;
            h.first_seen_at = h.first_seen_at.min(m.mentioned_at);
            h.last_seen_at = h.last_seen_at.max(m.mentioned_at);
            added += 1;
        }
        added
    }

    /// Stats for every tracked ticker at `now`, ranked. Does not change any state.
    pub fn rank(&self, now: DateTime<Utc>) -> Vec<TickerStats> {
        let mut out: Vec<TickerStats> = self
            .tickers
            .iter()
            .map(|(sym, h)| self.compute(sym, h, now))
            .collect();
        out.sort_by(rank_order);
        out
    }

    /// Stats for one ticker (case-insensitive) at `now`.
    pub fn stats(&self, symbol: &str, now: DateTime<Utc>) -> Option<TickerStats> {
        let sym = symbol.trim().trim_start_matches('$').to_ascii_uppercase();
        self.tickers.get(&sym).map(|h| self.compute(&sym, h, now))
    }

    /// The ranking cached by the last `evaluate`.
    pub fn last_ranking(&self) -> &[TickerStats] {
        &self.ranking
    }

    /// One cycle: prune, rebuild stats, move the state machine, collect alerts.
    pub fn evaluate(&mut self, now: DateTime<Utc>) -> CycleOutcome {
        self.prune(now);

        let mut alerts = Vec::new();
        let mut ranking = Vec::with_capacity(self.tickers.len());
        for (sym, h) in self.tickers.iter() {
            ranking.push(self.compute(sym, h, now));
        }

        for st in ranking.iter_mut() {
            let qualifies = self.qualifies(st);
            let Some(h) = self.tickers.get_mut(&st.ticker) else {
                continue;
            };
            let next = match (h.status, qualifies) {
                (TickerStatus::Trending, false) => TickerStatus::Cooling,
                (TickerStatus::Trending, true) => TickerStatus::Trending,
                (_, true) => {
                    alerts.push(AlertEvent {
                        ticker: st.ticker.clone(),
                        velocity_score: st.velocity_score,
                        mention_count: st.current_count,
                        triggered_at: now,
                    });
                    TickerStatus::Trending
                }
                (prev, false) => prev,
            };
            if next != h.status {
                tracing::info!(
                    target: "trending",
                    ticker = %st.ticker,
                    from = h.status.as_str(),
                    to = next.as_str(),
                    velocity = st.velocity_score,
                    current = st.current_count,
                    "ticker status changed"
                );
            }
            h.status = next;
            st.status = next;
        }

        ranking.sort_by(rank_order);
        alerts.sort_by(|a, b| {
            b.velocity_score
                .total_cmp(&a.velocity_score)
                .then_with(|| a.ticker.cmp(&b.ticker))
        });

        let trending = ranking
            .iter()
            .filter(|s| s.status == TickerStatus::Trending)
            .count();
        gauge!("trending_tickers").set(trending as f64);
        gauge!("trending_tracked_tickers").set(ranking.len() as f64);
        counter!("trending_alerts_total").increment(alerts.len() as u64);

        self.ranking = ranking.clone();
        CycleOutcome { ranking, alerts }
    }

    /// Tickers first seen in `(now - window, now]`, newest first.
    pub fn new_discoveries(&self, now: DateTime<Utc>, window: Duration) -> Vec<TickerStats> {
        let since = now - window;
        let mut out: Vec<TickerStats> = self
            .tickers
            .iter()
            .filter(|(_, h)| h.first_seen_at > since && h.first_seen_at <= now)
            .map(|(sym, h)| self.compute(sym, h, now))
            .collect();
        out.sort_by(|a, b| {
            b.first_seen_at
                .cmp(&a.first_seen_at)
                .then_with(|| a.ticker.cmp(&b.ticker))
        });
        out
    }

    fn qualifies(&self, st: &TickerStats) -> bool {
        st.velocity_score >= self.params.velocity_threshold
            && st.current_count >= self.params.min_mentions
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let p = &self.params;
        let oldest = p.bucket_of(now) - (p.ring_len() as i64 - 1);
        let cutoff = p.bucket_start(oldest);
        for h in self.tickers.values_mut() {
            h.posts.retain(|_, at| *at >= cutoff);
        }
        self.horizon = Some(self.horizon.map_or(cutoff, |h| h.max(cutoff)));
    }

    fn compute(&self, sym: &str, h: &History, now: DateTime<Utc>) -> TickerStats {
        let p = &self.params;
        let k = p.ring_len();
        let cur = p.bucket_of(now);
        let oldest = cur - (k as i64 - 1);

        let mut ring = vec![0u32; k];
        for at in h.posts.values() {
            let b = p.bucket_of(*at);
            if b >= oldest && b <= cur {
                let slot = (b - oldest) as usize;
                ring[slot] = ring[slot].saturating_add(1);
            }
        }

        let split = p.baseline_buckets;
        let current_count: u32 = ring[split..].iter().sum();
        let current_rate = f64::from(current_count) / p.current_buckets as f64;

        let current_start = oldest + split as i64;
        let first_bucket = p.bucket_of(h.first_seen_at);
        let is_new = first_bucket >= current_start;

        let baseline_mean = if is_new {
            0.0
        } else {
            // Only buckets since first sighting form the baseline.
            let from = (first_bucket.max(oldest) - oldest) as usize;
            let span = &ring[from..split];
            let sum: u32 = span.iter().sum();
            f64::from(sum) / span.len().max(1) as f64
        };

        let velocity_score = current_rate / baseline_mean.max(p.baseline_floor);

        debug_assert!(baseline_mean >= 0.0, "negative baseline for {sym}");
        debug_assert!(
            ring.iter().map(|c| u64::from(*c)).sum::<u64>() <= h.total_mentions,
            "window counts exceed mention history for {sym}"
        );
        debug_assert!(velocity_score.is_finite(), "non-finite velocity for {sym}");

        let window_counts = ring
            .iter()
            .enumerate()
            .map(|(i, c)| WindowCount {
                window_start: p.bucket_start(oldest + i as i64),
                count: *c,
            })
            .collect();

        TickerStats {
            ticker: sym.to_string(),
            window_counts,
            velocity_score,
            current_count,
            baseline_mean,
            total_mentions: h.total_mentions,
            first_seen_at: h.first_seen_at,
            last_seen_at: h.last_seen_at,
            status: h.status,
            is_new,
        }
    }
}

/// Velocity desc, then most recently seen, then symbol.
pub fn rank_order(a: &TickerStats, b: &TickerStats) -> Ordering {
    b.velocity_score
        .total_cmp(&a.velocity_score)
        .then_with(|| b.last_seen_at.cmp(&a.last_seen_at))
        .then_with(|| a.ticker.cmp(&b.ticker))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hour(h: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap() + Duration::hours(h)
    }

    fn params() -> TrendingParams {
        TrendingParams {
            bucket: Duration::hours(1),
            current_buckets: 1,
            baseline_buckets: 23,
            baseline_floor: 1.0,
            min_mentions: 5,
            velocity_threshold: 5.0,
        }
    }

    fn mentions(ticker: &str, at: DateTime<Utc>, n: usize, tag: &str) -> Vec<Mention> {
        (0..n)
            .map(|i| Mention {
                ticker: ticker.into(),
                post_id: format!("{tag}-{i}"),
                mentioned_at: at + Duration::seconds(i as i64),
            })
            .collect()
    }

    /// 2 mentions in each of the 23 baseline hours, `current` in the open hour (hour 23).
    fn seeded(current: usize) -> TrendingEngine {
        let mut e = TrendingEngine::new(params());
        for h in 0..23 {
            e.ingest(&mentions("FOO", hour(h), 2, &format!("b{h}")));
        }
        e.ingest(&mentions("FOO", hour(23), current, "cur"));
        e
    }

    #[test]
    fn velocity_ratio_against_baseline() {
        let mut e = seeded(12);
        let out = e.evaluate(hour(23) + Duration::minutes(30));
        let st = &out.ranking[0];
        assert_eq!(st.current_count, 12);
        assert!((st.baseline_mean - 2.0).abs() < 1e-9);
        assert!((st.velocity_score - 6.0).abs() < 1e-9);
        assert_eq!(st.status, TickerStatus::Trending);
        assert_eq!(out.alerts.len(), 1);
        assert_eq!(st.window_counts.len(), 24);
    }

    #[test]
    fn single_mention_never_trends() {
        let mut e = TrendingEngine::new(TrendingParams {
            min_mentions: 3,
            ..params()
        });
        e.ingest(&mentions("ONE", hour(5), 1, "x"));
        let out = e.evaluate(hour(5));
        let st = &out.ranking[0];
        assert!(st.is_new);
        assert!((st.velocity_score - 1.0).abs() < 1e-9);
        assert_eq!(st.status, TickerStatus::Tracked);
        assert!(out.alerts.is_empty());
    }

    #[test]
    fn new_discovery_uses_floor() {
        let mut e = TrendingEngine::new(TrendingParams {
            baseline_floor: 2.0,
            ..params()
        });
        e.ingest(&mentions("NEW", hour(3), 8, "n"));
        let st = e.rank(hour(3))[0].clone();
        assert!(st.is_new);
        assert!((st.velocity_score - 4.0).abs() < 1e-9);
    }

    #[test]
    fn reingest_is_idempotent() {
        let mut e = TrendingEngine::new(params());
        let batch = mentions("FOO", hour(1), 4, "p");
        assert_eq!(e.ingest(&batch), 4);
        assert_eq!(e.ingest(&batch), 0);
        let st = e.stats("foo", hour(1)).unwrap();
        assert_eq!(st.current_count, 4);
        assert_eq!(st.total_mentions, 4);
    }

    #[test]
    fn alert_is_edge_triggered_and_rearms_after_cooling() {
        let mut e = seeded(12);
        let now = hour(23) + Duration::minutes(10);
        assert_eq!(e.evaluate(now).alerts.len(), 1);
        assert_eq!(e.evaluate(now + Duration::minutes(5)).alerts.len(), 0);
        assert_eq!(e.evaluate(now + Duration::minutes(10)).alerts.len(), 0);

        // Next hour: nothing new, so the ticker cools down.
        let later = hour(24) + Duration::minutes(5);
        let out = e.evaluate(later);
        assert!(out.alerts.is_empty());
        assert_eq!(e.stats("FOO", later).unwrap().status, TickerStatus::Cooling);

        // Burst again: re-alert.
        e.ingest(&mentions("FOO", hour(24) + Duration::minutes(10), 30, "again"));
        let out = e.evaluate(hour(24) + Duration::minutes(20));
        assert_eq!(out.alerts.len(), 1);
        assert_eq!(out.alerts[0].ticker, "FOO");
    }

    #[test]
    fn velocity_is_monotone_in_current_count() {
        let mut last = f64::MIN;
        for n in [0usize, 3, 6, 12, 24] {
            let e = seeded(n);
            let v = e.rank(hour(23) + Duration::minutes(30))[0].velocity_score;
            assert!(v >= last, "velocity dropped at current={n}");
            last = v;
        }
    }

    #[test]
    fn ranking_tie_breaks() {
        let mut e = TrendingEngine::new(params());
        e.ingest(&mentions("BBB", hour(2), 2, "b"));
        e.ingest(&mentions("AAA", hour(2), 2, "a"));
        e.ingest(&mentions("CCC", hour(2) + Duration::minutes(1), 2, "c"));
        e.ingest(&mentions("TOP", hour(2), 9, "t"));
        let order: Vec<_> = e
            .rank(hour(2) + Duration::minutes(30))
            .into_iter()
            .map(|s| s.ticker)
            .collect();
        assert_eq!(order, vec!["TOP", "CCC", "AAA", "BBB"]);
    }

    #[test]
    fn pruning_keeps_totals_and_rejects_stale_replays() {
        let mut e = TrendingEngine::new(params());
        let old = mentions("OLD", hour(0), 3, "o");
        e.ingest(&old);
        e.evaluate(hour(30));
        let st = e.stats("OLD", hour(30)).unwrap();
        assert_eq!(st.total_mentions, 3);
        assert_eq!(st.window_counts.iter().map(|w| w.count).sum::<u32>(), 0);
        assert_eq!(e.ingest(&old), 0);
    }

    #[test]
    fn new_discoveries_newest_first() {
        let mut e = TrendingEngine::new(params());
        e.ingest(&mentions("OLD", hour(0), 1, "o"));
        e.ingest(&mentions("MID", hour(30), 1, "m"));
        e.ingest(&mentions("NEW", hour(40), 1, "n"));
        let found: Vec<_> = e
            .new_discoveries(hour(41), Duration::hours(24))
            .into_iter()
            .map(|s| s.ticker)
            .collect();
        assert_eq!(found, vec!["NEW", "MID"]);
    }

    #[test]
    fn young_ticker_baseline_is_not_diluted() {
        let mut e = TrendingEngine::new(params());
        // Seen 2 and 1 hours ago (1 mention each), then 10 now.
        e.ingest(&mentions("YNG", hour(10), 1, "a"));
        e.ingest(&mentions("YNG", hour(11), 1, "b"));
        e.ingest(&mentions("YNG", hour(12), 10, "c"));
        let st = e.stats("YNG", hour(12)).unwrap();
        assert!(!st.is_new);
        assert!((st.baseline_mean - 1.0).abs() < 1e-9);
        assert!((st.velocity_score - 10.0).abs() < 1e-9);
    }
}

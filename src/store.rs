// src/store.rs
//! Record store seam and the in-memory implementation.
//!
//! The pipeline writes posts, mentions, contract mentions, rebuilt stats, per-cycle
//! snapshots and alerts; the read API and the one-shot binary query them back. Writes are
//! replay-safe: a post id is stored once, a (ticker, post id) or (address, post id) mention
//! is stored once.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::RwLock;

use crate::analyze::contract::short_address;
use crate::analyze::{ContractMention, Mention};
use crate::engine::{rank_order, AlertEvent, TickerStats, TickerStatus};
use crate::ingest::types::Post;

/// One ticker's numbers at the end of one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSnapshot {
    pub ticker: String,
    pub captured_at: DateTime<Utc>,
    pub current_count: u32,
    /// Mentions across the whole bucket ring.
    pub window_count: u64,
    pub total_mentions: u64,
    pub velocity_score: f64,
    pub status: TickerStatus,
}

impl TrendSnapshot {
    pub fn of(stats: &TickerStats, captured_at: DateTime<Utc>) -> Self {
        Self {
            ticker: stats.ticker.clone(),
            captured_at,
            current_count: stats.current_count,
            window_count: stats.window_counts.iter().map(|w| u64::from(w.count)).sum(),
            total_mentions: stats.total_mentions,
            velocity_score: stats.velocity_score,
            status: stats.status,
        }
    }
}

/// A contract address and what is known about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractStats {
    pub address: String,
    pub chain: String,
    /// Display form, `Ai3e...pump`.
    pub symbol: String,
    /// Cashtag posted alongside the address, when a post carried exactly one.
    pub ticker: Option<String>,
    pub total_mentions: u64,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// Store-wide counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSummary {
    pub total_tickers: usize,
    pub total_posts: usize,
    pub total_mentions: usize,
    pub mentions_1h: usize,
    pub mentions_24h: usize,
    pub total_contracts: usize,
    pub generated_at: DateTime<Utc>,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Returns how many posts were new.
    async fn save_posts(&self, posts: &[Post]) -> Result<usize>;
    /// Returns how many mentions were new. Mentions of unknown posts are dropped.
    async fn save_mentions(&self, mentions: &[Mention]) -> Result<usize>;
    async fn upsert_ticker_stats(&self, stats: &TickerStats) -> Result<()>;
    /// Ranked stats with at least `min_mentions` in the current window.
    async fn query_trending(&self, limit: usize, min_mentions: u32) -> Result<Vec<TickerStats>>;
    async fn query_ticker(&self, symbol: &str) -> Result<Option<TickerStats>>;
    /// Tickers first seen in `(now - window, now]`, newest first.
    async fn query_new(&self, window: Duration, now: DateTime<Utc>) -> Result<Vec<TickerStats>>;
    /// Newest posts mentioning `symbol`.
    async fn ticker_posts(&self, symbol: &str, limit: usize) -> Result<Vec<Post>>;
    async fn save_alert(&self, alert: &AlertEvent) -> Result<()>;
    /// Newest first.
    async fn recent_alerts(&self, limit: usize) -> Result<Vec<AlertEvent>>;
    /// Returns how many were new. Contract mentions of unknown posts are dropped.
    async fn save_contract_mentions(&self, mentions: &[ContractMention]) -> Result<usize>;
    /// Most recently seen first.
    async fn query_contracts(&self, limit: usize) -> Result<Vec<ContractStats>>;
    /// The contract most recently linked to `symbol`.
    async fn ticker_contract(&self, symbol: &str) -> Result<Option<ContractStats>>;
    async fn save_snapshots(&self, snapshots: &[TrendSnapshot]) -> Result<()>;
    /// Newest first.
    async fn ticker_history(&self, symbol: &str, limit: usize) -> Result<Vec<TrendSnapshot>>;
    async fn summary(&self, now: DateTime<Utc>) -> Result<StoreSummary>;
}

pub const DEFAULT_POST_CAPACITY: usize = 50_000;
pub const DEFAULT_ALERT_CAPACITY: usize = 1_000;
/// A day of five-minute cycles.
pub const DEFAULT_SNAPSHOT_CAPACITY: usize = 288;

#[derive(Debug, Default)]
struct Tables {
    posts: HashMap<String, Post>,
    /// Insertion order, for capacity eviction.
    post_order: VecDeque<String>,
    mentions: HashSet<(String, String)>,
    /// ticker → post ids, in insertion order.
    by_ticker: HashMap<String, Vec<String>>,
    /// post id → tickers it mentions.
    post_tickers: HashMap<String, Vec<String>>,
    stats: HashMap<String, TickerStats>,
    alerts: VecDeque<AlertEvent>,
    contracts: HashMap<String, ContractStats>,
    contract_mentions: HashSet<(String, String)>,
    snapshots: HashMap<String, VecDeque<TrendSnapshot>>,
}

/// Process-local store. Bounded: oldest posts and alerts are evicted past capacity.
#[derive(Debug)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    post_capacity: usize,
    alert_capacity: usize,
    snapshot_capacity: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_POST_CAPACITY, DEFAULT_ALERT_CAPACITY)
    }

    pub fn with_capacity(post_capacity: usize, alert_capacity: usize) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            post_capacity: post_capacity.max(1),
            alert_capacity: alert_capacity.max(1),
            snapshot_capacity: DEFAULT_SNAPSHOT_CAPACITY,
        }
    }

    /// Snapshots kept per ticker.
    pub fn with_snapshot_capacity(mut self, n: usize) -> Self {
        self.snapshot_capacity = n.max(1);
        self
    }

    pub async fn post_count(&self) -> usize {
        self.tables.read().await.posts.len()
    }

    pub async fn mention_count(&self) -> usize {
        self.tables.read().await.mentions.len()
    }
}

fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().trim_start_matches('$').to_ascii_uppercase()
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn save_posts(&self, posts: &[Post]) -> Result<usize> {
        let mut t = self.tables.write().await;
        let mut added = 0usize;
        for p in posts {
            if t.posts.contains_key(&p.id) {
                continue;
            }
            t.posts.insert(p.id.clone(), p.clone());
            t.post_order.push_back(p.id.clone());
            added += 1;
        }
        while t.post_order.len() > self.post_capacity {
            let Some(old) = t.post_order.pop_front() else {
                break;
            };
            t.posts.remove(&old);
            t.post_tickers.remove(&old);
            t.mentions.retain(|(_, pid)| pid != &old);
            t.contract_mentions.retain(|(_, pid)| pid != &old);
            for ids in t.by_ticker.values_mut() {
                ids.retain(|pid| pid != &old);
            }
        }
        Ok(added)
    }

    async fn save_mentions(&self, mentions: &[Mention]) -> Result<usize> {
        let mut t = self.tables.write().await;
        let mut added = 0usize;
        let mut orphans = 0usize;
        for m in mentions {
            if !t.posts.contains_key(&m.post_id) {
                orphans += 1;
                continue;
            }
            if !t.mentions.insert((m.ticker.clone(), m.post_id.clone())) {
                continue;
            }
            t.by_ticker
                .entry(m.ticker.clone())
                .or_default()
                .push(m.post_id.clone());
            t.post_tickers
                .entry(m.post_id.clone())
                .or_default()
                .push(m.ticker.clone());
            added += 1;
        }
        if orphans > 0 {
            tracing::warn!(target: "store", orphans, "mentions without a stored post dropped");
        }
        Ok(added)
    }

    async fn upsert_ticker_stats(&self, stats: &TickerStats) -> Result<()> {
        let mut t = self.tables.write().await;
        t.stats.insert(stats.ticker.clone(), stats.clone());
        Ok(())
    }

    async fn query_trending(&self, limit: usize, min_mentions: u32) -> Result<Vec<TickerStats>> {
        let t = self.tables.read().await;
        let mut out: Vec<TickerStats> = t
            .stats
            .values()
            .filter(|s| s.current_count >= min_mentions)
            .cloned()
            .collect();
        out.sort_by(rank_order);
        out.truncate(limit);
        Ok(out)
    }

    async fn query_ticker(&self, symbol: &str) -> Result<Option<TickerStats>> {
        let t = self.tables.read().await;
        Ok(t.stats.get(&normalize_symbol(symbol)).cloned())
    }

    async fn query_new(&self, window: Duration, now: DateTime<Utc>) -> Result<Vec<TickerStats>> {
        let since = now - window;
        let t = self.tables.read().await;
        let mut out: Vec<TickerStats> = t
            .stats
            .values()
            .filter(|s| s.first_seen_at > since && s.first_seen_at <= now)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.first_seen_at
                .cmp(&a.first_seen_at)
                .then_with(|| a.ticker.cmp(&b.ticker))
        });
        Ok(out)
    }

    async fn ticker_posts(&self, symbol: &str, limit: usize) -> Result<Vec<Post>> {
        let t = self.tables.read().await;
        let Some(ids) = t.by_ticker.get(&normalize_symbol(symbol)) else {
            return Ok(Vec::new());
        };
        let mut posts: Vec<Post> = ids.iter().filter_map(|id| t.posts.get(id)).cloned().collect();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        posts.truncate(limit);
        Ok(posts)
    }

    async fn save_alert(&self, alert: &AlertEvent) -> Result<()> {
        let mut t = self.tables.write().await;
        t.alerts.push_back(alert.clone());
        while t.alerts.len() > self.alert_capacity {
            t.alerts.pop_front();
        }
        Ok(())
    }

    async fn recent_alerts(&self, limit: usize) -> Result<Vec<AlertEvent>> {
        let t = self.tables.read().await;
        Ok(t.alerts.iter().rev().take(limit).cloned().collect())
    }

    async fn save_contract_mentions(&self, mentions: &[ContractMention]) -> Result<usize> {
        let mut t = self.tables.write().await;
        let mut added = 0usize;
        for m in mentions {
            if !t.posts.contains_key(&m.post_id) {
                continue;
            }
            if !t
                .contract_mentions
                .insert((m.address.clone(), m.post_id.clone()))
            {
                continue;
            }
            let linked = match t.post_tickers.get(&m.post_id).map(Vec::as_slice) {
                Some([only]) => Some(only.clone()),
                _ => None,
            };
            let entry = t
                .contracts
                .entry(m.address.clone())
                .or_insert_with(|| ContractStats {
                    address: m.address.clone(),
                    chain: m.chain.clone(),
                    symbol: short_address(&m.address),
                    ticker: None,
                    total_mentions: 0,
                    first_seen_at: m.mentioned_at,
                    last_seen_at: m.mentioned_at,
                });
            entry.total_mentions += 1;
            entry.first_seen_at = entry.first_seen_at.min(m.mentioned_at);
            entry.last_seen_at = entry.last_seen_at.max(m.mentioned_at);
            if entry.ticker.is_none() {
                entry.ticker = linked;
            }
            added += 1;
        }
        Ok(added)
    }

    async fn query_contracts(&self, limit: usize) -> Result<Vec<ContractStats>> {
        let t = self.tables.read().await;
        let mut out: Vec<ContractStats> = t.contracts.values().cloned().collect();
        out.sort_by(|a, b| {
            b.last_seen_at
                .cmp(&a.last_seen_at)
                .then_with(|| a.address.cmp(&b.address))
        });
        out.truncate(limit);
        Ok(out)
    }

    async fn ticker_contract(&self, symbol: &str) -> Result<Option<ContractStats>> {
        let sym = normalize_symbol(symbol);
        let t = self.tables.read().await;
        Ok(t
            .contracts
            .values()
            .filter(|c| c.ticker.as_deref() == Some(sym.as_str()))
            .max_by(|a, b| {
                a.last_seen_at
                    .cmp(&b.last_seen_at)
                    .then_with(|| b.address.cmp(&a.address))
            })
            .cloned())
    }

    async fn save_snapshots(&self, snapshots: &[TrendSnapshot]) -> Result<()> {
        let mut t = self.tables.write().await;
        for snap in snapshots {
            let ring = t.snapshots.entry(snap.ticker.clone()).or_default();
            ring.push_back(snap.clone());
            while ring.len() > self.snapshot_capacity {
                ring.pop_front();
            }
        }
        Ok(())
    }

    async fn ticker_history(&self, symbol: &str, limit: usize) -> Result<Vec<TrendSnapshot>> {
        let t = self.tables.read().await;
        Ok(t
            .snapshots
            .get(&normalize_symbol(symbol))
            .map(|ring| ring.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn summary(&self, now: DateTime<Utc>) -> Result<StoreSummary> {
        let t = self.tables.read().await;
        let hour_ago = now - Duration::hours(1);
        let day_ago = now - Duration::hours(24);
        let (mut mentions_1h, mut mentions_24h) = (0usize, 0usize);
        for (_, pid) in &t.mentions {
            let Some(p) = t.posts.get(pid) else {
                continue;
            };
            if p.created_at >= day_ago {
                mentions_24h += 1;
                if p.created_at >= hour_ago {
                    mentions_1h += 1;
                }
            }
        }
        Ok(StoreSummary {
            total_tickers: t.by_ticker.len(),
            total_posts: t.posts.len(),
            total_mentions: t.mentions.len(),
            mentions_1h,
            mentions_24h,
            total_contracts: t.contracts.len(),
            generated_at: now,
        })
    }
}

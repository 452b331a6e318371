// src/ingest/mod.rs
pub mod fetcher;
pub mod limiter;
pub mod pool;
pub mod providers;
pub mod types;

use crate::error::ScanError;
use crate::ingest::fetcher::Fetcher;
use crate::ingest::types::Post;
use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "fetch_attempts_total",
            "Mirror attempts by outcome (success / soft_failure / hard_failure)."
        );
        describe_counter!("fetch_posts_total", "Posts returned by successful fetches.");
        describe_counter!("fetch_exhausted_total", "Fetches that ran out of attempts.");
        describe_counter!(
            "fetch_no_endpoint_total",
            "Fetches refused because every mirror was banned."
        );
        describe_counter!(
            "fetch_items_skipped_total",
            "Feed items without a usable id or date."
        );
        describe_histogram!("fetch_duration_ms", "Single mirror attempt in milliseconds.");
        describe_histogram!("fetch_parse_ms", "Feed parse time in milliseconds.");
        describe_gauge!("pool_endpoints", "Mirror endpoints per health state.");
        describe_counter!("pool_transitions_total", "Endpoint health transitions.");
        describe_counter!("ingest_duplicate_posts_total", "Posts seen by more than one query.");
    });
}

/// Normalize post text: decode entities, strip tags, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Drop zero-width characters used to break up spam filters
    out.retain(|c| !matches!(c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}'));

    // 5) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").expect("ws regex"));
    out = re_ws.replace_all(&out, " ").trim().to_string();

    // 6) Length cap: 1500 chars
    if out.chars().count() > 1500 {
        out = out.chars().take(1500).collect();
    }

    out
}

/// Keep the first post per id, preserving order. Returns (posts, duplicates dropped).
pub fn dedup_by_id(posts: Vec<Post>) -> (Vec<Post>, usize) {
    let mut seen: HashSet<String> = HashSet::with_capacity(posts.len());
    let mut keep = Vec::with_capacity(posts.len());
    let mut dropped = 0usize;
    for p in posts {
        if seen.insert(p.id.clone()) {
            keep.push(p);
        } else {
            dropped += 1;
        }
    }
    (keep, dropped)
}

/// Outcome of fetching every query of one cycle.
#[derive(Debug, Default)]
pub struct Collected {
    pub posts: Vec<Post>,
    pub ok_queries: usize,
    pub failures: Vec<(String, ScanError)>,
}

impl Collected {
    /// Every query failed: the cycle has nothing to work with.
    pub fn all_failed(&self) -> bool {
        self.ok_queries == 0 && !self.failures.is_empty()
    }
}

/// Fetch all `queries` with at most `parallelism` in flight, merged and deduplicated by id.
pub async fn collect_posts(
    fetcher: &Fetcher,
    queries: &[String],
    since: DateTime<Utc>,
    parallelism: usize,
) -> Collected {
    ensure_metrics_described();

    let permits = Arc::new(Semaphore::new(parallelism.max(1)));
    let mut set = JoinSet::new();
    for (idx, q) in queries.iter().enumerate() {
        let q = q.trim().to_string();
        if q.is_empty() {
            continue;
        }
        let fetcher = fetcher.clone();
        let permits = Arc::clone(&permits);
        set.spawn(async move {
            // Semaphore is never closed, acquire only fails after close().
            let _permit = permits.acquire_owned().await.ok();
            let res = fetcher.fetch(&q, since).await;
            (idx, q, res)
        });
    }

    let mut results = Vec::with_capacity(queries.len());
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(r) => results.push(r),
            Err(e) => tracing::error!(target: "fetch", error = %e, "fetch task panicked"),
        }
    }
    // Stable order regardless of completion order.
    results.sort_by_key(|(idx, _, _)| *idx);

    let mut out = Collected::default();
    let mut raw = Vec::new();
    for (_, q, res) in results {
        match res {
            Ok(mut posts) => {
                out.ok_queries += 1;
                raw.append(&mut posts);
            }
            Err(e) => out.failures.push((q, e)),
        }
    }

    let (posts, dupes) = dedup_by_id(raw);
    counter!("ingest_duplicate_posts_total").increment(dupes as u64);
    out.posts = posts;
    out
}

// src/ingest/providers/nitter_rss.rs
//! Nitter-style mirror client: `GET {mirror}/search/rss?f=tweets&q=<query>`.
//!
//! Classification of failures (drives pool health):
//! - transient: timeout/connect/reset, HTTP 429 and 5xx, empty body
//! - structural: HTTP 401/403/404/410, body that is not a parseable feed

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use once_cell::sync::Lazy;
use quick_xml::de::from_str;
use regex::Regex;
use reqwest::StatusCode;
use serde::Deserialize;
use time::{format_description::well_known::Rfc2822, OffsetDateTime};

use crate::ingest::normalize_text;
use crate::ingest::types::{MirrorClient, MirrorError, Post};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    #[serde(rename = "dc:creator", alias = "creator", default)]
    creator: Option<String>,
    description: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    guid: Option<String>,
    link: Option<String>,
}

static RE_STATUS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/([A-Za-z0-9_]{1,30})/status/(\d+)").expect("status regex"));

fn parse_pub_date(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    if let Ok(dt) = OffsetDateTime::parse(ts, &Rfc2822) {
        return DateTime::<Utc>::from_timestamp(dt.unix_timestamp(), dt.nanosecond());
    }
    DateTime::parse_from_rfc2822(ts)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Map a mirror HTTP status to a failure class; `None` means "usable response".
pub fn classify_status(status: StatusCode) -> Option<MirrorError> {
    if status.is_success() {
        return None;
    }
    match status.as_u16() {
        401 | 403 | 404 | 410 => Some(MirrorError::Structural(format!("http {status}"))),
        _ => Some(MirrorError::Transient(format!("http {status}"))),
    }
}

/// Parse a search feed body into posts. Items without id or date are skipped.
pub fn parse_feed(body: &str, fetched_at: DateTime<Utc>) -> Result<Vec<Post>> {
    let t0 = std::time::Instant::now();
    let rss: Rss = from_str(body).context("parsing mirror rss xml")?;

    let mut out = Vec::with_capacity(rss.channel.item.len());
    let mut skipped = 0u64;
    for it in rss.channel.item {
        let permalink = it.link.as_deref().or(it.guid.as_deref()).unwrap_or_default();
        let Some(caps) = RE_STATUS.captures(permalink) else {
            skipped += 1;
            continue;
        };
        let Some(created_at) = it.pub_date.as_deref().and_then(parse_pub_date) else {
            skipped += 1;
            continue;
        };

        let raw = it
            .title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .or(it.description.as_deref())
            .unwrap_or_default();
        let text = normalize_text(raw);

        let author = it
            .creator
            .as_deref()
            .map(|c| c.trim().trim_start_matches('@').to_string())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| caps[1].to_string());

        out.push(Post {
            id: caps[2].to_string(),
            author,
            text,
            url: Some(permalink.trim_end_matches("#m").to_string()),
            created_at,
            fetched_at,
        });
    }

    if skipped > 0 {
        tracing::warn!(target: "fetch", skipped, "feed items without id/date skipped");
        counter!("fetch_items_skipped_total").increment(skipped);
    }
    histogram!("fetch_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    Ok(out)
}

pub struct NitterRssClient {
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http { client: reqwest::Client },
}

impl NitterRssClient {
    /// Serve the same feed body for every mirror and query.
    pub fn from_fixture(s: &str) -> Self {
        Self {
            mode: Mode::Fixture(s.to_string()),
        }
    }

    pub fn http(user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .context("building mirror http client")?;
        Ok(Self {
            mode: Mode::Http { client },
        })
    }

    async fn fetch_body(
        client: &reqwest::Client,
        base_url: &str,
        query: &str,
    ) -> Result<String, MirrorError> {
        let url = format!("{}/search/rss", base_url.trim_end_matches('/'));
        let resp = client
            .get(&url)
            .query(&[("f", "tweets"), ("q", query)])
            .send()
            .await
            .map_err(|e| MirrorError::Transient(format!("request: {e}")))?;

        if let Some(err) = classify_status(resp.status()) {
            return Err(err);
        }
        resp.text()
            .await
            .map_err(|e| MirrorError::Transient(format!("read body: {e}")))
    }
}

#[async_trait]
impl MirrorClient for NitterRssClient {
    async fn search(&self, base_url: &str, query: &str) -> Result<Vec<Post>, MirrorError> {
        let body = match &self.mode {
            Mode::Fixture(s) => s.clone(),
            Mode::Http { client } => Self::fetch_body(client, base_url, query).await?,
        };
        if body.trim().is_empty() {
            return Err(MirrorError::Transient("empty body".into()));
        }
        parse_feed(&body, Utc::now()).map_err(|e| MirrorError::Structural(format!("{e:#}")))
    }

    fn name(&self) -> &'static str {
        "nitter-rss"
    }
}

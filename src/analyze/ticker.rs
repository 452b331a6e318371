// src/analyze/ticker.rs
//! Cashtag extraction: post text → normalized ticker symbols.
//!
//! Rules, applied per whitespace-delimited token:
//! - tokens that look like URLs (`://`, `www.`) or user handles (`@...`) are ignored whole;
//! - a `$` only opens a symbol at a word start (not after a letter, digit, `/`, `@`, `$`, `=`, `&`);
//! - the symbol is the following run of letters/digits, which drops trailing punctuation; a run
//!   with any non-ASCII character is rejected whole rather than truncated;
//! - shape: configurable length (default 2–10), at least one letter, no price-like amounts
//!   (`$100`, `$5k`, `$1.5M`, `$100x`);
//! - excluded symbols (majors, stables, fiat, generic words) are dropped;
//! - the result is a per-post set, so `$FOO $FOO` counts once.

use chrono::{DateTime, Utc};
use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use crate::config::exclusions::load_exclusions;
use crate::config::ExtractSection;
use crate::ingest::types::Post;

static RE_CASHTAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$([\p{L}\p{N}_]+)").expect("cashtag regex"));

static RE_AMOUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+(\.\d+)?[KMBX]?$").expect("amount regex"));

/// One ticker seen in one post.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mention {
    pub ticker: String,
    pub post_id: String,
    pub mentioned_at: DateTime<Utc>,
}

/// Symbols that are never reported. Stored uppercase, without `$`.
#[derive(Debug, Clone, Default)]
pub struct ExclusionSet {
    symbols: HashSet<String>,
}

impl ExclusionSet {
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let symbols = symbols
            .into_iter()
            .map(|s| s.as_ref().trim().trim_start_matches('$').to_ascii_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        Self { symbols }
    }

    /// Explicit file, or `$TRENCH_EXCLUSIONS_PATH` → `config/exclusions.{toml,json}` → seed.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        Ok(Self::new(load_exclusions(explicit)?))
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.contains(&symbol.to_ascii_uppercase())
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Result of extracting a whole fetch batch.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BatchExtraction {
    pub mentions: Vec<Mention>,
    /// Posts dropped as unreadable (empty text or lossy decoding).
    pub skipped: usize,
}

#[derive(Debug)]
pub struct TickerExtractor {
    exclusions: RwLock<Arc<ExclusionSet>>,
    min_len: usize,
    max_len: usize,
}

impl TickerExtractor {
    pub fn new(exclusions: ExclusionSet) -> Self {
        Self {
            exclusions: RwLock::new(Arc::new(exclusions)),
            min_len: 2,
            max_len: 10,
        }
    }

    pub fn with_len_range(mut self, min_len: usize, max_len: usize) -> Self {
        self.min_len = min_len.max(1);
        self.max_len = max_len.max(self.min_len);
        self
    }

    pub fn from_config(cfg: &ExtractSection) -> anyhow::Result<Self> {
        let exclusions = ExclusionSet::load(cfg.exclusions_path.as_deref())?;
        tracing::info!(target: "extract", symbols = exclusions.len(), "exclusion set loaded");
        Ok(Self::new(exclusions).with_len_range(cfg.min_symbol_len, cfg.max_symbol_len))
    }

    /// Swap the exclusion set; in-flight extractions keep the set they started with.
    pub fn replace_exclusions(&self, set: ExclusionSet) {
        let mut guard = self.exclusions.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(set);
    }

    pub fn exclusions(&self) -> Arc<ExclusionSet> {
        Arc::clone(&self.exclusions.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Deduplicated, uppercase symbols mentioned in `post`.
    pub fn extract(&self, post: &Post) -> BTreeSet<String> {
        self.extract_text(&post.text)
    }

    pub fn extract_text(&self, text: &str) -> BTreeSet<String> {
        let exclusions = self.exclusions();
        let mut out = BTreeSet::new();
        for token in text.split_whitespace() {
            if is_link_or_handle(token) {
                continue;
            }
            for caps in RE_CASHTAG.captures_iter(token) {
                let (Some(whole), Some(sym)) = (caps.get(0), caps.get(1)) else {
                    continue;
                };
                if !opens_symbol(token, whole.start()) {
                    continue;
                }
                // `$foo_bar` is a variable or handle, not a cashtag.
                let raw = sym.as_str();
                if raw.contains('_') {
                    continue;
                }
                let symbol = raw.to_ascii_uppercase();
                if !self.valid_shape(&symbol) {
                    continue;
                }
                if exclusions.contains(&symbol) {
                    counter!("extract_excluded_total").increment(1);
                    continue;
                }
                out.insert(symbol);
            }
        }
        out
    }

    /// Extract every post; unreadable posts are counted and skipped, never fatal.
    pub fn extract_batch(&self, posts: &[Post]) -> BatchExtraction {
        let mut out = BatchExtraction::default();
        for post in posts {
            if post.text.trim().is_empty() || post.text.contains('\u{FFFD}') {
                tracing::debug!(target: "extract", post_id = %post.id, "unreadable post skipped");
                out.skipped += 1;
                continue;
            }
            for ticker in self.extract(post) {
                out.mentions.push(Mention {
                    ticker,
                    post_id: post.id.clone(),
                    mentioned_at: post.created_at,
                });
            }
        }
        counter!("extract_mentions_total").increment(out.mentions.len() as u64);
        counter!("extract_skipped_total").increment(out.skipped as u64);
        out
    }

    fn valid_shape(&self, symbol: &str) -> bool {
        let len = symbol.len();
        len >= self.min_len
            && len <= self.max_len
            && symbol.chars().all(|c| c.is_ascii_alphanumeric())
            && symbol.chars().any(|c| c.is_ascii_alphabetic())
            && !RE_AMOUNT.is_match(symbol)
    }
}

fn is_link_or_handle(token: &str) -> bool {
    let t = token.trim_start_matches(|c: char| matches!(c, '(' | '[' | '"' | '\''));
    t.starts_with('@') || t.contains("://") || t.to_ascii_lowercase().starts_with("www.")
}

fn opens_symbol(token: &str, dollar_at: usize) -> bool {
    match token[..dollar_at].chars().next_back() {
        None => true,
        Some(c) => !(c.is_alphanumeric() || matches!(c, '/' | '@' | '$' | '=' | '&' | '_')),
    }
}

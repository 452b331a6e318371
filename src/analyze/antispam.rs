// src/analyze/antispam.rs
//! Near-duplicate suppression for copy-pasted shill posts.
//!
//! A post is blocked when a remembered post from the last `time_window_secs` has a
//! normalized Levenshtein similarity (`strsim`) at or above `similarity_threshold`.
//! Accepted posts are remembered, up to `memory` entries (oldest evicted first).
//! A threshold of `1.0` or more disables the filter.

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use std::collections::VecDeque;

use crate::config::ExtractSection;
use crate::ingest::types::Post;

#[derive(Clone, Debug)]
pub struct AntiSpamParams {
    pub memory: usize,
    pub similarity_threshold: f64,
    pub time_window_secs: u64,
}

impl Default for AntiSpamParams {
    fn default() -> Self {
        Self {
            memory: 512,
            similarity_threshold: 0.92,
            time_window_secs: 30 * 60,
        }
    }
}

impl AntiSpamParams {
    pub fn from_config(cfg: &ExtractSection) -> Self {
        Self {
            memory: cfg.spam_memory,
            similarity_threshold: f64::from(cfg.spam_similarity),
            time_window_secs: cfg.spam_window_secs,
        }
    }
}

#[derive(Clone, Debug)]
struct Seen {
    at: DateTime<Utc>,
    text: String,
}

#[derive(Debug)]
pub struct AntiSpam {
    params: AntiSpamParams,
    window: VecDeque<Seen>,
}

impl AntiSpam {
    pub fn new(mut params: AntiSpamParams) -> Self {
        params.memory = params.memory.max(1);
        params.time_window_secs = params.time_window_secs.max(1);
        if params.similarity_threshold.is_nan() {
            params.similarity_threshold = 1.0;
        }
        let cap = params.memory;
        Self {
            params,
            window: VecDeque::with_capacity(cap.min(1024)),
        }
    }

    pub fn enabled(&self) -> bool {
        self.params.similarity_threshold < 1.0
    }

    pub fn params(&self) -> &AntiSpamParams {
        &self.params
    }

    /// `true` if `text` observed at `at` is a near-duplicate of something recent.
    pub fn should_block(&mut self, at: DateTime<Utc>, text: &str) -> bool {
        if !self.enabled() {
            return false;
        }
        let norm = normalize(text);
        if norm.is_empty() {
            return false;
        }
        self.evict_old(at);

        let threshold = self.params.similarity_threshold;
        let horizon = self.horizon();
        if self.window.iter().rev().any(|s| {
            (at - s.at).abs() <= horizon
                && strsim::normalized_levenshtein(&norm, &s.text) >= threshold
        }) {
            return true;
        }

        if self.window.len() >= self.params.memory {
            self.window.pop_front();
        }
        self.window.push_back(Seen { at, text: norm });
        false
    }

    /// Keep posts that are not near-duplicates, oldest first. Returns (kept, blocked count).
    pub fn retain_posts(&mut self, mut posts: Vec<Post>) -> (Vec<Post>, usize) {
        posts.sort_by_key(|p| p.created_at);
        let mut kept = Vec::with_capacity(posts.len());
        let mut blocked = 0usize;
        for p in posts {
            if self.should_block(p.created_at, &p.text) {
                tracing::debug!(target: "extract", post_id = %p.id, author = %p.author, "near-duplicate post dropped");
                blocked += 1;
            } else {
                kept.push(p);
            }
        }
        counter!("extract_spam_blocked_total").increment(blocked as u64);
        (kept, blocked)
    }

    fn horizon(&self) -> Duration {
        let secs = i64::try_from(self.params.time_window_secs).unwrap_or(i64::MAX / 1000);
        Duration::seconds(secs.min(i64::MAX / 1000))
    }

    /// Entries are not time-ordered across batches, so the whole window is scanned.
    fn evict_old(&mut self, now: DateTime<Utc>) {
        let horizon = self.horizon();
        self.window
            .retain(|s| now.signed_duration_since(s.at) <= horizon);
    }
}

fn normalize(s: &str) -> String {
    s.split_whitespace()
        .filter(|w| !w.contains("://"))
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(min: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap() + Duration::minutes(min)
    }

    #[test]
    fn blocks_near_duplicates_within_window() {
        let mut a = AntiSpam::new(AntiSpamParams::default());
        assert!(!a.should_block(t(0), "$FROG is the next 100x gem, CA in bio"));
        assert!(a.should_block(t(1), "$FROG is the next 100x gem,  CA in bio!"));
        assert!(!a.should_block(t(2), "just bought some $FROG after the dip"));
    }

    #[test]
    fn forgets_after_time_window() {
        let mut a = AntiSpam::new(AntiSpamParams {
            time_window_secs: 600,
            ..Default::default()
        });
        assert!(!a.should_block(t(0), "$FROG sending"));
        assert!(!a.should_block(t(11), "$FROG sending"));
    }

    #[test]
    fn ignores_differing_links() {
        let mut a = AntiSpam::new(AntiSpamParams::default());
        assert!(!a.should_block(t(0), "ape $CAT now https://t.co/aaaa"));
        assert!(a.should_block(t(0), "ape $CAT now https://t.co/zzzzzzzz"));
    }

    #[test]
    fn threshold_one_disables() {
        let mut a = AntiSpam::new(AntiSpamParams {
            similarity_threshold: 1.0,
            ..Default::default()
        });
        assert!(!a.should_block(t(0), "same"));
        assert!(!a.should_block(t(0), "same"));
    }

    #[test]
    fn memory_is_bounded() {
        let mut a = AntiSpam::new(AntiSpamParams {
            memory: 1,
            ..Default::default()
        });
        assert!(!a.should_block(t(0), "first distinct shill text"));
        assert!(!a.should_block(t(0), "a completely other sentence"));
        // "first" was evicted by the capacity bound.
        assert!(!a.should_block(t(0), "first distinct shill text"));
    }

    #[test]
    fn out_of_order_posts_use_their_own_timestamps() {
        let mut a = AntiSpam::new(AntiSpamParams {
            time_window_secs: 600,
            ..Default::default()
        });
        assert!(!a.should_block(t(20), "$TOAD second wave shill text"));
        // Twenty minutes older than the remembered copy: outside the window.
        assert!(!a.should_block(t(0), "$TOAD second wave shill text"));
        assert!(!a.should_block(t(1), "$FROG first wave shill text"));
        // t(1) is stale at t(25) even though a newer entry sits in front of it.
        assert!(!a.should_block(t(25), "$FROG first wave shill text"));
        assert!(a.should_block(t(25), "$TOAD second wave shill text!"));
    }

    #[test]
    fn batch_is_filtered_in_time_order() {
        let post = |id: &str, min: i64, text: &str| Post {
            id: id.into(),
            author: "bot".into(),
            text: text.into(),
            url: None,
            created_at: t(min),
            fetched_at: t(60),
        };
        let mut a = AntiSpam::new(AntiSpamParams::default());
        let (kept, blocked) = a.retain_posts(vec![
            post("late", 10, "$FROG is the next 100x gem"),
            post("early", 0, "$FROG is the next 100x gem"),
        ]);
        assert_eq!(blocked, 1);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "early");
    }
}

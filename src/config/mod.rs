// src/config/mod.rs
//! Immutable configuration snapshot for one process lifetime.
//!
//! Lookup order:
//! 1) `$TRENCH_SCAN_CONFIG`
//! 2) `config/trench_scan.toml`
//! 3) built-in defaults
//!
//! Every field has a serde default, so a config file only needs the keys it changes.
//! Defaults: 5 min scrape interval, min 3 mentions, velocity threshold 5,
//! 1h current window against a 24h lookback.

pub mod exclusions;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_CONFIG_PATH: &str = "TRENCH_SCAN_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/trench_scan.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub scan: ScanSection,
    pub sources: SourcesSection,
    pub fetch: FetchSection,
    pub extract: ExtractSection,
    pub trending: TrendingSection,
    pub alerts: AlertsSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSection {
    pub interval_secs: u64,
    /// Search queries issued every cycle.
    pub queries: Vec<String>,
    /// How far back the very first cycle looks.
    pub initial_lookback_secs: u64,
    /// Upper bound of simultaneous in-flight query fetches.
    pub max_parallel_fetches: usize,
}

impl Default for ScanSection {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            queries: vec![
                "$".into(),
                "memecoin".into(),
                "100x gem".into(),
                "solana memecoin".into(),
                "base memecoin".into(),
                "pump.fun".into(),
                "new ca".into(),
            ],
            initial_lookback_secs: 3600,
            max_parallel_fetches: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesSection {
    /// Mirror base URLs, e.g. `https://nitter.net`.
    pub endpoints: Vec<String>,
    /// Consecutive soft failures before healthy → degraded.
    pub degrade_after: u32,
    /// Seconds a banned endpoint waits before it is readmitted as degraded.
    pub ban_cooldown_secs: u64,
}

impl Default for SourcesSection {
    fn default() -> Self {
        Self {
            endpoints: vec![
                "https://nitter.net".into(),
                "https://nitter.poast.org".into(),
                "https://nitter.privacydev.net".into(),
            ],
            degrade_after: 3,
            ban_cooldown_secs: 900,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSection {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Jitter as a fraction of the computed delay, clamped to `0.0..=0.5`.
    pub jitter: f64,
    pub timeout_secs: u64,
    /// Global limiter: one token every `rate_interval_ms`, bucket holds `rate_burst` tokens.
    pub rate_interval_ms: u64,
    pub rate_burst: u32,
    pub max_posts_per_query: usize,
    pub user_agent: String,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            jitter: 0.2,
            timeout_secs: 15,
            rate_interval_ms: 2_000,
            rate_burst: 1,
            max_posts_per_query: 100,
            user_agent: concat!("trench-scan/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractSection {
    pub min_symbol_len: usize,
    pub max_symbol_len: usize,
    /// Optional explicit exclusion file; otherwise the default lookup applies.
    pub exclusions_path: Option<PathBuf>,
    /// Near-duplicate threshold in `[0.0, 1.0]`; `>= 1.0` disables spam suppression.
    pub spam_similarity: f32,
    pub spam_window_secs: u64,
    pub spam_memory: usize,
}

impl Default for ExtractSection {
    fn default() -> Self {
        Self {
            min_symbol_len: 2,
            max_symbol_len: 10,
            exclusions_path: None,
            spam_similarity: 0.92,
            spam_window_secs: 30 * 60,
            spam_memory: 512,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendingSection {
    /// Bucket length; the default matches the scan interval so the current window slides
    /// one bucket per cycle.
    pub bucket_secs: u64,
    /// Buckets forming the "current" window (most recent, including the open bucket).
    pub current_buckets: usize,
    /// Buckets before the current window forming the baseline.
    pub baseline_buckets: usize,
    /// Lower bound for the baseline mean in the velocity denominator.
    pub baseline_floor: f64,
    pub min_mentions: u32,
    pub velocity_threshold: f64,
    pub new_discovery_window_secs: u64,
}

impl Default for TrendingSection {
    fn default() -> Self {
        Self {
            bucket_secs: 300,
            current_buckets: 12,
            baseline_buckets: 276,
            baseline_floor: 0.1,
            min_mentions: 3,
            velocity_threshold: 5.0,
            new_discovery_window_secs: 24 * 3600,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsSection {
    /// Minimum seconds between two deliveries for the same ticker; 0 disables the gate.
    pub cooldown_secs: i64,
}

impl ScanConfig {
    /// Load and validate from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let cfg: ScanConfig = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Env var → `config/trench_scan.toml` → defaults.
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            return Self::load_from(&pb);
        }
        let default_p = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default_p.exists() {
            return Self::load_from(&default_p);
        }
        let cfg = Self::default();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sources.endpoints.iter().all(|e| e.trim().is_empty()) {
            return Err(anyhow!("sources.endpoints must list at least one mirror"));
        }
        if self.scan.queries.iter().all(|q| q.trim().is_empty()) {
            return Err(anyhow!("scan.queries must not be empty"));
        }
        if self.scan.interval_secs == 0 {
            return Err(anyhow!("scan.interval_secs must be > 0"));
        }
        if self.fetch.max_attempts == 0 {
            return Err(anyhow!("fetch.max_attempts must be > 0"));
        }
        if self.fetch.base_delay_ms > self.fetch.max_delay_ms {
            return Err(anyhow!("fetch.base_delay_ms exceeds fetch.max_delay_ms"));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(anyhow!("fetch.timeout_secs must be > 0"));
        }
        if self.extract.min_symbol_len == 0
            || self.extract.min_symbol_len > self.extract.max_symbol_len
        {
            return Err(anyhow!("extract symbol length range is invalid"));
        }
        let t = &self.trending;
        if t.bucket_secs == 0 || t.current_buckets == 0 || t.baseline_buckets == 0 {
            return Err(anyhow!("trending bucket/window sizes must be > 0"));
        }
        if t.baseline_floor.is_nan() || t.baseline_floor <= 0.0 {
            return Err(anyhow!("trending.baseline_floor must be > 0"));
        }
        Ok(())
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan.interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        ScanConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let cfg: ScanConfig = toml::from_str(
            r#"
[trending]
min_mentions = 5

[sources]
endpoints = ["https://mirror.example"]
"#,
        )
        .unwrap();
        assert_eq!(cfg.trending.min_mentions, 5);
        assert_eq!(cfg.trending.velocity_threshold, 5.0);
        assert_eq!(cfg.sources.endpoints, vec!["https://mirror.example".to_string()]);
        assert_eq!(cfg.sources.degrade_after, 3);
        assert_eq!(cfg.scan.interval_secs, 300);
    }

    #[test]
    fn rejects_empty_endpoints_and_inverted_ranges() {
        let mut cfg = ScanConfig::default();
        cfg.sources.endpoints = vec![" ".into()];
        assert!(cfg.validate().is_err());

        let mut cfg = ScanConfig::default();
        cfg.extract.min_symbol_len = 11;
        assert!(cfg.validate().is_err());

        let mut cfg = ScanConfig::default();
        cfg.trending.baseline_floor = 0.0;
        assert!(cfg.validate().is_err());
    }
}

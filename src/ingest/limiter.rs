// src/ingest/limiter.rs
//! Throttling primitives shared by every fetch attempt.
//!
//! - [`RateLimiter`]: one global token bucket. Every attempt takes a token, successful or
//!   not, so aggregate volume across all mirrors stays below the ban threshold.
//! - [`Backoff`]: exponential delay between retries (base doubling, capped, plus jitter).
//!
//! Both use `tokio::time`, so tests can run them on a paused clock.

use rand::Rng;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket: `burst` capacity, one token added every `interval`.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    interval: Duration,
    burst: f64,
}

impl RateLimiter {
    pub fn new(interval: Duration, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
            interval,
            burst,
        }
    }

    pub fn from_config(cfg: &crate::config::FetchSection) -> Self {
        Self::new(Duration::from_millis(cfg.rate_interval_ms), cfg.rate_burst)
    }

    /// Wait until a token is available and take it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut b = self.bucket.lock().await;
                self.refill(&mut b);
                if b.tokens >= 1.0 {
                    b.tokens -= 1.0;
                    return;
                }
                let missing = 1.0 - b.tokens;
                self.interval.mul_f64(missing)
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Take a token only if one is available right now.
    pub async fn try_acquire(&self) -> bool {
        let mut b = self.bucket.lock().await;
        self.refill(&mut b);
        if b.tokens >= 1.0 {
            b.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn refill(&self, b: &mut Bucket) {
        let now = Instant::now();
        if self.interval.is_zero() {
            b.tokens = self.burst;
            b.last_refill = now;
            return;
        }
        let elapsed = now.saturating_duration_since(b.last_refill);
        let gained = elapsed.as_secs_f64() / self.interval.as_secs_f64();
        if gained > 0.0 {
            b.tokens = (b.tokens + gained).min(self.burst);
            b.last_refill = now;
        }
    }
}

/// Retry delay schedule. `delay(0)` is the pause before the first retry.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: f64,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: f64) -> Self {
        Self {
            base,
            max: max.max(base),
            jitter: jitter.clamp(0.0, 0.5),
        }
    }

    pub fn from_config(cfg: &crate::config::FetchSection) -> Self {
        Self::new(
            Duration::from_millis(cfg.base_delay_ms),
            Duration::from_millis(cfg.max_delay_ms),
            cfg.jitter,
        )
    }

    /// Capped `base * 2^retry`, without jitter.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(retry.min(16));
        self.base.saturating_mul(multiplier).min(self.max)
    }

    /// `base_delay(retry)` plus up to `jitter * base_delay(retry)` random extra.
    pub fn delay(&self, retry: u32) -> Duration {
        let d = self.base_delay(retry);
        if self.jitter <= 0.0 || d.is_zero() {
            return d;
        }
        let span_ms = (d.as_millis() as f64 * self.jitter) as u64;
        if span_ms == 0 {
            return d;
        }
        let extra = rand::rng().random_range(0..=span_ms);
        d + Duration::from_millis(extra)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(8), 0.2)
    }
}

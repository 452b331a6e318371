// src/ingest/fetcher.rs
//! One query fetch through the mirror pool.
//!
//! The retry path is an explicit attempt loop. Each attempt:
//! 1) takes a token from the global rate limiter,
//! 2) picks an endpoint (untried first, then least recently used),
//! 3) runs the mirror search under a hard timeout,
//! 4) reports the outcome back to the pool.
//!
//! Between attempts the loop sleeps `Backoff::delay(retry)`.

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::Duration;

use crate::config::FetchSection;
use crate::error::ScanError;
use crate::ingest::limiter::{Backoff, RateLimiter};
use crate::ingest::pool::{EndpointHandle, Outcome, SourcePool};
use crate::ingest::types::{MirrorClient, MirrorError, Post};

/// Result of a single attempt against one endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Success(Vec<Post>),
    SoftFailure(String),
    HardFailure(String),
}

impl AttemptOutcome {
    fn as_pool_outcome(&self) -> Outcome {
        match self {
            AttemptOutcome::Success(_) => Outcome::Success,
            AttemptOutcome::SoftFailure(_) => Outcome::SoftFailure,
            AttemptOutcome::HardFailure(_) => Outcome::HardFailure,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            AttemptOutcome::Success(_) => "success",
            AttemptOutcome::SoftFailure(_) => "soft_failure",
            AttemptOutcome::HardFailure(_) => "hard_failure",
        }
    }
}

/// Result of a whole fetch (all attempts).
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Success {
        posts: Vec<Post>,
        endpoint: String,
        attempts: u32,
    },
    Exhausted {
        attempts: u32,
        last_error: String,
    },
    NoHealthyEndpoint,
}

impl FetchOutcome {
    pub fn into_result(self) -> Result<Vec<Post>, ScanError> {
        match self {
            FetchOutcome::Success { posts, .. } => Ok(posts),
            FetchOutcome::Exhausted {
                attempts,
                last_error,
            } => Err(ScanError::FetchExhausted {
                attempts,
                last_error,
            }),
            FetchOutcome::NoHealthyEndpoint => Err(ScanError::NoHealthyEndpoint),
        }
    }
}

#[derive(Clone)]
pub struct Fetcher {
    pool: Arc<SourcePool>,
    client: Arc<dyn MirrorClient>,
    limiter: Arc<RateLimiter>,
    backoff: Backoff,
    max_attempts: u32,
    timeout: Duration,
    max_posts: usize,
}

impl Fetcher {
    pub fn new(
        pool: Arc<SourcePool>,
        client: Arc<dyn MirrorClient>,
        limiter: Arc<RateLimiter>,
        backoff: Backoff,
    ) -> Self {
        Self {
            pool,
            client,
            limiter,
            backoff,
            max_attempts: 3,
            timeout: Duration::from_secs(15),
            max_posts: 100,
        }
    }

    pub fn from_config(
        cfg: &FetchSection,
        pool: Arc<SourcePool>,
        client: Arc<dyn MirrorClient>,
    ) -> Self {
        Self::new(
            pool,
            client,
            Arc::new(RateLimiter::from_config(cfg)),
            Backoff::from_config(cfg),
        )
        .with_max_attempts(cfg.max_attempts)
        .with_timeout(Duration::from_secs(cfg.timeout_secs))
        .with_max_posts(cfg.max_posts_per_query)
    }

    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_posts(mut self, n: usize) -> Self {
        self.max_posts = n.max(1);
        self
    }

    pub fn pool(&self) -> &Arc<SourcePool> {
        &self.pool
    }

    /// Fetch posts for `query` created at or after `since`.
    pub async fn fetch(&self, query: &str, since: DateTime<Utc>) -> Result<Vec<Post>, ScanError> {
        self.fetch_outcome(query, since).await.into_result()
    }

    pub async fn fetch_outcome(&self, query: &str, since: DateTime<Utc>) -> FetchOutcome {
        let mut tried: Vec<usize> = Vec::new();
        let mut attempts = 0u32;
        let mut last_error = String::from("no attempt made");

        for retry in 0..self.max_attempts {
            if retry > 0 {
                tokio::time::sleep(self.backoff.delay(retry - 1)).await;
            }

            if attempts == 0 && !self.pool.has_available_at(Utc::now()) {
                return self.no_healthy_endpoint(query);
            }

            // Pick after the wait; `last_used_at` has to match the request time.
            self.limiter.acquire().await;
            let Some(handle) = self.pick(&tried) else {
                if attempts == 0 {
                    return self.no_healthy_endpoint(query);
                }
                last_error = format!("{last_error}; no endpoint left to retry");
                break;
            };
            if !tried.contains(&handle.index) {
                tried.push(handle.index);
            }
            attempts += 1;

            let outcome = self.attempt(&handle, query).await;
            self.pool.report(&handle, outcome.as_pool_outcome());
            counter!("fetch_attempts_total", "outcome" => outcome.label()).increment(1);

            match outcome {
                AttemptOutcome::Success(posts) => {
                    let total = posts.len();
                    let mut posts: Vec<Post> =
                        posts.into_iter().filter(|p| p.created_at >= since).collect();
                    posts.truncate(self.max_posts);
                    tracing::debug!(
                        target: "fetch",
                        %query,
                        endpoint = %handle.url,
                        attempts,
                        total,
                        kept = posts.len(),
                        "fetch ok"
                    );
                    counter!("fetch_posts_total").increment(posts.len() as u64);
                    return FetchOutcome::Success {
                        posts,
                        endpoint: handle.url,
                        attempts,
                    };
                }
                AttemptOutcome::SoftFailure(msg) | AttemptOutcome::HardFailure(msg) => {
                    tracing::warn!(
                        target: "fetch",
                        %query,
                        endpoint = %handle.url,
                        attempt = attempts,
                        error = %msg,
                        "fetch attempt failed"
                    );
                    last_error = msg;
                }
            }
        }

        counter!("fetch_exhausted_total").increment(1);
        FetchOutcome::Exhausted {
            attempts,
            last_error,
        }
    }

    /// One request against one endpoint, bounded by the configured timeout.
    pub async fn attempt(&self, handle: &EndpointHandle, query: &str) -> AttemptOutcome {
        let t0 = std::time::Instant::now();
        let res = tokio::time::timeout(self.timeout, self.client.search(&handle.url, query)).await;
        histogram!("fetch_duration_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

        match res {
            Err(_) => AttemptOutcome::SoftFailure(format!("timed out after {:?}", self.timeout)),
            Ok(Ok(posts)) => AttemptOutcome::Success(posts),
            Ok(Err(MirrorError::Transient(m))) => AttemptOutcome::SoftFailure(m),
            Ok(Err(MirrorError::Structural(m))) => AttemptOutcome::HardFailure(m),
        }
    }

    fn no_healthy_endpoint(&self, query: &str) -> FetchOutcome {
        tracing::warn!(target: "fetch", %query, "no healthy endpoint");
        counter!("fetch_no_endpoint_total").increment(1);
        FetchOutcome::NoHealthyEndpoint
    }

    /// Untried endpoints first; once every live mirror was tried, rotate by LRU.
    fn pick(&self, tried: &[usize]) -> Option<EndpointHandle> {
        let now = Utc::now();
        self.pool
            .acquire_excluding_at(now, tried)
            .or_else(|_| self.pool.acquire_at(now))
            .ok()
    }
}

// src/ingest/pool.rs
//! Mirror pool: health table + rotation order.
//!
//! Selection: healthy before degraded, banned never, then least recently acquired.
//! Banned mirrors come back as degraded once `ban_cooldown` has elapsed since the ban;
//! nothing is ever removed from the pool.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::{counter, gauge};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::ScanError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Healthy,
    Degraded,
    Banned,
}

impl Health {
    fn rank(self) -> u8 {
        match self {
            Health::Healthy => 0,
            Health::Degraded => 1,
            Health::Banned => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Health::Healthy => "healthy",
            Health::Degraded => "degraded",
            Health::Banned => "banned",
        }
    }
}

/// Result of one attempt, as reported back to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    SoftFailure,
    HardFailure,
}

#[derive(Debug, Clone, Serialize)]
pub struct Endpoint {
    pub url: String,
    pub health: Health,
    pub consecutive_failures: u32,
    pub last_used_at: Option<DateTime<Utc>>,
    pub banned_at: Option<DateTime<Utc>>,
    pub successes: u64,
    pub failures: u64,
    #[serde(skip)]
    use_seq: u64,
}

impl Endpoint {
    fn new(url: String) -> Self {
        Self {
            url,
            health: Health::Healthy,
            consecutive_failures: 0,
            last_used_at: None,
            banned_at: None,
            successes: 0,
            failures: 0,
            use_seq: 0,
        }
    }
}

/// What `acquire` hands out: enough to issue a request and report back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointHandle {
    pub index: usize,
    pub url: String,
}

#[derive(Debug, Clone, Copy)]
pub struct PoolPolicy {
    pub degrade_after: u32,
    pub ban_cooldown: ChronoDuration,
}

impl Default for PoolPolicy {
    fn default() -> Self {
        Self {
            degrade_after: 3,
            ban_cooldown: ChronoDuration::seconds(900),
        }
    }
}

#[derive(Debug)]
struct Inner {
    endpoints: Vec<Endpoint>,
    seq: u64,
}

#[derive(Debug)]
pub struct SourcePool {
    inner: Mutex<Inner>,
    policy: PoolPolicy,
}

impl SourcePool {
    pub fn new<I, S>(urls: I, policy: PoolPolicy) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let endpoints = urls
            .into_iter()
            .map(Into::into)
            .map(|u: String| u.trim().trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .map(Endpoint::new)
            .collect::<Vec<_>>();
        let pool = Self {
            inner: Mutex::new(Inner { endpoints, seq: 0 }),
            policy,
        };
        publish_gauges(&pool.lock().endpoints);
        pool
    }

    pub fn from_config(cfg: &crate::config::SourcesSection) -> Self {
        let secs = i64::try_from(cfg.ban_cooldown_secs)
            .unwrap_or(i64::MAX)
            .min(i64::MAX / 1000);
        Self::new(
            cfg.endpoints.iter().cloned(),
            PoolPolicy {
                degrade_after: cfg.degrade_after.max(1),
                ban_cooldown: ChronoDuration::seconds(secs),
            },
        )
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn acquire(&self) -> Result<EndpointHandle, ScanError> {
        self.acquire_excluding_at(Utc::now(), &[])
    }

    pub fn acquire_at(&self, now: DateTime<Utc>) -> Result<EndpointHandle, ScanError> {
        self.acquire_excluding_at(now, &[])
    }

    /// Like [`acquire_at`](Self::acquire_at) but skips pool indexes listed in `tried`.
    pub fn acquire_excluding_at(
        &self,
        now: DateTime<Utc>,
        tried: &[usize],
    ) -> Result<EndpointHandle, ScanError> {
        let mut inner = self.lock();
        self.readmit_banned(&mut inner.endpoints, now);

        let picked = inner
            .endpoints
            .iter()
            .enumerate()
            .filter(|(i, ep)| ep.health != Health::Banned && !tried.contains(i))
            .min_by_key(|(i, ep)| (ep.health.rank(), ep.use_seq, *i))
            .map(|(i, _)| i);

        let Some(index) = picked else {
            return Err(ScanError::NoHealthyEndpoint);
        };

        inner.seq += 1;
        let seq = inner.seq;
        let ep = &mut inner.endpoints[index];
        ep.use_seq = seq;
        ep.last_used_at = Some(now);

        Ok(EndpointHandle {
            index,
            url: ep.url.clone(),
        })
    }

    pub fn report(&self, handle: &EndpointHandle, outcome: Outcome) {
        self.report_at(handle, outcome, Utc::now());
    }

    pub fn report_at(&self, handle: &EndpointHandle, outcome: Outcome, now: DateTime<Utc>) {
        let mut inner = self.lock();
        let degrade_after = self.policy.degrade_after;
        let Some(ep) = inner.endpoints.get_mut(handle.index) else {
            tracing::warn!(target: "pool", index = handle.index, "report for unknown endpoint");
            return;
        };
        let before = ep.health;

        match outcome {
            Outcome::Success => {
                ep.successes += 1;
                ep.consecutive_failures = 0;
                ep.health = Health::Healthy;
                ep.banned_at = None;
            }
            Outcome::SoftFailure => {
                ep.failures += 1;
                ep.consecutive_failures = ep.consecutive_failures.saturating_add(1);
                if ep.health == Health::Healthy && ep.consecutive_failures >= degrade_after {
                    ep.health = Health::Degraded;
                }
            }
            Outcome::HardFailure => {
                ep.failures += 1;
                ep.consecutive_failures = ep.consecutive_failures.saturating_add(1);
                ep.health = Health::Banned;
                ep.banned_at = Some(now);
            }
        }

        if before != ep.health {
            tracing::info!(
                target: "pool",
                url = %ep.url,
                from = before.as_str(),
                to = ep.health.as_str(),
                consecutive_failures = ep.consecutive_failures,
                "endpoint health changed"
            );
            counter!("pool_transitions_total", "to" => ep.health.as_str()).increment(1);
        }
        publish_gauges(&inner.endpoints);
    }

    /// True when at least one endpoint could be acquired at `now`.
    pub fn has_available_at(&self, now: DateTime<Utc>) -> bool {
        let mut inner = self.lock();
        self.readmit_banned(&mut inner.endpoints, now);
        inner.endpoints.iter().any(|e| e.health != Health::Banned)
    }

    pub fn snapshot(&self) -> Vec<Endpoint> {
        self.lock().endpoints.clone()
    }

    fn readmit_banned(&self, endpoints: &mut [Endpoint], now: DateTime<Utc>) {
        let mut changed = false;
        for ep in endpoints.iter_mut() {
            if ep.health != Health::Banned {
                continue;
            }
            let due = ep
                .banned_at
                .map(|at| now.signed_duration_since(at) >= self.policy.ban_cooldown)
                .unwrap_or(true);
            if due {
                ep.health = Health::Degraded;
                ep.banned_at = None;
                changed = true;
                tracing::info!(target: "pool", url = %ep.url, "cool-down elapsed, re-probing as degraded");
            }
        }
        if changed {
            publish_gauges(endpoints);
        }
    }
}

fn publish_gauges(endpoints: &[Endpoint]) {
    for h in [Health::Healthy, Health::Degraded, Health::Banned] {
        let n = endpoints.iter().filter(|e| e.health == h).count();
        gauge!("pool_endpoints", "state" => h.as_str()).set(n as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn pool(n: usize) -> SourcePool {
        SourcePool::new(
            (0..n).map(|i| format!("https://m{i}.example/")),
            PoolPolicy {
                degrade_after: 2,
                ban_cooldown: ChronoDuration::seconds(60),
            },
        )
    }

    #[test]
    fn rotates_least_recently_used() {
        let p = pool(3);
        let a = p.acquire_at(t0()).unwrap();
        let b = p.acquire_at(t0()).unwrap();
        let c = p.acquire_at(t0()).unwrap();
        let d = p.acquire_at(t0()).unwrap();
        assert_eq!(
            vec![a.index, b.index, c.index, d.index],
            vec![0, 1, 2, 0]
        );
        assert_eq!(a.url, "https://m0.example");
    }

    #[test]
    fn prefers_healthy_over_degraded() {
        let p = pool(2);
        let a = p.acquire_at(t0()).unwrap();
        p.report_at(&a, Outcome::SoftFailure, t0());
        p.report_at(&a, Outcome::SoftFailure, t0());
        assert_eq!(p.snapshot()[0].health, Health::Degraded);
        // m0 is degraded, so m1 wins even though m0 was used earlier.
        for _ in 0..3 {
            assert_eq!(p.acquire_at(t0()).unwrap().index, 1);
        }
    }

    #[test]
    fn soft_failures_below_threshold_keep_healthy() {
        let p = pool(1);
        let a = p.acquire_at(t0()).unwrap();
        p.report_at(&a, Outcome::SoftFailure, t0());
        let snap = p.snapshot();
        assert_eq!(snap[0].health, Health::Healthy);
        assert_eq!(snap[0].consecutive_failures, 1);
    }

    #[test]
    fn success_restores_degraded() {
        let p = pool(1);
        let a = p.acquire_at(t0()).unwrap();
        p.report_at(&a, Outcome::SoftFailure, t0());
        p.report_at(&a, Outcome::SoftFailure, t0());
        p.report_at(&a, Outcome::Success, t0());
        let snap = p.snapshot();
        assert_eq!(snap[0].health, Health::Healthy);
        assert_eq!(snap[0].consecutive_failures, 0);
    }

    #[test]
    fn all_banned_is_an_error_until_cooldown() {
        let p = pool(1);
        let a = p.acquire_at(t0()).unwrap();
        p.report_at(&a, Outcome::HardFailure, t0());
        assert!(matches!(
            p.acquire_at(t0() + ChronoDuration::seconds(59)),
            Err(ScanError::NoHealthyEndpoint)
        ));
        let back = p.acquire_at(t0() + ChronoDuration::seconds(60)).unwrap();
        assert_eq!(back.index, 0);
        assert_eq!(p.snapshot()[0].health, Health::Degraded);
    }

    #[test]
    fn exclusion_list_is_honoured() {
        let p = pool(2);
        let h = p.acquire_excluding_at(t0(), &[0]).unwrap();
        assert_eq!(h.index, 1);
        assert!(p.acquire_excluding_at(t0(), &[0, 1]).is_err());
    }
}

// tests/trending_velocity.rs
//
// Velocity scoring, trending qualification and edge-triggered alerts.

use chrono::{DateTime, Duration, TimeZone, Utc};
use trench_scan::analyze::Mention;
use trench_scan::config::TrendingSection;
use trench_scan::{TickerStatus, TrendingEngine};

fn hour(h: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 2, 0, 0, 0).unwrap() + Duration::hours(h)
}

/// Hourly buckets: one current hour against a 23h baseline.
fn section(min_mentions: u32) -> TrendingSection {
    TrendingSection {
        bucket_secs: 3600,
        current_buckets: 1,
        baseline_buckets: 23,
        baseline_floor: 1.0,
        min_mentions,
        ..TrendingSection::default()
    }
}

fn mentions(ticker: &str, tag: &str, n: usize, at: DateTime<Utc>) -> Vec<Mention> {
    (0..n)
        .map(|i| Mention {
            ticker: ticker.to_string(),
            post_id: format!("{tag}-{i}"),
            mentioned_at: at + Duration::seconds(i as i64),
        })
        .collect()
}

/// 2 mentions per hour over the 23h baseline, `current` in hour 23.
fn engine_with(current: usize, min_mentions: u32) -> TrendingEngine {
    let mut e = TrendingEngine::from_config(&section(min_mentions));
    for h in 0..23 {
        e.ingest(&mentions("FOO", &format!("h{h}"), 2, hour(h)));
    }
    e.ingest(&mentions("FOO", "now", current, hour(23)));
    e
}

#[test]
fn baseline_two_current_twelve_is_six_and_trending() {
    let mut e = engine_with(12, 5);
    let out = e.evaluate(hour(23) + Duration::minutes(45));
    let foo = out.ranking.iter().find(|s| s.ticker == "FOO").unwrap();
    assert!((foo.velocity_score - 6.0).abs() < 1e-9, "got {}", foo.velocity_score);
    assert_eq!(foo.status, TickerStatus::Trending);
    assert_eq!(out.alerts.len(), 1);
    assert_eq!(out.alerts[0].mention_count, 12);
    assert_eq!(out.alerts[0].triggered_at, hour(23) + Duration::minutes(45));
}

#[test]
fn one_mention_ever_never_trends() {
    let mut e = TrendingEngine::from_config(&TrendingSection {
        baseline_floor: 0.1,
        ..section(3)
    });
    e.ingest(&mentions("LONE", "x", 1, hour(4)));
    for step in 0..6 {
        let out = e.evaluate(hour(4) + Duration::minutes(10 * step));
        assert!(out.alerts.is_empty());
        // Huge ratio (1 / 0.1), still below the absolute floor.
        assert!(out.ranking[0].velocity_score >= 5.0);
        assert_eq!(out.ranking[0].status, TickerStatus::Tracked);
    }
}

#[test]
fn exactly_one_alert_over_three_hot_cycles() {
    let mut e = engine_with(12, 5);
    let mut alerts = 0;
    for cycle in 1..=3 {
        let now = hour(23) + Duration::minutes(10 * cycle);
        // Same mentions replayed every cycle, as an overlapping fetch would.
        e.ingest(&mentions("FOO", "now", 12, hour(23)));
        alerts += e.evaluate(now).alerts.len();
    }
    assert_eq!(alerts, 1);
}

#[test]
fn replaying_a_batch_does_not_double_count() {
    let mut e = engine_with(12, 5);
    let before = e.rank(hour(23) + Duration::minutes(30));
    assert_eq!(e.ingest(&mentions("FOO", "now", 12, hour(23))), 0);
    assert_eq!(e.ingest(&mentions("FOO", "h3", 2, hour(3))), 0);
    let after = e.rank(hour(23) + Duration::minutes(30));
    assert_eq!(before, after);
}

#[test]
fn velocity_non_decreasing_as_current_grows() {
    let now = hour(23) + Duration::minutes(30);
    let scores: Vec<f64> = (0..=20)
        .map(|n| engine_with(n, 5).rank(now)[0].velocity_score)
        .collect();
    assert!(scores.windows(2).all(|w| w[1] >= w[0]), "{scores:?}");
}

#[test]
fn rank_is_a_pure_read() {
    let e = engine_with(12, 5);
    let now = hour(23) + Duration::minutes(30);
    let a = e.rank(now);
    let b = e.rank(now);
    assert_eq!(a, b);
    // No evaluate yet: still tracked, nothing cached.
    assert_eq!(a[0].status, TickerStatus::Tracked);
    assert!(e.last_ranking().is_empty());
}

#[test]
fn cooling_keeps_history_and_new_discoveries_are_listed() {
    let mut e = engine_with(12, 5);
    e.evaluate(hour(23) + Duration::minutes(30));
    e.ingest(&mentions("FRESH", "f", 2, hour(25)));
    e.evaluate(hour(25) + Duration::minutes(5));

    let foo = e.stats("FOO", hour(25) + Duration::minutes(5)).unwrap();
    assert_eq!(foo.status, TickerStatus::Cooling);
    assert_eq!(foo.total_mentions, 23 * 2 + 12);

    let found: Vec<String> = e
        .new_discoveries(hour(25) + Duration::minutes(5), Duration::hours(24))
        .into_iter()
        .map(|s| s.ticker)
        .collect();
    assert_eq!(found, vec!["FRESH".to_string()]);
}

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 2, h, m, 0).unwrap()
}

#[test]
fn steady_burst_across_the_hour_alerts_once_with_default_windows() {
    let mut e = TrendingEngine::from_config(&TrendingSection::default());
    // Quiet history: one mention per hour.
    for h in [9, 10, 11] {
        e.ingest(&mentions("FROG", &format!("q{h}"), 1, at(h, 0)));
    }

    // Three mentions every five minutes from 11:30, one cycle per five minutes, until 12:50.
    let mut alerts = Vec::new();
    for step in 0..=16u32 {
        let now = at(11, 30) + Duration::minutes(5 * i64::from(step));
        e.ingest(&mentions("FROG", &format!("s{step}"), 3, now));
        let out = e.evaluate(now);
        alerts.extend(out.alerts);
        let frog = out.ranking.iter().find(|s| s.ticker == "FROG").unwrap();
        if step >= 1 {
            assert_eq!(frog.status, TickerStatus::Trending, "dropped out at {now}");
        }
        if step >= 6 {
            // The current window spans the last hour, not the open clock hour.
            assert!(frog.current_count >= 21, "{now}: {}", frog.current_count);
        }
    }
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].triggered_at, at(11, 35));
}

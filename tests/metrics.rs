// tests/metrics.rs
//
// One process-wide Prometheus recorder; everything lives in one test so ordering is fixed.

mod common;

use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use chrono::Duration;
use std::sync::Arc;
use tower::ServiceExt;

use common::{burst, t0, test_config, RecordingSink, Reply, ScriptedMirror};
use trench_scan::{MemoryStore, Scanner};

#[tokio::test]
async fn metrics_endpoint_exposes_cycle_series() {
    let mirror = ScriptedMirror::new();
    mirror.always("https://m1.example", Reply::Structural);
    mirror.always("https://m2.example", Reply::Posts(burst("FROG", "a", 8, t0())));
    mirror.always("https://m3.example", Reply::Posts(burst("FROG", "a", 8, t0())));

    let scanner = Arc::new(
        Scanner::from_config(
            test_config(),
            mirror,
            Arc::new(MemoryStore::new()),
            RecordingSink::new(),
        )
        .unwrap(),
    );
    // Install the recorder before anything is counted.
    let app = trench_scan::app(scanner.clone()).expect("app() should build Router in tests");

    let rep = scanner.cycle_at(t0() + Duration::minutes(10)).await.unwrap();
    assert_eq!(rep.alerts.len(), 1);

    let resp = app
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();

    for needle in [
        "scan_cycles_total{result=\"ok\"} 1",
        "scan_cycle_duration_ms",
        "scan_last_success_ts",
        "fetch_attempts_total{outcome=\"hard_failure\"} 1",
        "fetch_attempts_total{outcome=\"success\"} 1",
        "pool_transitions_total{to=\"banned\"} 1",
        "extract_mentions_total 8",
        "trending_alerts_total 1",
        "config_velocity_threshold",
        "pool_endpoints{state=\"banned\"}",
    ] {
        assert!(
            text.contains(needle),
            "metrics exposition missing '{needle}'\n{text}"
        );
    }
}

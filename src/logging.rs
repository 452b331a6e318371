// src/logging.rs
//! Tracing setup shared by the service and the `scan_once` tool.
//!
//! - `RUST_LOG` wins when set, otherwise `default_filter` is used.
//! - `TRENCH_LOG_FORMAT=json` switches console output to JSON lines.
//! - `TRENCH_LOG_DIR=<dir>` adds a daily-rotating plain-text file (`trench_scan.<date>`).

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const DEFAULT_FILTER: &str = "trench_scan=info,warn";
pub const ENV_LOG_FORMAT: &str = "TRENCH_LOG_FORMAT";
pub const ENV_LOG_DIR: &str = "TRENCH_LOG_DIR";

/// Install the global subscriber. Safe to call when another subscriber (e.g. Shuttle's)
/// is already installed: in that case this is a no-op and returns `false`.
pub fn init_tracing(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let json = std::env::var(ENV_LOG_FORMAT)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let console = if json {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer().compact().with_target(true).boxed()
    };

    let file = std::env::var(ENV_LOG_DIR).ok().map(|dir| {
        let appender = tracing_appender::rolling::daily(dir, "trench_scan");
        fmt::layer()
            .with_writer(appender)
            .with_ansi(false)
            .with_target(true)
            .boxed()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .is_ok()
}

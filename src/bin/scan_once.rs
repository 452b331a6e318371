//! Run a single scan cycle and print the ranking, contracts and store summary as JSON.
//!
//! Usage: `scan_once [--fixture <feed.xml>]`. With `--fixture`, every mirror and query
//! is answered from the given RSS file instead of the network.

use anyhow::{anyhow, Context, Result};
use std::sync::Arc;

use trench_scan::ingest::providers::nitter_rss::NitterRssClient;
use trench_scan::ingest::types::MirrorClient;
use trench_scan::logging::{init_tracing, DEFAULT_FILTER};
use trench_scan::{MemoryStore, NotifierMux, ScanConfig, Scanner};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing(DEFAULT_FILTER);

    let cfg = ScanConfig::load_default()?;

    let mut args = std::env::args().skip(1);
    let client: Arc<dyn MirrorClient> = match args.next().as_deref() {
        Some("--fixture") => {
            let path = args.next().ok_or_else(|| anyhow!("--fixture needs a path"))?;
            let body = std::fs::read_to_string(&path)
                .with_context(|| format!("reading fixture {path}"))?;
            Arc::new(NitterRssClient::from_fixture(&body))
        }
        Some(other) => return Err(anyhow!("unknown argument '{other}'")),
        None => Arc::new(NitterRssClient::http(&cfg.fetch.user_agent)?),
    };

    let sink = NotifierMux::from_env().with_cooldown(cfg.alerts.cooldown_secs);
    let scanner = Scanner::from_config(cfg, client, Arc::new(MemoryStore::new()), Arc::new(sink))?;

    let report = scanner.cycle().await?;
    let ranking = scanner.engine().lock().await.last_ranking().to_vec();
    let store = scanner.store();
    let contracts = store.query_contracts(20).await?;
    let summary = store.summary(chrono::Utc::now()).await?;

    let out = serde_json::json!({
        "report": report,
        "ranking": ranking.iter().take(20).collect::<Vec<_>>(),
        "contracts": contracts,
        "summary": summary,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

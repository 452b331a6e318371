// src/config/exclusions.rs
//! Exclusion list loading (symbols the extractor must never emit).
//!
//! Accepted formats:
//! - TOML: `symbols = ["BTC", "eth"]`
//! - JSON: `["BTC", "eth"]`
//!
//! Lookup order for [`load_exclusions_default`]:
//! 1) `$TRENCH_EXCLUSIONS_PATH`
//! 2) `config/exclusions.toml`
//! 3) `config/exclusions.json`
//! 4) built-in seed ([`default_seed`])

use anyhow::{anyhow, Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_EXCLUSIONS_PATH: &str = "TRENCH_EXCLUSIONS_PATH";

/// Majors, stablecoins and established memes: not "new" tickers.
const KNOWN_COINS: &[&str] = &[
    "BTC", "ETH", "SOL", "USDT", "USDC", "BNB", "XRP", "ADA", "DOGE", "SHIB", "DOT", "MATIC",
    "LTC", "AVAX", "LINK", "UNI", "ATOM", "XLM", "ALGO", "VET", "FIL", "THETA", "XMR", "AAVE",
    "EOS", "MKR", "XTZ", "NEO", "IOTA", "DASH", "ZEC", "ENJ", "BAT", "COMP", "SNX", "YFI", "SUSHI",
    "CRV", "1INCH", "GRT", "APE", "PEPE", "WIF", "BONK", "FLOKI", "MEME", "WOJAK", "TURBO", "BOB",
];

const FIAT_AND_GENERIC: &[&str] = &[
    "USD", "EUR", "GBP", "JPY", "CAD", "AUD", "NFT", "NFTS", "DAO", "DEFI", "WEB3", "AI",
];

/// Words that show up after a `$` in crypto chatter without being tickers.
const FALSE_POSITIVES: &[&str] = &[
    "THE", "AND", "FOR", "ARE", "BUT", "NOT", "YOU", "ALL", "CAN", "HAD", "HER", "WAS", "ONE",
    "OUR", "OUT", "DAY", "GET", "HAS", "HIM", "HIS", "HOW", "ITS", "LET", "MAY", "NEW", "NOW",
    "OLD", "SEE", "WAY", "WHO", "BOY", "DID", "OWN", "SAY", "SHE", "TOO", "USE", "CEO", "IPO",
    "USA", "UK", "EU", "US", "PT", "EST", "PST", "GMT", "UTC", "AM", "PM", "IMO", "TBH", "FYI",
    "ASAP", "AMA", "ATH", "ATL", "DCA", "FOMO", "FUD", "HODL", "WAGMI", "NGMI", "GM", "GN", "LFG",
    "NFA", "DYOR",
];

/// Built-in exclusion seed used when no file is configured.
pub fn default_seed() -> Vec<String> {
    clean_list(
        KNOWN_COINS
            .iter()
            .chain(FIAT_AND_GENERIC)
            .chain(FALSE_POSITIVES)
            .map(|s| s.to_string())
            .collect(),
    )
}

/// Load exclusions from an explicit path. Supports TOML or JSON formats.
pub fn load_exclusions_from(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading exclusions from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_exclusions(&content, ext.as_str())
}

pub fn load_exclusions_default() -> Result<Vec<String>> {
    if let Ok(p) = std::env::var(ENV_EXCLUSIONS_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_exclusions_from(&pb);
        } else {
            return Err(anyhow!("{ENV_EXCLUSIONS_PATH} points to non-existent path"));
        }
    }
    let toml_p = PathBuf::from("config/exclusions.toml");
    if toml_p.exists() {
        return load_exclusions_from(&toml_p);
    }
    let json_p = PathBuf::from("config/exclusions.json");
    if json_p.exists() {
        return load_exclusions_from(&json_p);
    }
    Ok(default_seed())
}

/// Explicit path if configured, otherwise the default lookup.
pub fn load_exclusions(explicit: Option<&Path>) -> Result<Vec<String>> {
    match explicit {
        Some(p) => load_exclusions_from(p),
        None => load_exclusions_default(),
    }
}

fn parse_exclusions(s: &str, hint_ext: &str) -> Result<Vec<String>> {
    let try_toml = hint_ext == "toml" || s.contains("symbols");
    if try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    if let Ok(v) = parse_json(s) {
        return Ok(v);
    }
    if !try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    Err(anyhow!("unsupported exclusions format"))
}

fn parse_toml(s: &str) -> Result<Vec<String>> {
    #[derive(serde::Deserialize)]
    struct TomlExcl {
        symbols: Vec<String>,
    }
    let v: TomlExcl = toml::from_str(s)?;
    Ok(clean_list(v.symbols))
}

fn parse_json(s: &str) -> Result<Vec<String>> {
    let v: Vec<String> = serde_json::from_str(s)?;
    Ok(clean_list(v))
}

/// Trim, strip a leading `$`, uppercase, drop empties, sort + dedup.
fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut set = BTreeSet::new();
    for it in items {
        let t = it.trim().trim_start_matches('$');
        if !t.is_empty() {
            set.insert(t.to_ascii_uppercase());
        }
    }
    set.into_iter().collect()
}

// src/analyze/contract.rs
//! Solana contract addresses for pump.fun launches.
//!
//! Two shapes are picked up:
//! - a base58 address ending in `pump` (the pump.fun mint suffix), anywhere in the text;
//! - any base58 address of Solana length, but only when the post talks about pump.fun.

use chrono::{DateTime, Utc};
use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::ingest::types::Post;

pub const CHAIN_SOLANA: &str = "solana";

static RE_PUMP_MINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([1-9A-HJ-NP-Za-km-z]{28,40}pump)\b").expect("pump mint regex")
});

static RE_SOLANA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([1-9A-HJ-NP-Za-km-z]{32,44})\b").expect("solana address regex"));

/// One contract address seen in one post.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContractMention {
    pub address: String,
    pub chain: String,
    pub post_id: String,
    pub mentioned_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ContractExtractor;

impl ContractExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Distinct addresses in `text`.
    pub fn extract_text(&self, text: &str) -> BTreeSet<String> {
        let mut out: BTreeSet<String> = RE_PUMP_MINT
            .captures_iter(text)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .collect();

        let lower = text.to_ascii_lowercase();
        if lower.contains("pump.fun") || lower.contains("pumpfun") {
            out.extend(
                RE_SOLANA
                    .captures_iter(text)
                    .filter_map(|c| c.get(1))
                    .map(|m| m.as_str().to_string()),
            );
        }
        out
    }

    pub fn extract_batch(&self, posts: &[Post]) -> Vec<ContractMention> {
        let mut out = Vec::new();
        for post in posts {
            for address in self.extract_text(&post.text) {
                out.push(ContractMention {
                    address,
                    chain: CHAIN_SOLANA.to_string(),
                    post_id: post.id.clone(),
                    mentioned_at: post.created_at,
                });
            }
        }
        counter!("extract_contracts_total").increment(out.len() as u64);
        out
    }
}

/// `Ai3e...pump`: first and last four characters.
pub fn short_address(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= 8 {
        return address.to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

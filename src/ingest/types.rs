// src/ingest/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One scraped post. Immutable once built by a mirror client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Post {
    pub id: String, // platform-native status id
    pub author: String,
    pub text: String, // normalized text
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
}

/// Why a single attempt against one mirror failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorError {
    /// Timeouts, resets, 429/5xx, empty bodies. Worth retrying elsewhere.
    Transient(String),
    /// The mirror answered, but with something we cannot use (blocked, gone, not a feed).
    Structural(String),
}

impl std::fmt::Display for MirrorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MirrorError::Transient(m) => write!(f, "transient: {m}"),
            MirrorError::Structural(m) => write!(f, "structural: {m}"),
        }
    }
}

impl std::error::Error for MirrorError {}

/// Seam between the Fetcher and whatever speaks to a concrete mirror.
#[async_trait::async_trait]
pub trait MirrorClient: Send + Sync {
    /// Run one search against `base_url`. Must not retry internally.
    async fn search(&self, base_url: &str, query: &str) -> Result<Vec<Post>, MirrorError>;
    fn name(&self) -> &'static str;
}

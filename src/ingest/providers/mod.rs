// src/ingest/providers/mod.rs
pub mod nitter_rss;

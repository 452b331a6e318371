// src/analyze/mod.rs
//! Text side of the pipeline: spam suppression, then cashtag and contract extraction.

pub mod antispam;
pub mod contract;
pub mod ticker;

pub use crate::analyze::antispam::{AntiSpam, AntiSpamParams};
pub use crate::analyze::contract::{ContractExtractor, ContractMention};
pub use crate::analyze::ticker::{BatchExtraction, ExclusionSet, Mention, TickerExtractor};

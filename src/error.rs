// src/error.rs
//! Typed errors for the conditions callers branch on.
//!
//! Plumbing (I/O, config parsing, sinks) stays on `anyhow::Result` with context;
//! [`ScanError`] exists for the skip-this-cycle cases the scheduler must tell apart.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    /// Every endpoint in the pool is banned (and none has finished its cool-down).
    #[error("no healthy endpoint available")]
    NoHealthyEndpoint,

    /// All retry attempts for a query failed.
    #[error("fetch exhausted after {attempts} attempt(s): {last_error}")]
    FetchExhausted { attempts: u32, last_error: String },

    /// Invalid configuration snapshot.
    #[error("config error: {0}")]
    Config(String),

    /// Record store failure (propagated from the store implementation).
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl ScanError {
    /// Exhaustion-type failures skip the current cycle; they are never fatal.
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            ScanError::NoHealthyEndpoint | ScanError::FetchExhausted { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhaustion_is_skip_but_config_is_not() {
        assert!(ScanError::NoHealthyEndpoint.is_skip());
        assert!(ScanError::FetchExhausted {
            attempts: 3,
            last_error: "429".into()
        }
        .is_skip());
        assert!(!ScanError::Config("empty endpoints".into()).is_skip());
    }

    #[test]
    fn exhausted_message_names_attempts() {
        let e = ScanError::FetchExhausted {
            attempts: 2,
            last_error: "timeout".into(),
        };
        assert_eq!(e.to_string(), "fetch exhausted after 2 attempt(s): timeout");
    }
}

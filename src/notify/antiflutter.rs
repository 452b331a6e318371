// src/notify/antiflutter.rs
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;

/// Per-ticker cooldown gate in front of the alert channels.
/// - First alert for a ticker always passes.
/// - Inside the cooldown, alerts for that ticker are suppressed.
/// - State is updated explicitly via `record_alert`.
#[derive(Debug, Clone, Default)]
pub struct AlertGate {
    cooldown: ChronoDuration,
    last_alert: HashMap<String, DateTime<Utc>>,
}

impl AlertGate {
    /// `cooldown_secs` < 0 is treated as 0 (no cooldown).
    pub fn new(cooldown_secs: i64) -> Self {
        let secs = cooldown_secs.clamp(0, i64::MAX / 1000);
        Self {
            cooldown: ChronoDuration::seconds(secs),
            last_alert: HashMap::new(),
        }
    }

    /// Check if `ticker` may alert at `now`. Does NOT mutate state.
    pub fn should_alert(&self, ticker: &str, now: DateTime<Utc>) -> bool {
        match self.last_alert.get(ticker) {
            None => true,
            Some(ts) => now.signed_duration_since(*ts) >= self.cooldown,
        }
    }

    pub fn record_alert(&mut self, ticker: &str, now: DateTime<Utc>) {
        self.last_alert.insert(ticker.to_string(), now);
        // Entries past the cooldown can no longer suppress anything.
        let cooldown = self.cooldown;
        self.last_alert
            .retain(|_, ts| now.signed_duration_since(*ts) < cooldown || *ts == now);
    }
}

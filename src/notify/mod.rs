// src/notify/mod.rs
//! Alert delivery. The pipeline hands every edge-triggered [`AlertEvent`] to one
//! [`AlertSink`]; in production that is a [`NotifierMux`] fanning out to whichever
//! channels are configured in the environment.
//!
//! Channel env vars (a channel is enabled only when all of its vars are set):
//! - Discord: `DISCORD_WEBHOOK_URL`
//! - Slack: `SLACK_WEBHOOK_URL`
//! - Telegram: `TELEGRAM_BOT_TOKEN`, `TELEGRAM_CHAT_ID`
//! - Email: `SMTP_HOST`, `SMTP_USER`, `SMTP_PASS`, `NOTIFY_EMAIL_FROM`, `NOTIFY_EMAIL_TO`

pub mod antiflutter;
pub mod discord;
pub mod email;
pub mod slack;
pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use std::sync::Mutex;

pub use crate::engine::AlertEvent;
use crate::notify::antiflutter::AlertGate;

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, alert: &AlertEvent) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// Short human text shared by all channels.
pub fn headline(alert: &AlertEvent) -> String {
    format!(
        "${} is trending: {:.1}x velocity, {} mentions",
        alert.ticker, alert.velocity_score, alert.mention_count
    )
}

pub fn details(alert: &AlertEvent) -> String {
    format!(
        "Ticker: ${}\nVelocity: {:.2}x\nMentions (current window): {}\nTriggered (UTC): {}",
        alert.ticker,
        alert.velocity_score,
        alert.mention_count,
        alert.triggered_at.to_rfc3339()
    )
}

/// Fans one alert out to every configured channel. A failing channel is logged and
/// skipped; it never blocks the others or the scan cycle.
pub struct NotifierMux {
    sinks: Vec<Box<dyn AlertSink>>,
    gate: Option<Mutex<AlertGate>>,
}

impl NotifierMux {
    pub fn new(sinks: Vec<Box<dyn AlertSink>>) -> Self {
        Self { sinks, gate: None }
    }

    /// Enable every channel whose env vars are present.
    pub fn from_env() -> Self {
        let mut sinks: Vec<Box<dyn AlertSink>> = Vec::new();
        if let Some(d) = discord::DiscordNotifier::from_env() {
            sinks.push(Box::new(d));
        }
        if let Some(s) = slack::SlackNotifier::from_env() {
            sinks.push(Box::new(s));
        }
        if let Some(t) = telegram::TelegramNotifier::from_env() {
            sinks.push(Box::new(t));
        }
        match email::EmailSender::from_env() {
            Ok(Some(e)) => sinks.push(Box::new(e)),
            Ok(None) => {}
            Err(e) => tracing::warn!(target: "notify", error = %format!("{e:#}"), "email channel disabled"),
        }
        let names: Vec<&str> = sinks.iter().map(|s| s.name()).collect();
        tracing::info!(target: "notify", channels = ?names, "alert channels configured");
        Self::new(sinks)
    }

    /// Per-ticker re-alert cooldown; `secs <= 0` leaves the gate off.
    pub fn with_cooldown(mut self, secs: i64) -> Self {
        self.gate = (secs > 0).then(|| Mutex::new(AlertGate::new(secs)));
        self
    }

    pub fn push(&mut self, sink: Box<dyn AlertSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Deliver to all channels; returns how many accepted it.
    pub async fn notify(&self, alert: &AlertEvent) -> usize {
        if !self.pass_gate(alert) {
            tracing::debug!(target: "notify", ticker = %alert.ticker, "alert suppressed by cooldown");
            counter!("notify_suppressed_total").increment(1);
            return 0;
        }

        if self.sinks.is_empty() {
            tracing::info!(target: "notify", ticker = %alert.ticker, "{}", headline(alert));
            return 0;
        }

        let mut delivered = 0usize;
        for sink in &self.sinks {
            match sink.send(alert).await {
                Ok(()) => {
                    delivered += 1;
                    counter!("notify_sent_total", "channel" => sink.name()).increment(1);
                }
                Err(e) => {
                    tracing::warn!(
                        target: "notify",
                        channel = sink.name(),
                        ticker = %alert.ticker,
                        error = %format!("{e:#}"),
                        "alert delivery failed"
                    );
                    counter!("notify_failed_total", "channel" => sink.name()).increment(1);
                }
            }
        }
        delivered
    }

    fn pass_gate(&self, alert: &AlertEvent) -> bool {
        let Some(gate) = &self.gate else {
            return true;
        };
        let mut g = gate.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let now = Utc::now().max(alert.triggered_at);
        if !g.should_alert(&alert.ticker, now) {
            return false;
        }
        g.record_alert(&alert.ticker, now);
        true
    }
}

#[async_trait]
impl AlertSink for NotifierMux {
    async fn send(&self, alert: &AlertEvent) -> Result<()> {
        self.notify(alert).await;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mux"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counting(Arc<AtomicUsize>);
    struct Failing;

    #[async_trait]
    impl AlertSink for Counting {
        async fn send(&self, _alert: &AlertEvent) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn name(&self) -> &'static str {
            "counting"
        }
    }

    #[async_trait]
    impl AlertSink for Failing {
        async fn send(&self, _alert: &AlertEvent) -> Result<()> {
            Err(anyhow!("boom"))
        }
        fn name(&self) -> &'static str {
            "failing"
        }
    }

    fn alert(t: &str) -> AlertEvent {
        AlertEvent {
            ticker: t.into(),
            velocity_score: 6.0,
            mention_count: 12,
            triggered_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn failing_channel_does_not_block_others() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mux = NotifierMux::new(vec![Box::new(Failing), Box::new(Counting(hits.clone()))]);
        assert_eq!(mux.notify(&alert("FOO")).await, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cooldown_is_per_ticker() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mux =
            NotifierMux::new(vec![Box::new(Counting(hits.clone()))]).with_cooldown(3600);
        mux.notify(&alert("FOO")).await;
        mux.notify(&alert("FOO")).await;
        mux.notify(&alert("BAR")).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn headline_mentions_numbers() {
        let h = headline(&alert("FOO"));
        assert!(h.contains("$FOO"));
        assert!(h.contains("6.0x"));
        assert!(h.contains("12 mentions"));
    }
}

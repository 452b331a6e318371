use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::{AlertEvent, AlertSink};

/// Telegram Bot API `sendMessage` to one chat.
pub struct TelegramNotifier {
    token: String,
    chat_id: String,
    api_base: String,
    client: Client,
    timeout: Duration,
}

impl TelegramNotifier {
    pub fn new(token: String, chat_id: String) -> Self {
        Self {
            token,
            chat_id,
            api_base: "https://api.telegram.org".to_string(),
            client: Client::new(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn from_env() -> Option<Self> {
        let token = std::env::var("TELEGRAM_BOT_TOKEN").ok()?;
        let chat = std::env::var("TELEGRAM_CHAT_ID").ok()?;
        if token.trim().is_empty() || chat.trim().is_empty() {
            return None;
        }
        Some(Self::new(token, chat))
    }

    /// Point at a different Bot API host (self-hosted API server, tests).
    pub fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = base.trim_end_matches('/').to_string();
        self
    }
}

pub fn render(alert: &AlertEvent) -> String {
    format!(
        "*TRENDING ALERT*\n\n*${}* is gaining momentum!\n\nMentions (current window): {}\nVelocity: {:.1}x\n{}",
        alert.ticker,
        alert.mention_count,
        alert.velocity_score,
        alert.triggered_at.format("%H:%M UTC")
    )
}

#[async_trait]
impl AlertSink for TelegramNotifier {
    async fn send(&self, alert: &AlertEvent) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.token);
        let body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": render(alert),
            "parse_mode": "Markdown",
        });
        self.client
            .post(&url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .context("telegram sendMessage")?
            .error_for_status()
            .context("telegram non-2xx")?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "telegram"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn render_has_ticker_and_time() {
        let a = AlertEvent {
            ticker: "FROG".into(),
            velocity_score: 7.25,
            mention_count: 14,
            triggered_at: Utc.with_ymd_and_hms(2025, 3, 1, 13, 5, 0).unwrap(),
        };
        let s = render(&a);
        assert!(s.contains("*$FROG*"));
        assert!(s.contains("Velocity: 7.2x") || s.contains("Velocity: 7.3x"));
        assert!(s.ends_with("13:05 UTC"));
    }
}

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::{headline, AlertEvent, AlertSink};

// Discord embed side colour (green).
const EMBED_COLOR: u32 = 0x2ECC71;

#[derive(Clone)]
pub struct DiscordNotifier {
    webhook: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl DiscordNotifier {
    pub fn new(webhook: String) -> Self {
        Self {
            webhook,
            client: Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    pub fn from_env() -> Option<Self> {
        std::env::var("DISCORD_WEBHOOK_URL")
            .ok()
            .filter(|u| !u.trim().is_empty())
            .map(Self::new)
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    /// POST with up to `max_retries` tries, 500ms doubling between them.
    async fn post(&self, payload: &WebhookPayload) -> Result<()> {
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&self.webhook)
                .timeout(self.timeout)
                .json(payload)
                .send()
                .await;

            let err = match res {
                Ok(rsp) => match rsp.error_for_status_ref() {
                    Ok(_) => return Ok(()),
                    Err(e) => anyhow!("discord webhook status: {e}"),
                },
                Err(e) => anyhow!("discord webhook request: {e}"),
            };
            if attempt >= self.max_retries {
                return Err(err);
            }
            tracing::debug!(target: "notify", attempt, error = %err, "discord retry");
            tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
        }
    }
}

#[async_trait]
impl AlertSink for DiscordNotifier {
    async fn send(&self, alert: &AlertEvent) -> Result<()> {
        self.post(&WebhookPayload::for_alert(alert)).await
    }

    fn name(&self) -> &'static str {
        "discord"
    }
}

#[derive(Debug, Serialize)]
struct EmbedField {
    name: &'static str,
    value: String,
    inline: bool,
}

#[derive(Debug, Serialize)]
struct Embed {
    title: String,
    color: u32,
    timestamp: String,
    fields: Vec<EmbedField>,
}

#[derive(Debug, Serialize)]
struct WebhookPayload {
    content: Option<String>,
    embeds: Vec<Embed>,
}

impl WebhookPayload {
    fn for_alert(alert: &AlertEvent) -> Self {
        let field = |name, value: String| EmbedField {
            name,
            value,
            inline: true,
        };
        Self {
            content: None,
            embeds: vec![Embed {
                title: headline(alert),
                color: EMBED_COLOR,
                timestamp: alert.triggered_at.to_rfc3339(),
                fields: vec![
                    field("Ticker", format!("${}", alert.ticker)),
                    field("Velocity", format!("{:.2}x", alert.velocity_score)),
                    field("Mentions", alert.mention_count.to_string()),
                ],
            }],
        }
    }
}

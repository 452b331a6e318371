use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};

use super::{details, headline, AlertEvent, AlertSink};

pub struct EmailSender {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

const VARS: [&str; 5] = [
    "SMTP_HOST",
    "SMTP_USER",
    "SMTP_PASS",
    "NOTIFY_EMAIL_FROM",
    "NOTIFY_EMAIL_TO",
];

impl EmailSender {
    /// `Ok(None)` when no SMTP variable is set; an error when the set is partial or invalid.
    pub fn from_env() -> Result<Option<Self>> {
        let vals: Vec<Option<String>> = VARS
            .iter()
            .map(|k| std::env::var(k).ok().filter(|v| !v.trim().is_empty()))
            .collect();
        if vals.iter().all(Option::is_none) {
            return Ok(None);
        }
        let mut it = vals.into_iter().zip(VARS);
        let mut next = || -> Result<String> {
            let (v, k) = it.next().context("smtp env list")?;
            v.with_context(|| format!("{k} missing"))
        };
        let host = next()?;
        let user = next()?;
        let pass = next()?;
        let from_addr = next()?;
        let to_addr = next()?;

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&host)
            .context("invalid SMTP_HOST")?
            .credentials(Credentials::new(user, pass))
            .build();

        let from = from_addr.parse().context("invalid NOTIFY_EMAIL_FROM")?;
        let to = to_addr.parse().context("invalid NOTIFY_EMAIL_TO")?;

        Ok(Some(Self { mailer, from, to }))
    }
}

#[async_trait]
impl AlertSink for EmailSender {
    async fn send(&self, alert: &AlertEvent) -> Result<()> {
        let msg = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(headline(alert))
            .header(header::ContentType::TEXT_PLAIN)
            .body(details(alert))
            .context("build email")?;

        self.mailer.send(msg).await.context("send email")?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "email"
    }
}

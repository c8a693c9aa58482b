use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::{Config, TELEGRAM_API_URL};
use crate::error::{AppError, Result};
use crate::types::Alert;

/// Where a cycle's ranked alerts go.
pub enum Notifier {
    /// Structured log lines only.
    Log,
    Telegram(TelegramNotifier),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryStats {
    pub sent: usize,
    pub failed: usize,
}

impl Notifier {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        match cfg.telegram_credentials() {
            Some((token, chat_id)) => Ok(Notifier::Telegram(TelegramNotifier::new(TELEGRAM_API_URL, token, chat_id)?)),
            None => {
                warn!("TELEGRAM_TOKEN/TELEGRAM_CHAT_ID not set, alerts will only be logged");
                Ok(Notifier::Log)
            }
        }
    }

    /// Delivers alerts in order. A failed delivery is logged and does not stop the rest.
    pub async fn deliver(&self, alerts: &[Alert]) -> DeliveryStats {
        let mut stats = DeliveryStats::default();
        for (rank, alert) in alerts.iter().enumerate() {
            log_alert(rank + 1, alert);
            match self {
                Notifier::Log => stats.sent += 1,
                Notifier::Telegram(t) => match t.send(alert).await {
                    Ok(()) => stats.sent += 1,
                    Err(e) => {
                        warn!(identity = %alert.identity, "Delivery failed: {e}");
                        stats.failed += 1;
                    }
                },
            }
        }
        stats
    }
}

fn log_alert(rank: usize, alert: &Alert) {
    info!(
        event = "ALERT",
        rank,
        identity = %alert.identity,
        kind = alert.kind(),
        price = alert.price,
        score = alert.score,
        priority_region = alert.priority_region,
        "{}",
        alert.summary_line(),
    );
}

// ---------------------------------------------------------------------------
// Telegram
// ---------------------------------------------------------------------------

pub struct TelegramNotifier {
    client: reqwest::Client,
    base_url: String,
    token: String,
    chat_id: String,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: String,
    disable_web_page_preview: bool,
}

#[derive(Serialize)]
struct SendPhoto<'a> {
    chat_id: &'a str,
    photo: &'a str,
    caption: String,
}

impl TelegramNotifier {
    pub fn new(base_url: &str, token: &str, chat_id: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            chat_id: chat_id.to_string(),
        })
    }

    /// `sendPhoto` when the alert has an image, `sendMessage` otherwise.
    pub async fn send(&self, alert: &Alert) -> Result<()> {
        let text = alert.summary_line();
        let response = match alert.image_url.as_deref() {
            Some(photo) => {
                let body = SendPhoto { chat_id: &self.chat_id, photo, caption: text };
                self.client.post(self.method_url("sendPhoto")).json(&body).send().await?
            }
            None => {
                let body = SendMessage { chat_id: &self.chat_id, text, disable_web_page_preview: false };
                self.client.post(self.method_url("sendMessage")).json(&body).send().await?
            }
        };

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(AppError::Notify(format!("Telegram returned {status}: {body}")))
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }
}

use crate::config::DiscordConfig;
use crate::state::{AlertEvent, Severity};
use serde_json::{json, Value};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{error, warn};

const RETRY_DELAYS_SECS: [u64; 3] = [1, 2, 4];

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("discord webhook url not found: set '{0}' in the environment or discord.webhook_url in config")]
    MissingUrl(String),
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("webhook returned HTTP {0}")]
    HttpStatus(u16),
}

pub struct DiscordNotifier {
    client: reqwest::Client,
    url: String,
    retry_delays: Vec<Duration>,
}

impl DiscordNotifier {
    pub fn from_config(cfg: &DiscordConfig) -> Result<Self, WebhookError> {
        let url = cfg
            .resolve_webhook_url()
            .ok_or_else(|| WebhookError::MissingUrl(cfg.webhook_url_env.clone()))?;
        Ok(Self::new(url))
    }

    pub fn new(url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            url,
            retry_delays: RETRY_DELAYS_SECS
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
        }
    }

    pub async fn send_alert_events(&self, events: &[AlertEvent]) -> usize {
        let mut sent = 0_usize;
        for event in events {
            if self.deliver(&embed_payload(event, SystemTime::now())).await.is_ok() {
                sent += 1;
            }
        }
        sent
    }

    async fn deliver(&self, payload: &Value) -> Result<(), WebhookError> {
        let mut last_err: Option<WebhookError> = None;

        for (attempt, delay) in self.retry_delays.iter().enumerate() {
            match self.try_send(payload).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        attempt = attempt + 1,
                        error = %e,
                        "discord delivery attempt failed, retrying"
                    );
                    last_err = Some(e);
                    tokio::time::sleep(*delay).await;
                }
            }
        }

        match self.try_send(payload).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(error = %e, "discord delivery failed after all retries");
                Err(last_err.unwrap_or(e))
            }
        }
    }

    async fn try_send(&self, payload: &Value) -> Result<(), WebhookError> {
        let response = self.client.post(&self.url).json(payload).send().await?;
        if !response.status().is_success() {
            return Err(WebhookError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

fn level_name(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "Info",
        Severity::Warning => "Warning",
        Severity::Error => "Error",
    }
}

fn level_color(severity: Severity) -> u32 {
    match severity {
        Severity::Info => 0x3498db,
        Severity::Warning => 0xf1c40f,
        Severity::Error => 0xe74c3c,
    }
}

fn embed_payload(event: &AlertEvent, at: SystemTime) -> Value {
    let severity = event.severity();
    json!({
        "embeds": [{
            "author": { "name": format!("Bobcat {}", level_name(severity)) },
            "title": event.headline(),
            "description": event.detail,
            "color": level_color(severity),
            "timestamp": humantime::format_rfc3339_seconds(at).to_string(),
        }]
    })
}

use crate::config::Config;
use crate::discord::{DiscordNotifier, WebhookError};
use crate::metrics::Metrics;
use crate::state::AlertEvent;
use crate::telegram::{TelegramError, TelegramNotifier};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to set up Telegram: {0}")]
    Telegram(#[from] TelegramError),
    #[error("failed to set up Discord: {0}")]
    Discord(#[from] WebhookError),
}

#[derive(Default)]
pub struct Notifiers {
    telegram: Option<TelegramNotifier>,
    discord: Option<DiscordNotifier>,
}

impl Notifiers {
    pub fn from_config(cfg: &Config) -> Result<Self, NotifyError> {
        let telegram = if cfg.telegram.enabled {
            Some(TelegramNotifier::from_config(&cfg.telegram)?)
        } else {
            None
        };
        let discord = if cfg.discord.enabled {
            Some(DiscordNotifier::from_config(&cfg.discord)?)
        } else {
            None
        };
        Ok(Self { telegram, discord })
    }

    pub async fn dispatch(&mut self, events: &[AlertEvent], metrics: &Metrics, now_unix: i64) {
        if events.is_empty() {
            return;
        }
        if let Some(telegram) = self.telegram.as_mut() {
            let sent = telegram.send_alert_events(events, now_unix).await;
            metrics.inc_notification_sent("telegram", sent);
        }
        if let Some(discord) = &self.discord {
            let sent = discord.send_alert_events(events).await;
            metrics.inc_notification_sent("discord", sent);
        }
    }
}

use crate::config::{non_empty_env, TelegramConfig};
use crate::state::{AlertEvent, Severity};
use std::collections::{HashMap, VecDeque};
use teloxide::prelude::*;
use teloxide::types::{ChatId, ParseMode};
use teloxide::utils::html;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("telegram token not found: set '{0}' in the environment or telegram.bot_token in config")]
    MissingToken(String),
    #[error("telegram.allowed_chat_ids is empty: add at least one chat id to config")]
    NoChats,
    #[error("telegram request failed: {0}")]
    Request(#[from] teloxide::RequestError),
}

pub struct TelegramNotifier {
    bot: Bot,
    chat_ids: Vec<i64>,
    limiter: RateLimiter,
}

impl TelegramNotifier {
    pub fn from_config(cfg: &TelegramConfig) -> Result<Self, TelegramError> {
        let token = resolve_token(cfg)?;
        Ok(Self {
            bot: Bot::new(token),
            chat_ids: cfg.allowed_chat_ids.clone(),
            limiter: RateLimiter::new(cfg.rate_limit_per_minute),
        })
    }

    pub async fn send_alert_events(&mut self, events: &[AlertEvent], now_unix: i64) -> usize {
        if events.is_empty() {
            return 0;
        }
        let text = format_alert_events(events);
        let mut sent = 0_usize;

        for chat_id in self.chat_ids.clone() {
            if !self.limiter.allow(chat_id, now_unix) {
                debug!(chat_id, "telegram rate limit reached, dropping alert");
                continue;
            }
            match self.send_text(chat_id, &text).await {
                Ok(()) => sent += events.len(),
                Err(err) => {
                    warn!(chat_id, error = %err, "failed to send telegram alert");
                }
            }
        }
        sent
    }

    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), TelegramError> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .parse_mode(ParseMode::Html)
            .await?;
        Ok(())
    }
}

pub fn resolve_token(cfg: &TelegramConfig) -> Result<String, TelegramError> {
    if cfg.allowed_chat_ids.is_empty() {
        return Err(TelegramError::NoChats);
    }
    if let Some(v) = non_empty_env(&cfg.bot_token_env) {
        return Ok(v);
    }
    cfg.bot_token
        .as_ref()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| TelegramError::MissingToken(cfg.bot_token_env.clone()))
}

fn severity_icon(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "🔔",
        Severity::Warning => "⚠️",
        Severity::Error => "💥",
    }
}

fn format_alert_events(events: &[AlertEvent]) -> String {
    events
        .iter()
        .map(|e| {
            format!(
                "{} <b>{}</b>\n<code>{}</code>",
                severity_icon(e.severity()),
                html::escape(&e.headline()),
                html::escape(&e.detail)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[derive(Debug)]
struct RateLimiter {
    limit_per_minute: u32,
    timestamps_by_chat: HashMap<i64, VecDeque<i64>>,
}

impl RateLimiter {
    fn new(limit_per_minute: u32) -> Self {
        Self {
            limit_per_minute,
            timestamps_by_chat: HashMap::new(),
        }
    }

    fn allow(&mut self, chat_id: i64, now_unix: i64) -> bool {
        let queue = self.timestamps_by_chat.entry(chat_id).or_default();
        while let Some(ts) = queue.front().copied() {
            if now_unix - ts >= 60 {
                queue.pop_front();
            } else {
                break;
            }
        }

        if queue.len() >= self.limit_per_minute as usize {
            return false;
        }

        queue.push_back(now_unix);
        true
    }
}

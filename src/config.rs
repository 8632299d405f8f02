use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub listen: String,
    pub interval_secs: u64,
    pub miner: MinerConfig,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub autopilot: AutopilotConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub discord: DiscordConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MinerConfig {
    pub ip_address: String,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_password_env")]
    pub password_env: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_elapsed_secs")]
    pub max_elapsed_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Thresholds {
    #[serde(default = "default_temp_min_celsius")]
    pub temp_min_celsius: i64,
    #[serde(default = "default_temp_max_celsius")]
    pub temp_max_celsius: i64,
    #[serde(default = "default_min_speed_mbits")]
    pub min_download_mbits: i64,
    #[serde(default = "default_min_speed_mbits")]
    pub min_upload_mbits: i64,
    #[serde(default = "default_max_latency_ms")]
    pub max_latency_ms: i64,
    #[serde(default = "default_fastsync_gap")]
    pub fastsync_gap: i64,
    #[serde(default = "default_resync_gap")]
    pub resync_gap: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AutopilotConfig {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_action_cooldown_secs")]
    pub action_cooldown_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AlertsConfig {
    #[serde(default = "default_fail_threshold")]
    pub fail_threshold: u32,
    #[serde(default = "default_repeat_interval_secs")]
    pub repeat_interval_secs: u64,
    #[serde(default = "default_recovery_notify")]
    pub recovery_notify: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LogConfig {
    #[serde(default)]
    pub file: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_bot_token_env")]
    pub bot_token_env: String,
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub allowed_chat_ids: Vec<i64>,
    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_minute: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscordConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_webhook_url_env")]
    pub webhook_url_env: String,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_secs: default_max_delay_secs(),
            multiplier: default_multiplier(),
            max_elapsed_secs: default_max_elapsed_secs(),
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            temp_min_celsius: default_temp_min_celsius(),
            temp_max_celsius: default_temp_max_celsius(),
            min_download_mbits: default_min_speed_mbits(),
            min_upload_mbits: default_min_speed_mbits(),
            max_latency_ms: default_max_latency_ms(),
            fastsync_gap: default_fastsync_gap(),
            resync_gap: default_resync_gap(),
        }
    }
}

impl Default for AutopilotConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            action_cooldown_secs: default_action_cooldown_secs(),
        }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            fail_threshold: default_fail_threshold(),
            repeat_interval_secs: default_repeat_interval_secs(),
            recovery_notify: default_recovery_notify(),
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token_env: default_bot_token_env(),
            bot_token: None,
            allowed_chat_ids: Vec::new(),
            rate_limit_per_minute: default_rate_limit_per_minute(),
        }
    }
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_url_env: default_webhook_url_env(),
            webhook_url: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid config: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation("listen is required".to_string()));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "listen must be a valid host:port address".to_string(),
            ));
        }
        if self.interval_secs < 1 {
            return Err(ConfigError::Validation(
                "interval_secs must be >= 1".to_string(),
            ));
        }

        validate_miner(&self.miner)?;
        validate_thresholds(&self.thresholds)?;
        validate_alerts(&self.alerts)?;
        if self.telegram.rate_limit_per_minute < 1 {
            return Err(ConfigError::Validation(
                "telegram.rate_limit_per_minute must be >= 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

impl MinerConfig {
    pub fn resolve_password(&self) -> String {
        non_empty_env(&self.password_env)
            .or_else(|| {
                self.password
                    .as_ref()
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
            })
            .unwrap_or_else(default_password)
    }
}

impl DiscordConfig {
    pub fn resolve_webhook_url(&self) -> Option<String> {
        non_empty_env(&self.webhook_url_env).or_else(|| {
            self.webhook_url
                .as_ref()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        })
    }
}

pub fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn validate_miner(cfg: &MinerConfig) -> Result<(), ConfigError> {
    if cfg.ip_address.trim().is_empty() {
        return Err(ConfigError::Validation(
            "miner.ip_address is required".to_string(),
        ));
    }
    if cfg.ip_address.contains("://") || cfg.ip_address.contains('/') {
        return Err(ConfigError::Validation(format!(
            "miner.ip_address '{}' must be a bare host, without scheme or path",
            cfg.ip_address
        )));
    }
    if cfg.username.trim().is_empty() {
        return Err(ConfigError::Validation(
            "miner.username must not be empty".to_string(),
        ));
    }
    if cfg.request_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "miner.request_timeout_secs must be > 0".to_string(),
        ));
    }
    let retry = &cfg.retry;
    if retry.initial_delay_ms == 0 {
        return Err(ConfigError::Validation(
            "miner.retry.initial_delay_ms must be > 0".to_string(),
        ));
    }
    if !(retry.multiplier.is_finite() && retry.multiplier >= 1.0) {
        return Err(ConfigError::Validation(
            "miner.retry.multiplier must be >= 1".to_string(),
        ));
    }
    if retry.max_delay_secs.saturating_mul(1000) < retry.initial_delay_ms {
        return Err(ConfigError::Validation(
            "miner.retry.max_delay_secs must not be below initial_delay_ms".to_string(),
        ));
    }
    if retry.max_elapsed_secs == 0 {
        return Err(ConfigError::Validation(
            "miner.retry.max_elapsed_secs must be > 0".to_string(),
        ));
    }
    Ok(())
}

fn validate_thresholds(t: &Thresholds) -> Result<(), ConfigError> {
    if t.temp_min_celsius >= t.temp_max_celsius {
        return Err(ConfigError::Validation(
            "thresholds.temp_min_celsius must be below temp_max_celsius".to_string(),
        ));
    }
    if t.min_download_mbits < 0 || t.min_upload_mbits < 0 || t.max_latency_ms < 0 {
        return Err(ConfigError::Validation(
            "thresholds speeds and latency must be >= 0".to_string(),
        ));
    }
    if t.fastsync_gap < 0 || t.fastsync_gap >= t.resync_gap {
        return Err(ConfigError::Validation(
            "thresholds.fastsync_gap must be >= 0 and below resync_gap".to_string(),
        ));
    }
    Ok(())
}

fn validate_alerts(cfg: &AlertsConfig) -> Result<(), ConfigError> {
    if cfg.fail_threshold < 1 {
        return Err(ConfigError::Validation(
            "alerts.fail_threshold must be >= 1".to_string(),
        ));
    }
    if cfg.repeat_interval_secs < 60 {
        return Err(ConfigError::Validation(
            "alerts.repeat_interval_secs must be >= 60".to_string(),
        ));
    }
    Ok(())
}

fn default_username() -> String {
    "bobcat".to_string()
}

fn default_password() -> String {
    "miner".to_string()
}

fn default_password_env() -> String {
    "BOBCAT_PASSWORD".to_string()
}

const fn default_request_timeout_secs() -> u64 {
    30
}

const fn default_initial_delay_ms() -> u64 {
    1000
}

const fn default_max_delay_secs() -> u64 {
    60
}

const fn default_multiplier() -> f64 {
    2.0
}

const fn default_max_elapsed_secs() -> u64 {
    600
}

const fn default_temp_min_celsius() -> i64 {
    0
}

// https://www.bobcatminer.com/post/bobcat-diagnoser-user-guide
const fn default_temp_max_celsius() -> i64 {
    65
}

const fn default_min_speed_mbits() -> i64 {
    5
}

const fn default_max_latency_ms() -> i64 {
    50
}

const fn default_fastsync_gap() -> i64 {
    400
}

const fn default_resync_gap() -> i64 {
    10_000
}

const fn default_action_cooldown_secs() -> u64 {
    1800
}

const fn default_fail_threshold() -> u32 {
    2
}

const fn default_repeat_interval_secs() -> u64 {
    3600
}

const fn default_recovery_notify() -> bool {
    true
}

fn default_bot_token_env() -> String {
    "TELEGRAM_BOT_TOKEN".to_string()
}

const fn default_rate_limit_per_minute() -> u32 {
    20
}

fn default_webhook_url_env() -> String {
    "DISCORD_WEBHOOK_URL".to_string()
}

#[cfg(test)]
pub(crate) fn test_config(ip_address: &str) -> Config {
    Config {
        listen: "127.0.0.1:9110".to_string(),
        interval_secs: 300,
        miner: MinerConfig {
            ip_address: ip_address.to_string(),
            username: default_username(),
            password: Some("secret".to_string()),
            password_env: "BOBCATD_TEST_UNSET_PASSWORD".to_string(),
            request_timeout_secs: 5,
            retry: RetryConfig {
                initial_delay_ms: 10,
                max_delay_secs: 1,
                multiplier: 2.0,
                max_elapsed_secs: 1,
            },
        },
        thresholds: Thresholds::default(),
        autopilot: AutopilotConfig {
            dry_run: false,
            action_cooldown_secs: 0,
        },
        alerts: AlertsConfig::default(),
        log: LogConfig::default(),
        telegram: TelegramConfig::default(),
        discord: DiscordConfig::default(),
    }
}

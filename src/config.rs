use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AppError, Result};

const APP_DIR: &str = "feed-relay";
const TOKEN_ENV: &str = "DISCORD_BOT_TOKEN";

/// How a notification is laid out in the destination channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStyle {
    #[default]
    Embed,
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    pub discord_token: Option<String>,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_minutes: u32,

    /// Entries published this long before they were first seen are recorded
    /// but not announced. Zero disables the filter.
    #[serde(default = "default_freshness_window")]
    pub freshness_window_hours: u32,

    #[serde(default = "default_delivery_retry")]
    pub delivery_retry_hours: u32,

    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default)]
    pub delivery_style: DeliveryStyle,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR);
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("feeds.db").to_string_lossy().to_string()
}

fn default_poll_interval() -> u32 {
    5
}

fn default_freshness_window() -> u32 {
    12
}

fn default_delivery_retry() -> u32 {
    24
}

fn default_max_concurrent_fetches() -> usize {
    5
}

fn default_user_agent() -> String {
    format!("{}/{}", APP_DIR, env!("CARGO_PKG_VERSION"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            discord_token: None,
            poll_interval_minutes: default_poll_interval(),
            freshness_window_hours: default_freshness_window(),
            delivery_retry_hours: default_delivery_retry(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            user_agent: default_user_agent(),
            delivery_style: DeliveryStyle::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str::<Config>(&content)?
        } else {
            let config = Config::default();
            config.save()?;
            config
        };

        if let Ok(token) = std::env::var(TOKEN_ENV) {
            if !token.trim().is_empty() {
                config.discord_token = Some(token);
            }
        }

        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }

    pub fn discord_token(&self) -> Result<&str> {
        self.discord_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                AppError::Config(format!(
                    "no Discord token: set {} or discord_token in {}",
                    TOKEN_ENV,
                    Self::config_path().display()
                ))
            })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.poll_interval_minutes.max(1)) * 60)
    }

    pub fn freshness_window(&self) -> Option<chrono::Duration> {
        match self.freshness_window_hours {
            0 => None,
            hours => Some(chrono::Duration::hours(i64::from(hours))),
        }
    }

    pub fn delivery_retry_window(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.delivery_retry_hours.max(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let config: Config = toml::from_str("discord_token = \"abc\"\n").unwrap();
        assert_eq!(config.poll_interval_minutes, 5);
        assert_eq!(config.freshness_window_hours, 12);
        assert_eq!(config.max_concurrent_fetches, 5);
        assert_eq!(config.delivery_style, DeliveryStyle::Embed);
        assert_eq!(config.discord_token().unwrap(), "abc");
    }

    #[test]
    fn zero_freshness_window_disables_filter() {
        let config: Config =
            toml::from_str("freshness_window_hours = 0\ndelivery_style = \"text\"\n").unwrap();
        assert!(config.freshness_window().is_none());
        assert_eq!(config.delivery_style, DeliveryStyle::Text);
    }

    #[test]
    fn blank_token_is_a_config_error() {
        let config = Config {
            discord_token: Some("  ".to_string()),
            ..Config::default()
        };
        assert!(matches!(config.discord_token(), Err(AppError::Config(_))));
    }
}

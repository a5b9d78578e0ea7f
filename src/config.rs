use std::{collections::HashMap, fmt, path::Path};

use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use reqwest::Url;
use serde::Deserialize;

use crate::models::{retry::RetryConfig, routing::ChannelAction};

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DecodeFailurePolicy {
    /// Log the payload, acknowledge it and move on.
    #[default]
    Skip,
    /// Stop consuming and leave the message for redelivery.
    Abort,
}

#[derive(Clone, Deserialize)]
pub struct Config {
    pub rabbitmq_host: String,
    pub rabbitmq_port: u16,
    pub rabbitmq_user: String,
    pub rabbitmq_password: String,
    #[serde(default = "default_vhost")]
    pub rabbitmq_vhost: String,
    pub queue_name: String,
    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: u16,

    pub app_host: String,
    pub bot_token: String,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,

    pub channel_actions: String,

    #[serde(default = "default_mention_lookup_concurrency")]
    pub mention_lookup_concurrency: usize,
    #[serde(default)]
    pub decode_failure_policy: DecodeFailurePolicy,
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: u64,

    #[serde(default = "default_server_port")]
    pub server_port: u16,
}

fn default_vhost() -> String {
    "/".to_string()
}

fn default_prefetch_count() -> u16 {
    1
}

fn default_http_timeout_seconds() -> u64 {
    10
}

fn default_mention_lookup_concurrency() -> usize {
    1
}

fn default_shutdown_grace_seconds() -> u64 {
    10
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_initial_retry_delay_ms() -> u64 {
    200
}

fn default_max_retry_delay_ms() -> u64 {
    5_000
}

fn default_retry_backoff_multiplier() -> u64 {
    2
}

fn default_server_port() -> u16 {
    8080
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;

        config.channel_actions()?;

        Ok(config)
    }

    /// Like `load`, but values from `.env` win over the current environment so
    /// that edits to the file are picked up by a running process. The process
    /// environment itself is left untouched.
    pub fn reload() -> Result<Self, Error> {
        Self::from_layers(std::env::vars(), Path::new(".env"))
    }

    /// Builds a config from `base` with the entries of `dotenv_path` layered on
    /// top. A missing file leaves `base` as is.
    pub fn from_layers<I>(base: I, dotenv_path: &Path) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut vars: HashMap<String, String> = base.into_iter().collect();

        match dotenvy::from_path_iter(dotenv_path) {
            Ok(entries) => {
                for entry in entries {
                    let (key, value) = entry.map_err(|e| {
                        anyhow!("Failed to read {}: {}", dotenv_path.display(), e)
                    })?;
                    vars.insert(key, value);
                }
            }
            Err(e) if e.not_found() => {}
            Err(e) => return Err(anyhow!("Failed to read {}: {}", dotenv_path.display(), e)),
        }

        let config = envy::from_iter::<_, Self>(vars)
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;

        config.channel_actions()?;

        Ok(config)
    }

    /// Parses the `CHANNEL_ACTIONS` JSON list of action to channel-name pairs.
    pub fn channel_actions(&self) -> Result<Vec<ChannelAction>, Error> {
        serde_json::from_str(&self.channel_actions)
            .map_err(|e| anyhow!("CHANNEL_ACTIONS is not a valid action list: {}", e))
    }

    pub fn amqp_url(&self) -> Result<String, Error> {
        let mut url = Url::parse(&format!(
            "amqp://{}:{}",
            self.rabbitmq_host, self.rabbitmq_port
        ))
        .map_err(|e| anyhow!("Invalid RabbitMQ host: {}", e))?;

        url.set_username(&self.rabbitmq_user)
            .map_err(|_| anyhow!("Invalid RabbitMQ user"))?;
        url.set_password(Some(&self.rabbitmq_password))
            .map_err(|_| anyhow!("Invalid RabbitMQ password"))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("Invalid RabbitMQ host"))?
            .clear()
            .push(&self.rabbitmq_vhost);

        Ok(url.to_string())
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retry_attempts,
            initial_delay_ms: self.initial_retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
            backoff_multiplier: self.retry_backoff_multiplier,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("rabbitmq_host", &self.rabbitmq_host)
            .field("rabbitmq_port", &self.rabbitmq_port)
            .field("rabbitmq_user", &self.rabbitmq_user)
            .field("rabbitmq_password", &"[REDACTED]")
            .field("rabbitmq_vhost", &self.rabbitmq_vhost)
            .field("queue_name", &self.queue_name)
            .field("prefetch_count", &self.prefetch_count)
            .field("app_host", &self.app_host)
            .field("bot_token", &"[REDACTED]")
            .field("http_timeout_seconds", &self.http_timeout_seconds)
            .field("channel_actions", &self.channel_actions)
            .field("mention_lookup_concurrency", &self.mention_lookup_concurrency)
            .field("decode_failure_policy", &self.decode_failure_policy)
            .field("shutdown_grace_seconds", &self.shutdown_grace_seconds)
            .field("server_port", &self.server_port)
            .finish_non_exhaustive()
    }
}

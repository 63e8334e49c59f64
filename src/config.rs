use std::time::Duration;

use crate::error::{Error, Result};

const DEFAULT_PORT: u16 = 10000;
const DEFAULT_HOST: &str = "0.0.0.0";

/// Delays and thresholds of the session lifecycle.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// A resolved URL is reused only while its expiry is further away than this.
    pub expiry_margin: Duration,
    /// Wait after the stream died before its URL expired.
    pub early_retry_delay: Duration,
    /// Wait after the stream ended with an expired (or unknown) URL.
    pub expired_retry_delay: Duration,
    /// Wait after the resolver produced no URL.
    pub resolve_retry_delay: Duration,
    pub watchdog_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            expiry_margin: Duration::from_secs(10),
            early_retry_delay: Duration::from_secs(10),
            expired_retry_delay: Duration::from_secs(1),
            resolve_retry_delay: Duration::from_secs(10),
            watchdog_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub discord_token: String,
    pub http_port: u16,
    pub bind_host: String,
    pub streamlink_program: String,
    pub stream_quality: String,
    pub ffmpeg_program: String,
    pub resolver_timeout: Option<Duration>,
    pub bot_start_delay: Duration,
    pub policy: RetryPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let discord_token = var("DISCORD_TOKEN").ok_or(Error::MissingEnv("DISCORD_TOKEN"))?;

        let http_port = match var("PORT") {
            Some(value) => parse_number("PORT", &value)?,
            None => DEFAULT_PORT,
        };

        let resolver_timeout = var("RESOLVER_TIMEOUT_SECS")
            .map(|value| parse_number("RESOLVER_TIMEOUT_SECS", &value).map(Duration::from_secs))
            .transpose()?;

        let bot_start_delay = match var("BOT_START_DELAY_SECS") {
            Some(value) => Duration::from_secs(parse_number("BOT_START_DELAY_SECS", &value)?),
            None => Duration::from_secs(2),
        };

        Ok(Config {
            discord_token,
            http_port,
            bind_host: var("BASE_URL").unwrap_or_else(|| DEFAULT_HOST.to_owned()),
            streamlink_program: var("STREAMLINK_BIN").unwrap_or_else(|| "streamlink".to_owned()),
            stream_quality: var("STREAM_QUALITY").unwrap_or_else(|| "best".to_owned()),
            ffmpeg_program: var("FFMPEG_BIN").unwrap_or_else(|| "ffmpeg".to_owned()),
            resolver_timeout,
            bot_start_delay,
            policy: RetryPolicy::default(),
        })
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| Error::InvalidEnv {
        key,
        value: value.to_owned(),
    })
}

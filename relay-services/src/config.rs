//! Relay configuration
//!
//! Every tunable is read from the environment and falls back to a default.

use std::env;
use std::time::Duration;

use relay_binance::{BINANCE_REST_BASE, BINANCE_WS_BASE};

/// Reconnect / backoff tunables for the upstream supervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// First reconnect delay; doubles per consecutive failure
    pub base_delay: Duration,
    /// Ceiling for the reconnect delay
    pub max_delay: Duration,
    /// Connected this long and the backoff starts over from `base_delay`
    pub reset_after: Duration,
    /// Consecutive failed attempts before the upstream is reported unavailable.
    /// Retries continue regardless.
    pub unavailable_after: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            reset_after: Duration::from_secs(60),
            unavailable_after: 5,
        }
    }
}

/// Full relay configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub upstream_url: String,
    pub rest_url: String,
    pub reconnect: ReconnectConfig,
    pub upstream_ping_interval: Duration,
    pub upstream_pong_timeout: Duration,
    pub client_ping_interval: Duration,
    pub client_pong_timeout: Duration,
    /// Capacity of each consumer's outbound queue
    pub consumer_queue: usize,
    pub poll_interval: Duration,
    /// No message for this long marks the upstream (or a stream) stale
    pub stale_after: Duration,
    /// Most stream names carried by one control frame
    pub max_streams_per_frame: usize,
    pub server_port: u16,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            upstream_url: BINANCE_WS_BASE.to_string(),
            rest_url: BINANCE_REST_BASE.to_string(),
            reconnect: ReconnectConfig::default(),
            upstream_ping_interval: Duration::from_secs(30),
            upstream_pong_timeout: Duration::from_secs(10),
            client_ping_interval: Duration::from_secs(30),
            client_pong_timeout: Duration::from_secs(10),
            consumer_queue: 256,
            poll_interval: Duration::from_millis(2000),
            stale_after: Duration::from_secs(60),
            max_streams_per_frame: 200,
            server_port: 3001,
        }
    }
}

impl RelayConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let vars = Vars { lookup: &lookup };

        Ok(Self {
            upstream_url: vars.string("RELAY_UPSTREAM_URL", defaults.upstream_url)?,
            rest_url: vars.string("RELAY_REST_URL", defaults.rest_url)?,
            reconnect: ReconnectConfig {
                base_delay: vars.millis("RELAY_RECONNECT_BASE_MS", defaults.reconnect.base_delay)?,
                max_delay: vars.millis("RELAY_RECONNECT_MAX_MS", defaults.reconnect.max_delay)?,
                reset_after: vars.secs("RELAY_BACKOFF_RESET_SECS", defaults.reconnect.reset_after)?,
                unavailable_after: vars.number(
                    "RELAY_UNAVAILABLE_AFTER",
                    defaults.reconnect.unavailable_after,
                )?,
            },
            upstream_ping_interval: vars
                .secs("RELAY_UPSTREAM_PING_SECS", defaults.upstream_ping_interval)?,
            upstream_pong_timeout: vars
                .secs("RELAY_UPSTREAM_PONG_TIMEOUT_SECS", defaults.upstream_pong_timeout)?,
            client_ping_interval: vars
                .secs("RELAY_CLIENT_PING_SECS", defaults.client_ping_interval)?,
            client_pong_timeout: vars
                .secs("RELAY_CLIENT_PONG_TIMEOUT_SECS", defaults.client_pong_timeout)?,
            consumer_queue: vars.number("RELAY_CONSUMER_QUEUE", defaults.consumer_queue)?,
            poll_interval: vars.millis("RELAY_POLL_INTERVAL_MS", defaults.poll_interval)?,
            stale_after: vars.secs("RELAY_STALE_SECS", defaults.stale_after)?,
            max_streams_per_frame: vars
                .number("RELAY_MAX_STREAMS_PER_FRAME", defaults.max_streams_per_frame)?,
            server_port: vars.number("SERVER_PORT", defaults.server_port)?,
        })
    }
}

struct Vars<'a, F> {
    lookup: &'a F,
}

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str, default: String) -> Result<String, ConfigError> {
        match (self.lookup)(name) {
            Some(value) if value.trim().is_empty() => Err(ConfigError::invalid(name, value, "must not be empty")),
            Some(value) => Ok(value.trim().to_string()),
            None => Ok(default),
        }
    }

    fn number<T>(&self, name: &str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr + PartialEq + Default,
    {
        let Some(raw) = (self.lookup)(name) else {
            return Ok(default);
        };
        let value: T = raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::invalid(name, raw.clone(), "not a valid number"))?;
        if value == T::default() {
            return Err(ConfigError::invalid(name, raw, "must be greater than zero"));
        }
        Ok(value)
    }

    fn millis(&self, name: &str, default: Duration) -> Result<Duration, ConfigError> {
        let ms = self.number(name, default.as_millis() as u64)?;
        Ok(Duration::from_millis(ms))
    }

    fn secs(&self, name: &str, default: Duration) -> Result<Duration, ConfigError> {
        let secs = self.number(name, default.as_secs())?;
        Ok(Duration::from_secs(secs))
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {var}: {reason}")]
    Invalid {
        var: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(var: &str, value: impl Into<String>, reason: &str) -> Self {
        ConfigError::Invalid {
            var: var.to_string(),
            value: value.into(),
            reason: reason.to_string(),
        }
    }
}

//! Runtime configuration parsed from environment variables.
//!
//! Every key is optional. Numeric keys that are present but unparsable are
//! rejected instead of silently falling back, so a typo in `TCP_PORT` fails
//! at startup rather than binding somewhere unexpected.

use std::str::FromStr;
use std::time::Duration;

use frames::{CipherMode, KeyMaterial};

use crate::error::ConfigError;

pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";
pub const DEFAULT_HTTP_PORT: u16 = 9091;
pub const DEFAULT_TCP_PORT: u16 = 9000;
pub const DEFAULT_PORT_RETRY_LIMIT: u16 = 10;
pub const DEFAULT_SECRET_KEY: &str = "sentinelvpn-dev-key";
pub const DEFAULT_SECRET_IV: &str = "sentinelvpn-dev-iv";
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_RELAY_RECONNECT_MS: u64 = 3000;
pub const DEFAULT_RELAY_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_LIVENESS_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_SUBSCRIBER_QUEUE: usize = 256;

/// What the ingest listener writes back for each decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IngestMode {
    /// Encrypted `{ok, receivedBytes, at}` acknowledgement.
    #[default]
    Ack,
    /// Treat the plaintext as a URL and write back the fetched body.
    Fetch,
}

impl FromStr for IngestMode {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ack" => Ok(Self::Ack),
            "fetch" => Ok(Self::Fetch),
            other => Err(ConfigError::IngestMode(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_host: String,
    pub http_port: u16,
    pub tcp_port: u16,
    /// Extra ports tried above each requested port when it is in use.
    pub port_retry_limit: u16,
    pub keys: KeyMaterial,
    pub cipher_mode: CipherMode,
    pub ingest_mode: IngestMode,
    pub fetch_timeout: Duration,
    /// Set for the second tier; `None` runs the TCP ingest listener instead.
    pub upstream_url: Option<String>,
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
    pub liveness_interval: Duration,
    pub subscriber_queue: usize,
}

impl Config {
    /// Read configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for unparsable numbers, a zero interval or
    /// timeout, unknown modes, or a non-websocket `UPSTREAM_URL`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`, which maps a key to its raw value.
    ///
    /// # Errors
    ///
    /// See [`Config::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let text = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_owned())
        };

        let keys = KeyMaterial::derive(
            &text("SECRET_KEY", DEFAULT_SECRET_KEY),
            &text("SECRET_IV", DEFAULT_SECRET_IV),
        );
        let cipher_mode = match lookup("CIPHER_MODE") {
            Some(raw) if !raw.trim().is_empty() => raw.parse::<CipherMode>()?,
            _ => CipherMode::default(),
        };
        let ingest_mode = match lookup("INGEST_MODE") {
            Some(raw) if !raw.trim().is_empty() => raw.parse::<IngestMode>()?,
            _ => IngestMode::default(),
        };
        let upstream_url = lookup("UPSTREAM_URL")
            .map(|raw| raw.trim().to_owned())
            .filter(|url| !url.is_empty())
            .map(validate_upstream)
            .transpose()?;

        Ok(Self {
            bind_host: text("BIND_HOST", DEFAULT_BIND_HOST),
            http_port: parse_num(&lookup, "HTTP_PORT", DEFAULT_HTTP_PORT)?,
            tcp_port: parse_num(&lookup, "TCP_PORT", DEFAULT_TCP_PORT)?,
            port_retry_limit: parse_num(&lookup, "PORT_RETRY_LIMIT", DEFAULT_PORT_RETRY_LIMIT)?,
            keys,
            cipher_mode,
            ingest_mode,
            fetch_timeout: parse_secs(&lookup, "FETCH_TIMEOUT_SECS", DEFAULT_FETCH_TIMEOUT_SECS)?,
            upstream_url,
            reconnect_delay: Duration::from_millis(parse_num(
                &lookup,
                "RELAY_RECONNECT_MS",
                DEFAULT_RELAY_RECONNECT_MS,
            )?),
            connect_timeout: parse_secs(&lookup, "RELAY_CONNECT_TIMEOUT_SECS", DEFAULT_RELAY_CONNECT_TIMEOUT_SECS)?,
            liveness_interval: parse_secs(&lookup, "LIVENESS_INTERVAL_SECS", DEFAULT_LIVENESS_INTERVAL_SECS)?,
            subscriber_queue: parse_num(&lookup, "SUBSCRIBER_QUEUE", DEFAULT_SUBSCRIBER_QUEUE)?.max(1),
        })
    }

    /// Whether this process relays an upstream hub instead of ingesting TCP.
    #[must_use]
    pub fn is_relay(&self) -> bool {
        self.upstream_url.is_some()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_host: DEFAULT_BIND_HOST.to_owned(),
            http_port: DEFAULT_HTTP_PORT,
            tcp_port: DEFAULT_TCP_PORT,
            port_retry_limit: DEFAULT_PORT_RETRY_LIMIT,
            keys: KeyMaterial::derive(DEFAULT_SECRET_KEY, DEFAULT_SECRET_IV),
            cipher_mode: CipherMode::default(),
            ingest_mode: IngestMode::default(),
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            upstream_url: None,
            reconnect_delay: Duration::from_millis(DEFAULT_RELAY_RECONNECT_MS),
            connect_timeout: Duration::from_secs(DEFAULT_RELAY_CONNECT_TIMEOUT_SECS),
            liveness_interval: Duration::from_secs(DEFAULT_LIVENESS_INTERVAL_SECS),
            subscriber_queue: DEFAULT_SUBSCRIBER_QUEUE,
        }
    }
}

fn parse_num<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { key, value: raw }),
    }
}

/// A whole number of seconds. Zero is rejected: these feed timers and
/// timeouts where a zero period either panics or fails every call.
fn parse_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: u64,
) -> Result<Duration, ConfigError> {
    match parse_num(lookup, key, default)? {
        0 => Err(ConfigError::Zero { key }),
        secs => Ok(Duration::from_secs(secs)),
    }
}

fn validate_upstream(url: String) -> Result<String, ConfigError> {
    let lower = url.to_ascii_lowercase();
    if (lower.starts_with("ws://") || lower.starts_with("wss://")) && !url.contains(char::is_whitespace) {
        Ok(url)
    } else {
        Err(ConfigError::UpstreamUrl(url))
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

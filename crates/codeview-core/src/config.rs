//! Client tunables.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_RECONNECT_BASE_MS: u64 = 1000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_EVENT_HISTORY: usize = 256;

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

/// Tunables for reconnection, requests and event history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base delay of the reconnection backoff, in milliseconds.
    pub reconnect_base_ms: u64,
    /// Ceiling on a single reconnection delay.
    pub max_reconnect_delay_ms: Option<u64>,
    /// Per-request timeout. `None` waits until the channel closes.
    pub request_timeout_ms: Option<u64>,
    /// Status events retained for late subscribers.
    pub event_history: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnect_base_ms: DEFAULT_RECONNECT_BASE_MS,
            max_reconnect_delay_ms: None,
            request_timeout_ms: Some(DEFAULT_REQUEST_TIMEOUT_MS),
            event_history: DEFAULT_EVENT_HISTORY,
        }
    }
}

impl ClientConfig {
    /// Defaults overlaid with `CODEVIEW_*` environment variables.
    ///
    /// An empty `CODEVIEW_REQUEST_TIMEOUT_MS` or `CODEVIEW_MAX_RECONNECT_DELAY_MS`
    /// clears the setting.
    ///
    /// # Errors
    /// Returns error if a variable is set but not a number.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`ClientConfig::from_env`], reading variables through `lookup`.
    ///
    /// # Errors
    /// Returns error if a variable is set but not a number.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = lookup("CODEVIEW_RECONNECT_BASE_MS") {
            config.reconnect_base_ms = parse("CODEVIEW_RECONNECT_BASE_MS", &v)?;
        }
        if let Some(v) = lookup("CODEVIEW_MAX_RECONNECT_DELAY_MS") {
            config.max_reconnect_delay_ms = parse_optional("CODEVIEW_MAX_RECONNECT_DELAY_MS", &v)?;
        }
        if let Some(v) = lookup("CODEVIEW_REQUEST_TIMEOUT_MS") {
            config.request_timeout_ms = parse_optional("CODEVIEW_REQUEST_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("CODEVIEW_EVENT_HISTORY") {
            config.event_history = parse("CODEVIEW_EVENT_HISTORY", &v)?;
        }

        Ok(config)
    }

    #[must_use]
    pub const fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_ms)
    }

    #[must_use]
    pub fn max_reconnect_delay(&self) -> Option<Duration> {
        self.max_reconnect_delay_ms.map(Duration::from_millis)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_owned(),
    })
}

fn parse_optional<T: std::str::FromStr>(
    key: &'static str,
    value: &str,
) -> Result<Option<T>, ConfigError> {
    if value.trim().is_empty() {
        Ok(None)
    } else {
        parse(key, value).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.reconnect_base(), Duration::from_secs(1));
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_env_overrides() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("CODEVIEW_RECONNECT_BASE_MS", "250"),
            ("CODEVIEW_REQUEST_TIMEOUT_MS", ""),
            ("CODEVIEW_MAX_RECONNECT_DELAY_MS", "60000"),
        ]))
        .unwrap();

        assert_eq!(config.reconnect_base_ms, 250);
        assert_eq!(config.request_timeout(), None);
        assert_eq!(config.max_reconnect_delay(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_invalid_value() {
        let err = ClientConfig::from_lookup(lookup(&[("CODEVIEW_EVENT_HISTORY", "lots")])).unwrap_err();
        assert!(err.to_string().contains("CODEVIEW_EVENT_HISTORY"));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: ClientConfig = serde_json::from_str(r#"{"reconnect_base_ms": 10}"#).unwrap();
        assert_eq!(config.reconnect_base_ms, 10);
        assert_eq!(config.event_history, 256);
    }
}

//! Client configuration.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::ConfigError;
use crate::sse::SseConfig;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000/api";

/// Bearer token. Never printed.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken([REDACTED])")
    }
}

/// Settings for [`AgentApiClient`](crate::AgentApiClient), the SSE transport
/// and the polling reconciler. Every key is optional in TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunStreamConfig {
    pub base_url: String,
    pub auth_token: Option<AuthToken>,
    pub request_timeout_secs: u64,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    /// 0 = unlimited.
    pub max_reconnect_attempts: u32,
    pub poll_interval_ms: u64,
    pub user_agent: String,
}

impl Default for RunStreamConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            auth_token: None,
            request_timeout_secs: 30,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 30_000,
            max_reconnect_attempts: 0,
            poll_interval_ms: 2_000,
            user_agent: format!("maestro-run-stream/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl RunStreamConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(AuthToken::new(token));
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.parsed_base_url()?;
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.reconnect_base_delay_ms > self.reconnect_max_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "reconnect_base_delay_ms ({}) exceeds reconnect_max_delay_ms ({})",
                self.reconnect_base_delay_ms, self.reconnect_max_delay_ms
            )));
        }
        Ok(())
    }

    /// Base URL with a trailing slash, so relative joins keep its path.
    pub fn parsed_base_url(&self) -> Result<Url, ConfigError> {
        let mut raw = self.base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let url = Url::parse(&raw)
            .map_err(|e| ConfigError::Invalid(format!("base_url {:?}: {e}", self.base_url)))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ConfigError::Invalid(format!(
                "base_url must be http or https, got {other}"
            ))),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn sse_config(&self) -> SseConfig {
        SseConfig {
            reconnect_base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
            reconnect_max_delay: Duration::from_millis(self.reconnect_max_delay_ms),
            max_reconnect_attempts: self.max_reconnect_attempts,
            use_exponential_backoff: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = RunStreamConfig::from_toml_str("").unwrap();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.sse_config(), SseConfig::default());
        assert!(config.auth_token.is_none());
    }

    #[test]
    fn toml_overrides() {
        let config = RunStreamConfig::from_toml_str(
            r#"
            base_url = "https://agents.example.com/api"
            auth_token = "sekrit"
            max_reconnect_attempts = 5
            poll_interval_ms = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.base_url, "https://agents.example.com/api");
        assert_eq!(config.auth_token.as_ref().map(AuthToken::expose), Some("sekrit"));
        assert_eq!(config.sse_config().max_reconnect_attempts, 5);
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
    }

    #[test]
    fn token_is_redacted_in_debug() {
        let config = RunStreamConfig::default().with_auth_token("sekrit");
        let debug = format!("{config:?}");
        assert!(!debug.contains("sekrit"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn base_url_gains_trailing_slash() {
        let url = RunStreamConfig::default()
            .with_base_url("http://localhost:8000/api")
            .parsed_base_url()
            .unwrap();
        assert_eq!(url.join("agent-run/r1").unwrap().as_str(), "http://localhost:8000/api/agent-run/r1");
    }

    #[test]
    fn rejects_bad_values() {
        assert!(RunStreamConfig::from_toml_str(r#"base_url = "ftp://x""#).is_err());
        assert!(RunStreamConfig::from_toml_str("poll_interval_ms = 0").is_err());
        assert!(RunStreamConfig::from_toml_str(
            "reconnect_base_delay_ms = 5000\nreconnect_max_delay_ms = 10"
        )
        .is_err());
        assert!(matches!(
            RunStreamConfig::from_toml_str("poll_interval_ms = \"fast\""),
            Err(ConfigError::Parse(_))
        ));
    }
}

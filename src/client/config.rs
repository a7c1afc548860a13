//! Client configuration and transport-mode selection.
//!
//! The configuration is immutable once the client is constructed. Validation
//! happens up front: an invalid or empty endpoint fails construction and no
//! partial client is ever returned.

use std::time::Duration;

use reqwest::Url;

use crate::cache::CacheConfig;
use crate::error::{LinkError, Result};

/// Username/password pair for the hybrid mode's authentication exchange.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Absolute http/https URL of the game server.
    pub base_url: String,
    /// Static key for the keyed-HTTP transport. Takes precedence over
    /// `credentials` when both are set.
    pub api_key: Option<String>,
    /// Login credentials for hybrid mode.
    pub credentials: Option<Credentials>,
    /// Fixed per-request timeout. Timed-out calls fail and are classified as
    /// transient by the retry executor.
    pub request_timeout: Duration,
    /// Retries after the first attempt.
    pub retry_attempts: u32,
    /// Backoff base delay; doubles per retry.
    pub retry_base_delay: Duration,
    /// Path of the streaming channel relative to `base_url`.
    pub socket_path: String,
    pub cache: CacheConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: None,
            credentials: None,
            request_timeout: Duration::from_secs(30),
            retry_attempts: 3,
            retry_base_delay: Duration::from_millis(1000),
            socket_path: "/stream".to_string(),
            cache: CacheConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Check that the endpoint is a syntactically valid absolute http/https
    /// URL.
    pub(crate) fn validate(&self) -> Result<Url> {
        let trimmed = self.base_url.trim();
        if trimmed.is_empty() {
            return Err(LinkError::Config("base URL must not be empty".to_string()));
        }
        let url = Url::parse(trimmed)
            .map_err(|err| LinkError::Config(format!("invalid base URL '{trimmed}': {err}")))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(LinkError::Config(format!(
                "base URL must use http or https, got '{other}'"
            ))),
        }
    }
}

/// Which transport this client uses, fixed for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// Request/response HTTP authenticated by a static key header.
    Keyed,
    /// Streaming channel plus a username/password login exchange.
    Hybrid,
    /// Plain streaming channel, no HTTP credential.
    Socket,
}

impl TransportMode {
    /// Resolve the mode from which credentials are present.
    pub fn from_config(config: &ClientConfig) -> Self {
        if config.api_key.is_some() {
            TransportMode::Keyed
        } else if config.credentials.is_some() {
            TransportMode::Hybrid
        } else {
            TransportMode::Socket
        }
    }
}

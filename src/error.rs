//! Error taxonomy shared by the transport, cache, and retry layers.
//!
//! The retry executor only looks at [`LinkError::status`] and
//! [`LinkError::is_retryable`]; everything else is surfaced to callers so
//! they can distinguish "doesn't exist" from "couldn't reach server" from
//! "unauthorized".

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    /// Invalid or missing configuration at construction. Fatal; no partial
    /// client is ever produced.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The server rejected the active credential. Clears connected state.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Mapped from a 404 so callers can tell a missing entity apart from a
    /// transport failure.
    #[error("not found: {0}")]
    NotFound(String),

    /// Any other HTTP error status.
    #[error("server returned {status}: {message}")]
    Http { status: u16, message: String },

    /// Network-level failure or request timeout.
    #[error("transport error: {0}")]
    Transport(String),

    /// The operation needs the keyed HTTP channel and this client does not
    /// have one.
    #[error("keyed transport unavailable: {0}")]
    TransportUnavailable(String),

    /// The fallback dice parser rejected a formula.
    #[error("invalid dice formula: {0}")]
    InvalidFormula(String),

    /// Malformed payload in an otherwise successful response.
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl LinkError {
    /// HTTP-like status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            LinkError::Unauthorized(_) => Some(401),
            LinkError::NotFound(_) => Some(404),
            LinkError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the retry executor may attempt this operation again.
    ///
    /// A 4xx status is a caller mistake and retrying cannot fix it, with the
    /// one exception of 429 (rate limited), which is transient. Network
    /// failures, timeouts, and 5xx responses are all transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            LinkError::Transport(_) => true,
            LinkError::Config(_)
            | LinkError::TransportUnavailable(_)
            | LinkError::InvalidFormula(_)
            | LinkError::Decode(_) => false,
            _ => match self.status() {
                Some(429) => true,
                Some(status) if (400..500).contains(&status) => false,
                _ => true,
            },
        }
    }
}

impl From<reqwest::Error> for LinkError {
    fn from(err: reqwest::Error) -> Self {
        LinkError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for LinkError {
    fn from(err: serde_json::Error) -> Self {
        LinkError::Decode(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;

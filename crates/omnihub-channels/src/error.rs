use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    /// Bad credentials, missing config, invalid template, signature
    /// mismatch. Never retried; webhooks answer 4xx.
    #[error("validation error: {0}")]
    Validation(String),

    /// 429, 5xx, or a network failure. Retried with backoff.
    #[error("transient provider error ({status:?}): {message}")]
    Transient {
        status: Option<u16>,
        message: String,
        retry_after: Option<Duration>,
    },

    /// Non-429 4xx or a schema mismatch. Surfaced as failed, no retry.
    #[error("permanent provider error ({status}): {message}")]
    Permanent { status: u16, message: String },

    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    #[error("operation not supported by this adapter: {operation}")]
    NotSupported { operation: &'static str },

    /// The WhatsApp 24h session window has expired for this contact.
    #[error("session window expired")]
    SessionExpired,

    #[error("adapter '{adapter}' is disconnected")]
    Disconnected { adapter: String },

    #[error("response parse error: {0}")]
    Parse(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for ChannelError {
    fn from(e: reqwest::Error) -> Self {
        // Connect/timeout errors are transient; a body/decode failure is a
        // schema mismatch and therefore permanent.
        if e.is_timeout() || e.is_connect() || e.is_request() {
            ChannelError::Transient {
                status: e.status().map(|s| s.as_u16()),
                message: e.to_string(),
                retry_after: None,
            }
        } else {
            ChannelError::Parse(e.to_string())
        }
    }
}

impl ChannelError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChannelError::Transient { .. } | ChannelError::Disconnected { .. }
        )
    }

    /// Classify an HTTP response status the way the retry loop expects.
    pub fn from_status(status: u16, message: String, retry_after: Option<Duration>) -> Self {
        if status == 429 || status >= 500 {
            ChannelError::Transient {
                status: Some(status),
                message,
                retry_after,
            }
        } else {
            ChannelError::Permanent { status, message }
        }
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(ChannelError::from_status(429, "rl".into(), None).is_retryable());
        assert!(ChannelError::from_status(503, "down".into(), None).is_retryable());
        assert!(!ChannelError::from_status(400, "bad".into(), None).is_retryable());
        assert!(!ChannelError::from_status(404, "gone".into(), None).is_retryable());
    }
}

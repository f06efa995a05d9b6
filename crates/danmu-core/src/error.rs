//! Error taxonomy shared by every danmu crate.

use thiserror::Error;

/// A stream configuration that can never produce a working session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unsupported stream url: {url}")]
    UnsupportedUrl { url: String },

    #[error("malformed stream url '{url}': {reason}")]
    MalformedUrl { url: String, reason: String },

    #[error("invalid schedule '{expr}': {reason}")]
    InvalidSchedule { expr: String, reason: String },
}

/// Errors raised by a platform adapter outside of frame decoding.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The stream identity (room id etc.) has not been resolved yet.
    #[error("identity unresolved: {0}")]
    Identity(String),

    #[error("HTTP error: {0}")]
    Http(String),

    /// The platform answered, but not with anything we understand.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error(transparent)]
    Sign(#[from] SignError),
}

impl AdapterError {
    /// Returns `true` if retrying later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Identity(_) | Self::Sign(_))
    }
}

/// Errors decoding a single inbound frame. The frame is skipped.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Frame(String),

    #[error("decompression failed: {0}")]
    Decompress(String),

    #[error("malformed payload for {method}: {reason}")]
    Payload { method: String, reason: String },

    /// The session stopped consuming events while the frame was decoded.
    #[error("event sink closed")]
    SinkClosed,
}

/// Errors on the live connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("write failed: {0}")]
    Write(String),

    #[error("read failed: {0}")]
    Read(String),

    #[error("operation timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// No connection handle is held (never connected, torn down or stopped).
    #[error("connection not available")]
    NotAvailable,

    #[error("connection closed: {0}")]
    Closed(String),
}

impl ConnectionError {
    /// Returns `true` if a reconnect could recover from this error.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::NotAvailable)
    }
}

/// A handler failed to process one event.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("handler '{handler}' failed: {reason}")]
    Failed { handler: String, reason: String },

    #[error("handler '{handler}' panicked: {message}")]
    Panicked { handler: String, message: String },

    #[error("handler setup failed: {0}")]
    Setup(String),
}

impl HandlerError {
    pub fn failed(handler: impl Into<String>, reason: impl ToString) -> Self {
        Self::Failed {
            handler: handler.into(),
            reason: reason.to_string(),
        }
    }
}

/// Signature capability failures.
#[derive(Debug, Error)]
pub enum SignError {
    #[error("signer unavailable: {0}")]
    Unavailable(String),

    #[error("signer produced no output")]
    Empty,
}

/// Errors loading stream configurations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error in {path}: {reason}")]
    Parse { path: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_available_is_terminal() {
        assert!(!ConnectionError::NotAvailable.is_retryable());
        assert!(ConnectionError::Timeout { ms: 8000 }.is_retryable());
        assert!(ConnectionError::Write("broken pipe".into()).is_retryable());
    }

    #[test]
    fn messages_render() {
        assert_eq!(
            ConnectionError::NotAvailable.to_string(),
            "connection not available"
        );
        let e = AdapterError::from(ConfigError::UnsupportedUrl {
            url: "https://example.com/1".into(),
        });
        assert_eq!(e.to_string(), "unsupported stream url: https://example.com/1");
        assert!(!e.is_transient());
    }
}

//! Error types for the hitbtc-replica crate.
//!
//! Errors never reach book readers: a failed transport only makes the replica
//! stale, and a malformed message is dropped by the dispatcher. These variants
//! surface from the request API and from the transport seam.

use thiserror::Error;

/// The main error type for this crate
#[derive(Debug, Error)]
pub enum Error {
    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A decimal field did not parse as a number
    #[error("Invalid number in field `{field}`: {value:?}")]
    InvalidNumber {
        /// Field name in the wire message
        field: &'static str,
        /// Raw text that failed to parse
        value: String,
    },

    /// A message was missing a field required by its kind
    #[error("Malformed {kind} message: {reason}")]
    Malformed {
        /// Message kind being decoded
        kind: &'static str,
        /// What was wrong with it
        reason: String,
    },

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Login signature could not be produced
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// The venue answered a request with an error object
    #[error("API error ({code}): {message}")]
    Api {
        /// Venue error code
        code: i64,
        /// Venue error message
        message: String,
    },

    /// WebSocket connection closed unexpectedly
    #[error("WebSocket connection closed")]
    ConnectionClosed,

    /// The replica has been shut down or was never started
    #[error("Replica is not running")]
    NotRunning,
}

impl Error {
    /// Whether this error means the current connection is unusable
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::WebSocket(_) | Error::ConnectionClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_number_display() {
        let err = Error::InvalidNumber {
            field: "price",
            value: "abc".to_string(),
        };
        assert!(err.to_string().contains("price"));
        assert!(err.to_string().contains("abc"));
    }

    #[test]
    fn test_api_error_display() {
        let err = Error::Api {
            code: 2001,
            message: "Symbol not found".to_string(),
        };
        assert!(err.to_string().contains("2001"));
        assert!(err.to_string().contains("Symbol not found"));
    }

    #[test]
    fn test_transport_classification() {
        assert!(Error::ConnectionClosed.is_transport());
        assert!(!Error::NotRunning.is_transport());
        assert!(!Error::Config("x".into()).is_transport());
    }
}

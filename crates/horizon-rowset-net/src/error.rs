//! Error types for the HTTP transport.

use horizon_rowset::TransportError;

/// Result type alias for transport construction and request building.
pub type Result<T> = std::result::Result<T, NetError>;

/// Errors raised while setting up or preparing a request.
///
/// Failures of a request in flight are reported to the dataset as a
/// [`TransportError`] inside the completion event.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// The endpoint URL is malformed.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    /// Request parameters could not be encoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No tokio runtime was given and none is running.
    #[error("no tokio runtime available")]
    NoRuntime,
}

impl From<NetError> for TransportError {
    fn from(err: NetError) -> Self {
        match err {
            NetError::Client(err) => transport_error(err),
            other => TransportError::network(other.to_string()),
        }
    }
}

/// Map a reqwest failure to the error carried in transport events.
pub(crate) fn transport_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_decode() {
        TransportError::decode(err.to_string())
    } else if let Some(status) = err.status() {
        TransportError::http(status.as_u16(), status.canonical_reason().unwrap_or_default())
    } else {
        TransportError::network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_errors_become_network_errors() {
        let err: NetError = url::Url::parse("not a url").unwrap_err().into();
        assert!(err.to_string().starts_with("invalid URL"));
        let transport: TransportError = err.into();
        assert!(matches!(transport, TransportError::Network(message) if message.contains("invalid URL")));
    }

    #[test]
    fn test_no_runtime_message() {
        assert_eq!(NetError::NoRuntime.to_string(), "no tokio runtime available");
    }
}

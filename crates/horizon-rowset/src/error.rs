//! Error types for the dataset engine.
//!
//! Validation failures are never errors: they are recorded as cell and row
//! state. [`NavError`] covers operations the engine refuses to perform, and
//! [`TransportError`] describes why a load or save round trip failed.

/// Result type alias for dataset operations.
pub type Result<T> = std::result::Result<T, NavError>;

/// Errors returned by dataset operations.
#[derive(Debug, thiserror::Error)]
pub enum NavError {
    /// A save request is already in flight.
    #[error("a save request is already in progress")]
    SaveInProgress,

    /// Reloading was requested while a save is in flight.
    #[error("cannot reload while saving is in progress")]
    ReloadWhileSaving,

    /// Every changed row failed validation.
    #[error("{count} changed row(s) have errors and cannot be saved")]
    InvalidRows { count: usize },

    /// The dataset is not server-backed.
    #[error("no transport is configured for rowset '{rowset}'")]
    NoTransport { rowset: String },

    /// The operation is disabled by the dataset's permissions.
    #[error("operation not permitted: {operation}")]
    NotPermitted { operation: &'static str },

    /// The row is locked by an in-flight save.
    #[error("row is being saved and cannot be {action}")]
    RowLocked { action: &'static str },

    /// The requested reparenting would create a cycle.
    #[error("invalid parent: {message}")]
    InvalidParent { message: String },

    /// A row move was rejected.
    #[error("invalid move: {message}")]
    InvalidMove { message: String },

    /// A column name did not resolve.
    #[error("unknown column '{name}'")]
    UnknownColumn { name: String },

    /// Configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// A JSON document could not be decoded.
    #[error("invalid JSON document: {0}")]
    Json(#[from] serde_json::Error),

    /// A transport failure surfaced synchronously.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl NavError {
    /// Create a permission error.
    pub fn not_permitted(operation: &'static str) -> Self {
        Self::NotPermitted { operation }
    }

    /// Create a row lock error.
    pub fn row_locked(action: &'static str) -> Self {
        Self::RowLocked { action }
    }

    /// Create an invalid-parent error.
    pub fn invalid_parent(message: impl Into<String>) -> Self {
        Self::InvalidParent {
            message: message.into(),
        }
    }

    /// Create an invalid-move error.
    pub fn invalid_move(message: impl Into<String>) -> Self {
        Self::InvalidMove {
            message: message.into(),
        }
    }

    /// Create an unknown-column error.
    pub fn unknown_column(name: impl Into<String>) -> Self {
        Self::UnknownColumn { name: name.into() }
    }
}

/// Why a load or save round trip failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The server answered with a non-success status.
    #[error("Server returned {status} {message}")]
    Http { status: u16, message: String },

    /// The request never reached the server.
    #[error("network error: {0}")]
    Network(String),

    /// The request timed out.
    #[error("timed out")]
    Timeout,

    /// The request was aborted before completion.
    #[error("aborted")]
    Aborted,

    /// The response body could not be decoded.
    #[error("invalid response: {0}")]
    Decode(String),
}

impl TransportError {
    /// Create an HTTP status error.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    /// Create a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// User-facing message for a failed operation (`"Loading"`, `"Saving"`).
    pub fn user_message(&self, operation: &str) -> String {
        match self {
            Self::Http { .. } => self.to_string(),
            Self::Network(_) => format!("{operation} failed: network error."),
            Self::Timeout => format!("{operation} failed: timed out."),
            Self::Aborted => format!("{operation} aborted."),
            Self::Decode(message) => format!("{operation} failed: {message}"),
        }
    }
}

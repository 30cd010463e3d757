//! Courier error types

/// Courier error types
///
/// Every payload is owned text so a single failure can be cloned out to
/// several waiters (coalesced image fetches share one outcome).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CourierError {
    /// `fire` or an image fetch was attempted before `load` completed.
    #[error("courier is not loaded; call Courier::load() before firing requests")]
    NotLoaded,

    // Network errors
    #[error("transport error: {0}")]
    Transport(String),

    #[error("server responded with {status}: {message}")]
    Status { status: u16, message: String },

    // Data errors
    #[error("parse error: {0}")]
    Parse(String),

    #[error("unsupported charset: {0}")]
    UnsupportedCharset(String),

    // Construction errors
    #[error("multipart body could not be built (fields: {}): {message}", fields.join(", "))]
    Multipart {
        fields: Vec<String>,
        message: String,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // Local storage errors
    #[error("cache error: {0}")]
    Cache(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Coarse classification handed to error callbacks alongside the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotLoaded,
    Transport,
    Server,
    Parse,
    Construction,
    Cache,
}

impl CourierError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CourierError::NotLoaded => ErrorKind::NotLoaded,
            CourierError::Transport(_) => ErrorKind::Transport,
            CourierError::Status { .. } => ErrorKind::Server,
            CourierError::Parse(_) | CourierError::UnsupportedCharset(_) => ErrorKind::Parse,
            CourierError::Multipart { .. }
            | CourierError::InvalidRequest(_)
            | CourierError::Configuration(_) => ErrorKind::Construction,
            CourierError::Cache(_) => ErrorKind::Cache,
        }
    }

    /// Whether the server rejected the request's credentials.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, CourierError::Status { status: 401 | 403, .. })
    }
}

impl From<serde_json::Error> for CourierError {
    fn from(err: serde_json::Error) -> Self {
        CourierError::Parse(err.to_string())
    }
}

impl From<image::ImageError> for CourierError {
    fn from(err: image::ImageError) -> Self {
        CourierError::Parse(format!("image decode failed: {err}"))
    }
}

impl From<reqwest::Error> for CourierError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            CourierError::InvalidRequest(err.to_string())
        } else {
            CourierError::Transport(err.to_string())
        }
    }
}

impl From<std::io::Error> for CourierError {
    fn from(err: std::io::Error) -> Self {
        CourierError::Cache(err.to_string())
    }
}

/// Result type alias for Courier operations
pub type Result<T> = std::result::Result<T, CourierError>;

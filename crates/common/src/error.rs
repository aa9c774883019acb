//! Error types for the port-group utility

use thiserror::Error;

/// Result type alias using the shared Error
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by the daemon and the tenant service
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Endpoint unreachable, credentials rejected, or a session that
    /// could not be re-established.
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Resource not found: {kind} with id {id}")]
    NotFound { kind: String, id: String },

    #[error("No vCenter account registered")]
    NotRegistered,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Endpoint returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Operation timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Crypto error: {0}")]
    Crypto(String),
}

impl Error {
    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// HTTP status code a facade should answer with for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::InvalidRequest(_) => 400,
            Error::NotFound { .. } => 404,
            Error::NotRegistered => 503,
            Error::Connectivity(_) | Error::Api { .. } | Error::Protocol(_) => 502,
            Error::Timeout { .. } => 504,
            Error::Io(_) | Error::Database(_) | Error::Serialization(_) | Error::Crypto(_) => 500,
        }
    }
}

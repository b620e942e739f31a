//! Error types for the BasaltDB client core

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by response handles and resource disposal.
///
/// Every variant carries owned data and the enum is `Clone`, because a failed
/// response memoizes its error once and hands a copy to every thread that
/// calls `get`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("server error {code}: {message}")]
    Server {
        /// Diagnostic code reported by the server
        code: u32,
        message: String,
    },

    #[error("interrupted: {0}")]
    Interrupted(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("server did not acknowledge within {0:?}")]
    ResponseTimeout(Duration),

    #[error("already closed: {0}")]
    ResourceClosed(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;

impl ClientError {
    /// Builds a structured server error from a diagnostic code and message.
    pub fn server(code: u32, message: impl Into<String>) -> Self {
        ClientError::Server {
            code,
            message: message.into(),
        }
    }

    /// Returns a stable error code for this error variant.
    /// These codes are stable and can be used by callers for classification.
    pub fn code(&self) -> &'static str {
        match self {
            ClientError::Io(_) => "IO_ERROR",
            ClientError::Server { .. } => "SERVER_ERROR",
            ClientError::Interrupted(_) => "INTERRUPTED",
            ClientError::Timeout(_) => "TIMEOUT",
            ClientError::ResponseTimeout(_) => "RESPONSE_TIMEOUT",
            ClientError::ResourceClosed(_) => "RESOURCE_CLOSED",
        }
    }

    /// Returns true if the error was reported by (or on behalf of) the server.
    ///
    /// `ResponseTimeout` counts as a server error: it is raised when a caller
    /// opted into strict acknowledgment and the server never answered.
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            ClientError::Server { .. } | ClientError::ResponseTimeout(_)
        )
    }

    /// Returns true if this error is potentially retryable.
    ///
    /// Transient conditions (IO, an elapsed bounded wait) are retryable;
    /// a closed handle or a structured server diagnostic is not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Io(_) | ClientError::Timeout(_))
    }
}

impl From<io::Error> for ClientError {
    fn from(e: io::Error) -> Self {
        ClientError::Io(e.to_string())
    }
}

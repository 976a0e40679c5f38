//! Common error types for UniStore.

use std::fmt;
use thiserror::Error;

/// Boxed error kept as the cause of a wrapped backend failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Closed set of storage provider failure codes.
///
/// Callers branch on the code, never on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The root folder of a provider cannot be deleted.
    CannotDeleteRootFolder,
    /// A path escapes the provider tree or contains invalid segments.
    NotWithinTree,
    /// The backend refused or failed to create a file.
    CannotCreateFile,
    /// A file already exists at the target path.
    CannotCreateFileWhenItAlreadyExists,
    /// The target entry does not exist.
    DoesNotExist,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::CannotDeleteRootFolder => "CannotDeleteRootFolder",
            ErrorCode::NotWithinTree => "NotWithinTree",
            ErrorCode::CannotCreateFile => "CannotCreateFile",
            ErrorCode::CannotCreateFileWhenItAlreadyExists => {
                "CannotCreateFileWhenItAlreadyExists"
            }
            ErrorCode::DoesNotExist => "DoesNotExist",
        };
        f.write_str(name)
    }
}

/// Top-level error type for UniStore operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage provider failure tagged with a closed error code.
    #[error("Storage provider error ({code}): {message}")]
    Provider {
        code: ErrorCode,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network request failed.
    #[error("Network error: {0}")]
    Network(String),

    /// Credentials were rejected or could not be used.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// The backend denied access.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The backend cannot perform this operation.
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// Create a provider error without a cause.
    pub fn provider(code: ErrorCode, message: impl Into<String>) -> Self {
        Error::Provider {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create a provider error that keeps the original failure as its cause.
    pub fn provider_with_source(
        code: ErrorCode,
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Error::Provider {
            code,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn not_within_tree(message: impl Into<String>) -> Self {
        Self::provider(ErrorCode::NotWithinTree, message)
    }

    pub fn does_not_exist(path: impl fmt::Display) -> Self {
        Self::provider(ErrorCode::DoesNotExist, format!("Entry not found: {}", path))
    }

    /// The provider error code, if this is a provider error.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Error::Provider { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether this error carries the given code.
    pub fn is(&self, code: ErrorCode) -> bool {
        self.code() == Some(code)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_code_is_exposed() {
        let err = Error::provider(ErrorCode::NotWithinTree, "bad");
        assert_eq!(err.code(), Some(ErrorCode::NotWithinTree));
        assert!(err.is(ErrorCode::NotWithinTree));
        assert!(!err.is(ErrorCode::DoesNotExist));
    }

    #[test]
    fn test_non_provider_has_no_code() {
        let err = Error::Network("timeout".to_string());
        assert_eq!(err.code(), None);
    }

    #[test]
    fn test_source_is_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = Error::provider_with_source(ErrorCode::CannotCreateFile, "upload failed", io);
        let source = err.source().expect("cause kept");
        assert_eq!(source.to_string(), "disk full");
        assert!(err.to_string().contains("CannotCreateFile"));
    }
}

use std::fmt;
use std::io;
use std::result::Result as StdResult;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Category of a failure, surfaced to observers alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NetworkFailure,
    MalformedResponse,
    NotFound,
    PersistenceFailure,
    Config,
    InvalidInput,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NetworkFailure => "network failure",
            ErrorKind::MalformedResponse => "malformed response",
            ErrorKind::NotFound => "not found",
            ErrorKind::PersistenceFailure => "persistence failure",
            ErrorKind::Config => "configuration error",
            ErrorKind::InvalidInput => "invalid input",
            ErrorKind::Internal => "internal error",
        };
        f.write_str(name)
    }
}

// Cloneable so a single fetch failure can be handed to every joined caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("Network failure: {0}")]
    NetworkFailure(String),
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::NetworkFailure => Error::NetworkFailure(message),
            ErrorKind::MalformedResponse => Error::MalformedResponse(message),
            ErrorKind::NotFound => Error::NotFound(message),
            ErrorKind::PersistenceFailure => Error::PersistenceFailure(message),
            ErrorKind::Config => Error::ConfigError(message),
            ErrorKind::InvalidInput => Error::InvalidInput(message),
            ErrorKind::Internal => Error::Internal(message),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NetworkFailure(_) => ErrorKind::NetworkFailure,
            Error::MalformedResponse(_) => ErrorKind::MalformedResponse,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::PersistenceFailure(_) => ErrorKind::PersistenceFailure,
            Error::ConfigError(_) => ErrorKind::Config,
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The message without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            Error::NetworkFailure(msg)
            | Error::MalformedResponse(msg)
            | Error::NotFound(msg)
            | Error::PersistenceFailure(msg)
            | Error::ConfigError(msg)
            | Error::InvalidInput(msg)
            | Error::Internal(msg) => msg,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Error::MalformedResponse(err.to_string())
        } else {
            Error::NetworkFailure(err.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::MalformedResponse(err.to_string())
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::PersistenceFailure(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::ConfigError(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::ConfigError(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Error::NetworkFailure(format!("request timed out: {}", err))
    }
}

pub type Result<T> = StdResult<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_constructor() {
        let kinds = [
            ErrorKind::NetworkFailure,
            ErrorKind::MalformedResponse,
            ErrorKind::NotFound,
            ErrorKind::PersistenceFailure,
            ErrorKind::Config,
            ErrorKind::InvalidInput,
            ErrorKind::Internal,
        ];
        for kind in kinds {
            let err = Error::new(kind, "boom");
            assert_eq!(err.kind(), kind);
            assert_eq!(err.message(), "boom");
        }
    }

    #[test]
    fn test_json_error_is_malformed_response() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), ErrorKind::MalformedResponse);
    }

    #[test]
    fn test_io_error_is_persistence_failure() {
        let err: Error = io::Error::new(io::ErrorKind::PermissionDenied, "read-only").into();
        assert_eq!(err.kind(), ErrorKind::PersistenceFailure);
        assert!(err.to_string().contains("read-only"));
    }
}

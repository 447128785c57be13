//! Error types for newsfeed

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Record Errors ===
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Invalid data: {0}")]
    Invalid(String),

    #[error("Payload too large: {0}")]
    TooLarge(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Corrupted data: {0}")]
    Corrupted(String),

    #[error("Log error: {0}")]
    Log(String),

    // === Backend Errors ===
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Operation timeout: {0}")]
    Timeout(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{context}: {source}")]
    Context {
        context: String,
        source: Box<Error>,
    },
}

/// Client-facing classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Lookup, update or delete target is absent.
    NotFound,
    /// Validation failure on a write or query.
    Invalid,
    /// Store unreachable, timed out, or failed at the I/O level.
    TransientIo,
    /// Malformed message or payload.
    Decode,
    /// Everything else.
    Internal,
}

impl Error {
    /// Classify this error. Context wrappers are transparent.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Invalid(_) | Error::TooLarge(_) => ErrorKind::Invalid,
            Error::Decode(_) | Error::Corrupted(_) => ErrorKind::Decode,
            Error::Io(_)
            | Error::Log(_)
            | Error::Unavailable(_)
            | Error::RocksDb(_)
            | Error::Timeout(_) => ErrorKind::TransientIo,
            Error::InvalidConfig(_) | Error::Internal(_) => ErrorKind::Internal,
            Error::Context { source, .. } => source.kind(),
        }
    }

    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::TransientIo
    }

    /// Innermost error, with every context layer peeled off
    pub fn root(&self) -> &Error {
        match self {
            Error::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Wrap with the name of the operation that failed
    pub fn context(self, context: impl Into<String>) -> Self {
        Error::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Invalid if matches!(self.root(), Error::TooLarge(_)) => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            ErrorKind::Invalid | ErrorKind::Decode => StatusCode::BAD_REQUEST,
            ErrorKind::TransientIo => match self.root() {
                Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::SERVICE_UNAVAILABLE,
            },
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Attach operation context to the error side of a `Result`.
pub trait ResultExt<T> {
    fn context(self, context: &str) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: &str) -> Result<T> {
        self.map_err(|e| e.context(context))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Decode(e.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Corrupted(e.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Internal(e.to_string())
    }
}

impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let status = self.to_http_status();
        let body = axum::Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_kind_survives_context() {
        let err = Error::NotFound("id 7".into())
            .context("repository.news.get")
            .context("service.news.get_by_id");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(matches!(err.root(), Error::NotFound(_)));
        assert_eq!(
            err.to_string(),
            "service.news.get_by_id: repository.news.get: Record not found: id 7"
        );
    }

    #[test]
    fn test_retryable() {
        assert!(Error::Unavailable("down".into()).is_retryable());
        assert!(Error::Timeout("slow".into()).is_retryable());
        assert!(Error::Io(std::io::Error::other("disk")).is_retryable());
        assert!(!Error::Invalid("bad".into()).is_retryable());
        assert!(!Error::Decode("junk".into()).is_retryable());
        assert!(!Error::NotFound("gone".into()).context("op").is_retryable());
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(
            Error::NotFound("x".into()).to_http_status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::Invalid("x".into()).context("op").to_http_status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::TooLarge("x".into()).to_http_status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            Error::Timeout("x".into()).to_http_status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            Error::Unavailable("x".into()).to_http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            Error::Internal("x".into()).to_http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_json_error_is_decode() {
        let err: Error = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::Decode);
    }
}

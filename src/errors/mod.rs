//! Error types for the OneDrive adapter.

use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Result type for OneDrive operations.
pub type OneDriveResult<T> = Result<T, OneDriveError>;

/// Coarse classification used by callers to decide how to react to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A path or identifier does not resolve.
    NotFound,
    /// A name collision on create or move.
    Conflict,
    /// Throttling or a momentary server/network failure.
    Transient,
    /// Authorization failure.
    Auth,
    /// Malformed or unexpected response.
    Protocol,
    /// Invalid configuration or adapter state.
    Configuration,
    /// Invalid arguments supplied by the caller.
    Request,
    /// Upload session failure.
    Upload,
}

/// Top-level error type for the OneDrive adapter.
#[derive(Debug, Error)]
pub enum OneDriveError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Authentication or authorization error.
    #[error("Authentication error: {0}")]
    Authentication(#[from] AuthenticationError),

    /// Resource error.
    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    /// Transient error.
    #[error("Transient error: {0}")]
    Transient(#[from] TransientError),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Request error.
    #[error("Request error: {0}")]
    Request(#[from] RequestError),

    /// Upload error.
    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    /// A transient failure persisted through every retry attempt.
    #[error("Giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The last error observed.
        last: Box<OneDriveError>,
    },
}

impl OneDriveError {
    /// Creates a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        OneDriveError::Configuration(ConfigurationError::InvalidConfiguration(msg.into()))
    }

    /// Creates an authentication error.
    pub fn authentication(msg: impl Into<String>) -> Self {
        OneDriveError::Authentication(AuthenticationError::InvalidToken(msg.into()))
    }

    /// Creates a request error.
    pub fn request(msg: impl Into<String>) -> Self {
        OneDriveError::Request(RequestError::ValidationError(msg.into()))
    }

    /// Creates a not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        OneDriveError::Resource(ResourceError::NotFound(msg.into()))
    }

    /// Creates a conflict error.
    pub fn conflict(msg: impl Into<String>) -> Self {
        OneDriveError::Resource(ResourceError::Conflict(msg.into()))
    }

    /// Creates a rate limit error.
    pub fn rate_limit(msg: impl Into<String>) -> Self {
        OneDriveError::Transient(TransientError::RateLimited {
            message: msg.into(),
            retry_after: None,
        })
    }

    /// Creates a server error.
    pub fn server(msg: impl Into<String>) -> Self {
        OneDriveError::Transient(TransientError::Server(msg.into()))
    }

    /// Creates a network error.
    pub fn network(msg: impl Into<String>) -> Self {
        OneDriveError::Transient(TransientError::ConnectionFailed(msg.into()))
    }

    /// Creates a deserialization error.
    pub fn deserialization(msg: impl Into<String>) -> Self {
        OneDriveError::Protocol(ProtocolError::DeserializationError(msg.into()))
    }

    /// Returns the coarse classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            OneDriveError::Configuration(_) => ErrorKind::Configuration,
            OneDriveError::Authentication(_) => ErrorKind::Auth,
            OneDriveError::Resource(
                ResourceError::Conflict(_) | ResourceError::NameConflict(_),
            ) => ErrorKind::Conflict,
            OneDriveError::Resource(_) => ErrorKind::NotFound,
            OneDriveError::Transient(_) => ErrorKind::Transient,
            OneDriveError::Protocol(_) => ErrorKind::Protocol,
            OneDriveError::Request(_) => ErrorKind::Request,
            OneDriveError::Upload(_) => ErrorKind::Upload,
            OneDriveError::RetriesExhausted { last, .. } => last.kind(),
        }
    }

    /// Returns true if the error is retryable.
    ///
    /// An exhausted retry loop is never retryable again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OneDriveError::Transient(_))
    }

    /// Returns true if the error means the path or item does not exist.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Returns true if the error is a name collision.
    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    /// Returns the retry delay hint if available.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            OneDriveError::Transient(TransientError::RateLimited { retry_after, .. }) => {
                *retry_after
            }
            OneDriveError::Transient(TransientError::ServiceUnavailable { retry_after, .. }) => {
                *retry_after
            }
            _ => None,
        }
    }

    /// Returns the HTTP status code if applicable.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            OneDriveError::Authentication(AuthenticationError::Forbidden(_)) => {
                Some(StatusCode::FORBIDDEN)
            }
            OneDriveError::Authentication(_) => Some(StatusCode::UNAUTHORIZED),
            OneDriveError::Resource(ResourceError::NotFound(_)) => Some(StatusCode::NOT_FOUND),
            OneDriveError::Resource(ResourceError::Conflict(_)) => Some(StatusCode::CONFLICT),
            OneDriveError::Transient(TransientError::RateLimited { .. }) => {
                Some(StatusCode::TOO_MANY_REQUESTS)
            }
            OneDriveError::Transient(TransientError::ServiceUnavailable { .. }) => {
                Some(StatusCode::SERVICE_UNAVAILABLE)
            }
            OneDriveError::Upload(UploadError::SessionExpired(_)) => Some(StatusCode::NOT_FOUND),
            OneDriveError::RetriesExhausted { last, .. } => last.status_code(),
            _ => None,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Missing credentials.
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// An operation ran before the storage root was detected.
    #[error("Storage root has not been detected; call detect_shared_storage first")]
    RootNotResolved,
}

/// Authentication and authorization errors.
#[derive(Debug, Error)]
pub enum AuthenticationError {
    /// Invalid token.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Expired token.
    #[error("Expired token: {0}")]
    ExpiredToken(String),

    /// The token is valid but the account may not perform the operation.
    #[error("Forbidden: {0}")]
    Forbidden(String),
}

/// Resource errors.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// Item not found.
    #[error("Item not found: {0}")]
    NotFound(String),

    /// An intermediate path segment does not exist.
    #[error("Path not found: {0}")]
    PathNotFound(String),

    /// The shared storage root does not exist.
    #[error("Storage root not found: {0}")]
    RootNotFound(String),

    /// An item with the same name already exists.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A non-directory item occupies the requested directory name.
    #[error("Name conflict: {0}")]
    NameConflict(String),
}

/// Failures expected to clear on retry.
#[derive(Debug, Error)]
pub enum TransientError {
    /// Throttled by the service.
    #[error("Rate limited: {message}")]
    RateLimited {
        /// Error message.
        message: String,
        /// Retry after duration.
        retry_after: Option<Duration>,
    },

    /// Service unavailable.
    #[error("Service unavailable: {message}")]
    ServiceUnavailable {
        /// Error message.
        message: String,
        /// Retry after duration.
        retry_after: Option<Duration>,
    },

    /// Momentary server error.
    #[error("Server error: {0}")]
    Server(String),

    /// Connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Timeout.
    #[error("Request timeout: {0}")]
    Timeout(String),
}

/// Malformed or unexpected responses.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Deserialization error.
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// Unexpected status code.
    #[error("Unexpected status {status}: {message}")]
    UnexpectedStatus {
        /// HTTP status.
        status: u16,
        /// Error message.
        message: String,
    },

    /// Unexpected response shape.
    #[error("Unexpected response format: {0}")]
    UnexpectedFormat(String),

    /// Continuation token that cannot be followed.
    #[error("Invalid continuation token: {0}")]
    InvalidContinuation(String),
}

/// Request errors.
#[derive(Debug, Error)]
pub enum RequestError {
    /// Validation error.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// A directory operation was applied to a file.
    #[error("Not a directory: {0}")]
    NotADirectory(String),
}

/// Upload errors.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Upload session expired or was discarded by the server.
    #[error("Upload session expired: {0}")]
    SessionExpired(String),

    /// Upload failed.
    #[error("Upload failed: {0}")]
    UploadFailed(String),
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Network error.
    #[error("Network error: {0}")]
    Network(String),

    /// Timeout error.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// HTTP error.
    #[error("HTTP error: {0}")]
    Http(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(err.to_string())
        } else if err.is_connect() || err.is_body() || err.is_request() {
            TransportError::Network(err.to_string())
        } else {
            TransportError::Http(err.to_string())
        }
    }
}

impl From<TransportError> for OneDriveError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout(msg) => OneDriveError::Transient(TransientError::Timeout(msg)),
            TransportError::Network(msg) => {
                OneDriveError::Transient(TransientError::ConnectionFailed(msg))
            }
            TransportError::Http(msg) => {
                OneDriveError::Protocol(ProtocolError::UnexpectedFormat(msg))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable() {
        let error = OneDriveError::Transient(TransientError::RateLimited {
            message: "Rate limit exceeded".to_string(),
            retry_after: None,
        });
        assert!(error.is_retryable());

        let error = OneDriveError::Transient(TransientError::Timeout("Timeout".to_string()));
        assert!(error.is_retryable());

        let error = OneDriveError::not_found("test");
        assert!(!error.is_retryable());

        let error = OneDriveError::authentication("expired");
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_exhausted_is_not_retryable_but_keeps_kind() {
        let error = OneDriveError::RetriesExhausted {
            attempts: 3,
            last: Box::new(OneDriveError::rate_limit("slow down")),
        };
        assert!(!error.is_retryable());
        assert_eq!(error.kind(), ErrorKind::Transient);
        assert_eq!(error.status_code(), Some(StatusCode::TOO_MANY_REQUESTS));
    }

    #[test]
    fn test_kind() {
        assert_eq!(OneDriveError::not_found("x").kind(), ErrorKind::NotFound);
        assert_eq!(
            OneDriveError::Resource(ResourceError::PathNotFound("a/b".into())).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            OneDriveError::Resource(ResourceError::NameConflict("a".into())).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(OneDriveError::conflict("a").kind(), ErrorKind::Conflict);
        assert_eq!(OneDriveError::deserialization("bad").kind(), ErrorKind::Protocol);
        assert_eq!(
            OneDriveError::Configuration(ConfigurationError::RootNotResolved).kind(),
            ErrorKind::Configuration
        );
    }

    #[test]
    fn test_status_code() {
        let error = OneDriveError::authentication("test");
        assert_eq!(error.status_code(), Some(StatusCode::UNAUTHORIZED));

        let error = OneDriveError::Authentication(AuthenticationError::Forbidden("test".into()));
        assert_eq!(error.status_code(), Some(StatusCode::FORBIDDEN));

        let error = OneDriveError::not_found("test");
        assert_eq!(error.status_code(), Some(StatusCode::NOT_FOUND));
    }

    #[test]
    fn test_transport_error_conversion() {
        let error: OneDriveError = TransportError::Timeout("slow".into()).into();
        assert!(error.is_retryable());

        let error: OneDriveError = TransportError::Http("garbled".into()).into();
        assert_eq!(error.kind(), ErrorKind::Protocol);
    }
}

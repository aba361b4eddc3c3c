//! Error types for remote multipart operations

use std::io;
use thiserror::Error;

/// Result type alias for remote storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors surfaced by an object store while driving the multipart protocol
#[derive(Error, Debug, Clone)]
pub enum StorageError {
    /// AWS SDK error
    #[error("AWS SDK error: {0}")]
    Sdk(String),

    /// Service error with a specific error code
    #[error("Storage service error ({code}): {message}")]
    Service { code: String, message: String },

    /// Multipart upload id unknown to the store (completed, aborted or never created)
    #[error("No such upload: {upload_id} ({bucket}/{key})")]
    NoSuchUpload {
        bucket: String,
        key: String,
        upload_id: String,
    },

    /// Bucket not found or not accessible
    #[error("Bucket not found or not accessible: {0}")]
    BucketNotFound(String),

    /// Access denied error
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Invalid remote configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Protocol-level multipart error (missing upload id, missing ETag, ...)
    #[error("Multipart upload error: {0}")]
    MultipartUpload(String),

    /// Network error
    #[error("Network error: {0}")]
    Network(String),

    /// Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// The request was interrupted by a cancellation signal
    #[error("Request cancelled")]
    Cancelled,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(String),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        source: Box<StorageError>,
    },
}

impl StorageError {
    /// Add context to an error
    pub fn context<S: Into<String>>(self, context: S) -> Self {
        StorageError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create an error from an arbitrary SDK error
    pub fn from_sdk<E: std::error::Error>(error: E) -> Self {
        StorageError::Sdk(error.to_string())
    }

    /// Check if error is retryable.
    ///
    /// The upload stream never retries on its own; this is for callers that wrap
    /// whole uploads in their own retry policy.
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::Network(_) => true,
            StorageError::Timeout(_) => true,
            StorageError::RateLimitExceeded(_) => true,
            StorageError::Io(_) => true,
            StorageError::Sdk(msg) => {
                let lower = msg.to_lowercase();
                lower.contains("connection reset")
                    || lower.contains("connection timed out")
                    || lower.contains("broken pipe")
                    || lower.contains("connection refused")
                    || lower.contains("temporarily unavailable")
            }
            StorageError::Service { code, .. } => is_retryable_code(code),
            StorageError::WithContext { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Check if error is transient (safe to retry)
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::Network(_)
                | StorageError::Timeout(_)
                | StorageError::RateLimitExceeded(_)
                | StorageError::Io(_)
        )
    }

    /// Check if the error was caused by cancellation, looking through context wrappers
    pub fn is_cancelled(&self) -> bool {
        match self {
            StorageError::Cancelled => true,
            StorageError::WithContext { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

/// Check if a service error code is retryable
pub(crate) fn is_retryable_code(code: &str) -> bool {
    matches!(
        code,
        "RequestTimeout"
            | "ServiceUnavailable"
            | "InternalError"
            | "SlowDown"
            | "RequestTimeTooSkewed"
    )
}

#[cfg(feature = "s3-native")]
impl<E> From<aws_sdk_s3::error::SdkError<E>> for StorageError
where
    E: std::error::Error + 'static,
{
    fn from(error: aws_sdk_s3::error::SdkError<E>) -> Self {
        match error {
            aws_sdk_s3::error::SdkError::DispatchFailure(e) => {
                StorageError::Network(format!("Network dispatch failure: {:?}", e))
            }
            aws_sdk_s3::error::SdkError::TimeoutError(e) => {
                StorageError::Timeout(format!("{:?}", e))
            }
            aws_sdk_s3::error::SdkError::ResponseError(e) => {
                StorageError::Network(format!("Response error: {:?}", e))
            }
            aws_sdk_s3::error::SdkError::ServiceError(e) => {
                let err_str = format!("{:?}", e);

                if err_str.contains("NoSuchUpload") {
                    StorageError::Service {
                        code: "NoSuchUpload".to_string(),
                        message: "The specified multipart upload does not exist".to_string(),
                    }
                } else if err_str.contains("NoSuchBucket") {
                    StorageError::Service {
                        code: "NoSuchBucket".to_string(),
                        message: "The specified bucket does not exist".to_string(),
                    }
                } else if err_str.contains("EntityTooSmall") {
                    StorageError::Service {
                        code: "EntityTooSmall".to_string(),
                        message: "A non-final part is smaller than the minimum allowed size"
                            .to_string(),
                    }
                } else if err_str.contains("AccessDenied") {
                    StorageError::AccessDenied("Access denied to resource".to_string())
                } else if err_str.contains("SlowDown") {
                    StorageError::Service {
                        code: "SlowDown".to_string(),
                        message: err_str,
                    }
                } else {
                    StorageError::Service {
                        code: "Unknown".to_string(),
                        message: err_str,
                    }
                }
            }
            _ => StorageError::Sdk(format!("{:?}", error)),
        }
    }
}

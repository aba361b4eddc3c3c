/*!
 * Error types for upload streams
 */

use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::protocol::StorageError;

pub type UploadResult<T> = std::result::Result<T, UploadError>;

/// Exit code constants for the command-line tool
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_ABORTED: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

#[derive(Error, Debug)]
pub enum UploadError {
    /// Invalid construction parameters
    #[error("Configuration error: {0}")]
    Config(String),

    /// The stream is write-only and forward-only
    #[error("Unsupported operation on upload stream: {operation}")]
    Unsupported { operation: &'static str },

    /// Operation invoked in a state that does not allow it
    #[error("Invalid upload sequence: {0}")]
    Sequence(String),

    /// Cancellation was observed before or after a remote call
    #[error("Upload cancelled")]
    Cancelled,

    /// The operation lock was not acquired in time; the operation never started
    #[error("Timed out after {0:?} waiting for the upload lock")]
    LockTimeout(Duration),

    /// Failure reported by the object store, unchanged
    #[error("Remote storage error: {0}")]
    Remote(#[from] StorageError),
}

impl UploadError {
    /// Whether this error reports cancellation, including a remote call that was
    /// interrupted by the cancellation signal
    pub fn is_cancelled(&self) -> bool {
        match self {
            UploadError::Cancelled => true,
            UploadError::Remote(e) => e.is_cancelled(),
            _ => false,
        }
    }

    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        if self.is_cancelled() {
            EXIT_ABORTED
        } else {
            EXIT_FATAL
        }
    }
}

impl From<UploadError> for io::Error {
    fn from(err: UploadError) -> Self {
        let kind = match &err {
            UploadError::Config(_) => io::ErrorKind::InvalidInput,
            UploadError::Unsupported { .. } => io::ErrorKind::Unsupported,
            UploadError::Sequence(_) => io::ErrorKind::BrokenPipe,
            UploadError::Cancelled => io::ErrorKind::Interrupted,
            UploadError::LockTimeout(_) => io::ErrorKind::TimedOut,
            UploadError::Remote(e) if e.is_cancelled() => io::ErrorKind::Interrupted,
            UploadError::Remote(_) => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

/*!
 * upstream-s3 - buffered multipart uploads from arbitrary byte streams
 *
 * Turns incremental writes into a protocol-correct multipart upload:
 * - Parts cut at a configurable minimum size, sent strictly in order
 * - Lazy initiate on first write, complete on close
 * - Cancellation that aborts the remote upload on close
 * - Server-side encryption aware part sizing
 * - Typed lifecycle events and progress notifications
 * - `AsyncWrite` and blocking `Write` adapters
 * - AWS S3 backend (feature `s3-native`) and an in-memory store
 */

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod stream;

// Re-export commonly used types
pub use config::{AppConfig, EmptyFinalPart, LogLevel, LoggingConfig, StreamConfig};
pub use error::{UploadError, UploadResult};
pub use protocol::{InitiateRequest, MemoryMultipartStore, MultipartOperations, StorageError};
pub use stream::{
    UploadEvent, UploadEventKind, UploadState, UploadStream, UploadStreamBuilder, UploadSummary,
    UploadWriter,
};

#[cfg(feature = "s3-native")]
pub use protocol::s3::{S3Client, S3Config};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}

/*!
 * Remote multipart protocol abstraction
 *
 * The upload stream only ever talks to an object store through
 * [`MultipartOperations`]. Implementations:
 * - `s3::S3Client`: AWS S3 and S3-compatible services (feature `s3-native`)
 * - `memory::MemoryMultipartStore`: in-process store for tests and dry runs
 */

pub mod error;
pub mod memory;
pub mod types;

#[cfg(feature = "s3-native")]
pub mod s3;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryMultipartStore;
pub use types::{
    AbortReceipt, AbortRequest, CompleteReceipt, CompleteRequest, InitiateRequest,
    is_valid_bucket_name, InitiateResponse, ServerSideEncryption, StorageClass, UploadPartInfo,
    UploadPartRequest,
};

/// Smallest size a non-final part may have (5 MiB)
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Largest size a single part may have (5 GiB)
pub const MAX_PART_SIZE: usize = 5 * 1024 * 1024 * 1024;

/// Highest part number the protocol accepts
pub const MAX_PART_NUMBER: i32 = 10_000;

/// The four calls of the multipart upload protocol.
///
/// Implementations must be safe to call from several tasks at once; the upload
/// stream itself never issues two calls concurrently for one upload.
#[async_trait]
pub trait MultipartOperations: Send + Sync {
    /// Create a multipart upload
    async fn initiate(
        &self,
        request: &InitiateRequest,
        cancel: &CancellationToken,
    ) -> StorageResult<InitiateResponse>;

    /// Transmit one part
    async fn upload_part(
        &self,
        request: UploadPartRequest,
        cancel: &CancellationToken,
    ) -> StorageResult<UploadPartInfo>;

    /// Stitch the acknowledged parts into the final object
    async fn complete(
        &self,
        request: CompleteRequest,
        cancel: &CancellationToken,
    ) -> StorageResult<CompleteReceipt>;

    /// Discard the upload and every part stored for it.
    ///
    /// Abort is the cancellation path itself, so it takes no cancellation token.
    async fn abort(&self, request: AbortRequest) -> StorageResult<AbortReceipt>;

    /// Protocol name for logging
    fn protocol_name(&self) -> &'static str;
}

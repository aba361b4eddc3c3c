//! In-memory multipart store
//!
//! This provides an in-process implementation of [`MultipartOperations`] that
//! behaves like an S3 bucket: uploads get ids, parts are kept per upload,
//! completion assembles the object and abort discards everything. Every call is
//! recorded so tests can assert on the exact protocol conversation.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use upstream_s3::protocol::MemoryMultipartStore;
//! use upstream_s3::stream::UploadStream;
//!
//! # async fn demo() -> upstream_s3::UploadResult<()> {
//! let store = Arc::new(MemoryMultipartStore::new());
//! let stream = UploadStream::builder(store.clone())
//!     .bucket("my-bucket")
//!     .key("data/out.bin")
//!     .build()?;
//!
//! stream.write(b"hello").await?;
//! stream.close().await?;
//!
//! assert_eq!(store.object("my-bucket", "data/out.bin").unwrap(), &b"hello"[..]);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::error::{StorageError, StorageResult};
use super::types::{
    AbortReceipt, AbortRequest, CompleteReceipt, CompleteRequest, InitiateRequest,
    InitiateResponse, ServerSideEncryption, UploadPartInfo, UploadPartRequest,
};
use super::{MultipartOperations, MIN_PART_SIZE};

/// Progress is reported to listeners in slices of this size
const PROGRESS_SLICE: usize = 64 * 1024;

/// Hook invoked when a part arrives, before it is stored
pub type PartHook = Arc<dyn Fn(&UploadPartRequest) + Send + Sync>;

/// One protocol call as seen by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    /// initiate(bucket, key)
    Initiate { bucket: String, key: String },
    /// upload_part(upload_id, part_number, size, is_last_part)
    UploadPart {
        upload_id: String,
        part_number: i32,
        size: usize,
        is_last_part: bool,
    },
    /// complete(upload_id, part numbers in request order)
    Complete {
        upload_id: String,
        part_numbers: Vec<i32>,
    },
    /// abort(upload_id)
    Abort { upload_id: String },
}

/// Store operations a failure can be injected into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    Initiate,
    UploadPart,
    Complete,
    Abort,
}

#[derive(Debug)]
struct PendingUpload {
    bucket: String,
    key: String,
    parts: BTreeMap<i32, (String, Bytes)>,
}

#[derive(Default)]
struct StoreState {
    next_upload: u64,
    uploads: HashMap<String, PendingUpload>,
    objects: HashMap<(String, String), Bytes>,
    calls: Vec<RecordedCall>,
    faults: HashMap<StoreOperation, StorageError>,
    part_hook: Option<PartHook>,
}

/// In-memory [`MultipartOperations`] implementation
pub struct MemoryMultipartStore {
    state: Mutex<StoreState>,
    encryption: ServerSideEncryption,
    part_latency: Option<Duration>,
    enforce_min_part_size: bool,
}

impl MemoryMultipartStore {
    /// Create an empty store that reports no server-side encryption
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            encryption: ServerSideEncryption::None,
            part_latency: None,
            enforce_min_part_size: true,
        }
    }

    /// Report `encryption` on every initiate response, as a bucket with default
    /// encryption would
    pub fn with_encryption(mut self, encryption: ServerSideEncryption) -> Self {
        self.encryption = encryption;
        self
    }

    /// Delay every part upload by `latency`; the delay is cancellable
    pub fn with_part_latency(mut self, latency: Duration) -> Self {
        self.part_latency = Some(latency);
        self
    }

    /// Accept undersized non-final parts on completion
    pub fn allow_small_parts(mut self) -> Self {
        self.enforce_min_part_size = false;
        self
    }

    /// Make the next call of `operation` fail with `error`
    pub fn fail_next(&self, operation: StoreOperation, error: StorageError) {
        self.lock().faults.insert(operation, error);
    }

    /// Install a hook that sees every part before it is stored
    pub fn set_part_hook(&self, hook: PartHook) {
        self.lock().part_hook = Some(hook);
    }

    /// Every call received so far, in arrival order
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Sizes of the parts uploaded so far, in arrival order
    pub fn part_sizes(&self) -> Vec<usize> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                RecordedCall::UploadPart { size, .. } => Some(*size),
                _ => None,
            })
            .collect()
    }

    /// Number of complete calls received
    pub fn complete_calls(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, RecordedCall::Complete { .. }))
            .count()
    }

    /// Parts currently stored for a pending upload
    pub fn pending_parts(&self, upload_id: &str) -> Option<Vec<(i32, Bytes)>> {
        self.lock().uploads.get(upload_id).map(|u| {
            u.parts
                .iter()
                .map(|(n, (_, body))| (*n, body.clone()))
                .collect()
        })
    }

    /// Number of uploads initiated but neither completed nor aborted
    pub fn pending_uploads(&self) -> usize {
        self.lock().uploads.len()
    }

    /// Content of a completed object
    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.lock()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_fault(&self, operation: StoreOperation) -> StorageResult<()> {
        match self.lock().faults.remove(&operation) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn no_such_upload(bucket: &str, key: &str, upload_id: &str) -> StorageError {
        StorageError::NoSuchUpload {
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id: upload_id.to_string(),
        }
    }
}

impl Default for MemoryMultipartStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryMultipartStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("MemoryMultipartStore")
            .field("pending_uploads", &state.uploads.len())
            .field("objects", &state.objects.len())
            .field("calls", &state.calls.len())
            .field("encryption", &self.encryption)
            .finish()
    }
}

/// Quoted, truncated SHA-256 digest used as an ETag
fn etag_for(data: &[u8]) -> String {
    format!("\"{}\"", hex::encode(&Sha256::digest(data)[..16]))
}

#[async_trait]
impl MultipartOperations for MemoryMultipartStore {
    async fn initiate(
        &self,
        request: &InitiateRequest,
        cancel: &CancellationToken,
    ) -> StorageResult<InitiateResponse> {
        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        self.take_fault(StoreOperation::Initiate)?;

        let mut state = self.lock();
        state.calls.push(RecordedCall::Initiate {
            bucket: request.bucket.clone(),
            key: request.key.clone(),
        });
        state.next_upload += 1;
        let upload_id = format!("mem-upload-{:04}", state.next_upload);
        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                bucket: request.bucket.clone(),
                key: request.key.clone(),
                parts: BTreeMap::new(),
            },
        );

        let server_side_encryption = if request.server_side_encryption.is_active() {
            request.server_side_encryption.clone()
        } else {
            self.encryption.clone()
        };

        Ok(InitiateResponse {
            upload_id,
            bucket: request.bucket.clone(),
            key: request.key.clone(),
            server_side_encryption,
        })
    }

    async fn upload_part(
        &self,
        request: UploadPartRequest,
        cancel: &CancellationToken,
    ) -> StorageResult<UploadPartInfo> {
        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }

        let hook = {
            let mut state = self.lock();
            state.calls.push(RecordedCall::UploadPart {
                upload_id: request.upload_id.clone(),
                part_number: request.part_number,
                size: request.body.len(),
                is_last_part: request.is_last_part,
            });
            state.part_hook.clone()
        };
        if let Some(hook) = hook {
            hook(&request);
        }
        self.take_fault(StoreOperation::UploadPart)?;

        if let Some(latency) = self.part_latency {
            tokio::select! {
                _ = cancel.cancelled() => return Err(StorageError::Cancelled),
                _ = tokio::time::sleep(latency) => {}
            }
        }

        if let Some(progress) = &request.progress {
            for slice in request.body.chunks(PROGRESS_SLICE) {
                progress.advance(slice.len() as u64);
            }
        }

        let etag = etag_for(&request.body);
        let size = request.body.len();
        let mut state = self.lock();
        let upload = state.uploads.get_mut(&request.upload_id).ok_or_else(|| {
            Self::no_such_upload(&request.bucket, &request.key, &request.upload_id)
        })?;
        upload
            .parts
            .insert(request.part_number, (etag.clone(), request.body));

        Ok(UploadPartInfo::new(request.part_number, etag, size))
    }

    async fn complete(
        &self,
        request: CompleteRequest,
        cancel: &CancellationToken,
    ) -> StorageResult<CompleteReceipt> {
        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }

        self.lock().calls.push(RecordedCall::Complete {
            upload_id: request.upload_id.clone(),
            part_numbers: request.parts.iter().map(|p| p.part_number).collect(),
        });
        self.take_fault(StoreOperation::Complete)?;

        let mut state = self.lock();
        let upload = state.uploads.get(&request.upload_id).ok_or_else(|| {
            Self::no_such_upload(&request.bucket, &request.key, &request.upload_id)
        })?;

        if request
            .parts
            .windows(2)
            .any(|w| w[0].part_number >= w[1].part_number)
        {
            return Err(StorageError::Service {
                code: "InvalidPartOrder".to_string(),
                message: "Parts must be listed in ascending order".to_string(),
            });
        }

        let mut object = BytesMut::new();
        let mut digests = Vec::with_capacity(request.parts.len() * 16);
        for (index, part) in request.parts.iter().enumerate() {
            let (etag, body) = upload.parts.get(&part.part_number).ok_or_else(|| {
                StorageError::Service {
                    code: "InvalidPart".to_string(),
                    message: format!("Part {} was never uploaded", part.part_number),
                }
            })?;
            if *etag != part.etag {
                return Err(StorageError::Service {
                    code: "InvalidPart".to_string(),
                    message: format!("ETag mismatch for part {}", part.part_number),
                });
            }
            let is_final = index + 1 == request.parts.len();
            if self.enforce_min_part_size && !is_final && body.len() < MIN_PART_SIZE {
                return Err(StorageError::Service {
                    code: "EntityTooSmall".to_string(),
                    message: format!(
                        "Part {} is {} bytes, below the {} byte minimum",
                        part.part_number,
                        body.len(),
                        MIN_PART_SIZE
                    ),
                });
            }
            digests.extend_from_slice(&Sha256::digest(body)[..16]);
            object.extend_from_slice(body);
        }

        let etag = format!(
            "\"{}-{}\"",
            hex::encode(&Sha256::digest(&digests)[..16]),
            request.parts.len()
        );
        let bucket = upload.bucket.clone();
        let key = upload.key.clone();
        state.uploads.remove(&request.upload_id);
        state
            .objects
            .insert((bucket.clone(), key.clone()), object.freeze());

        Ok(CompleteReceipt {
            location: Some(format!("memory://{}/{}", bucket, key)),
            bucket,
            key,
            etag: Some(etag),
            version_id: None,
        })
    }

    async fn abort(&self, request: AbortRequest) -> StorageResult<AbortReceipt> {
        self.lock().calls.push(RecordedCall::Abort {
            upload_id: request.upload_id.clone(),
        });
        self.take_fault(StoreOperation::Abort)?;

        let mut state = self.lock();
        state.uploads.remove(&request.upload_id).ok_or_else(|| {
            Self::no_such_upload(&request.bucket, &request.key, &request.upload_id)
        })?;

        Ok(AbortReceipt {
            bucket: request.bucket,
            key: request.key,
            upload_id: request.upload_id,
        })
    }

    fn protocol_name(&self) -> &'static str {
        "memory"
    }
}

//! Upload session state machine
//!
//! The session owns the buffer and all multipart bookkeeping. It is never used
//! directly: [`UploadStream`](super::UploadStream) keeps it inside an
//! [`OperationLock`](crate::core::OperationLock), so every method here runs with
//! exclusive access and no two remote calls for one upload ever overlap.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::{PartProgress, UploadEvent, UploadEventKind, UploadNotifier};
use super::state::{SessionStatus, UploadState};
use crate::config::{EmptyFinalPart, StreamConfig};
use crate::core::PartBuffer;
use crate::error::{UploadError, UploadResult};
use crate::protocol::{
    AbortReceipt, AbortRequest, CompleteReceipt, CompleteRequest, InitiateRequest,
    MultipartOperations, StorageError, UploadPartInfo, UploadPartRequest, MAX_PART_NUMBER,
};

/// Final account of an upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSummary {
    pub bucket: String,
    pub key: String,
    pub upload_id: Option<String>,
    pub state: UploadState,
    pub parts: usize,
    pub bytes_uploaded: u64,
    pub etag: Option<String>,
    pub location: Option<String>,
}

pub(crate) struct UploadSession {
    client: Arc<dyn MultipartOperations>,
    request: InitiateRequest,
    config: StreamConfig,
    notifier: UploadNotifier,
    cancel: CancellationToken,
    status: Arc<SessionStatus>,

    state: UploadState,
    upload_id: Option<String>,
    bucket: String,
    key: String,
    next_part_number: i32,
    parts: Vec<UploadPartInfo>,
    bytes_uploaded: u64,
    encryption_active: bool,
    buffer: PartBuffer,
    closed: bool,
    receipt: Option<CompleteReceipt>,
}

fn remote_error(err: StorageError) -> UploadError {
    if err.is_cancelled() {
        UploadError::Cancelled
    } else {
        UploadError::Remote(err)
    }
}

impl UploadSession {
    pub(crate) fn new(
        client: Arc<dyn MultipartOperations>,
        request: InitiateRequest,
        config: StreamConfig,
        notifier: UploadNotifier,
        cancel: CancellationToken,
        status: Arc<SessionStatus>,
    ) -> Self {
        let buffer = PartBuffer::new(config.buffer_capacity, config.flush_point(false));
        Self {
            bucket: request.bucket.clone(),
            key: request.key.clone(),
            client,
            request,
            config,
            notifier,
            cancel,
            status,
            state: UploadState::Uninitiated,
            upload_id: None,
            next_part_number: 1,
            parts: Vec::new(),
            bytes_uploaded: 0,
            encryption_active: false,
            buffer,
            closed: false,
            receipt: None,
        }
    }

    pub(crate) fn client(&self) -> Arc<dyn MultipartOperations> {
        self.client.clone()
    }

    fn set_state(&mut self, state: UploadState) {
        debug!(from = %self.state, to = %state, key = %self.key, "Upload state change");
        self.state = state;
        self.status.set_state(state);
    }

    fn flush_point(&self) -> usize {
        self.config.flush_point(self.encryption_active)
    }

    /// Create the remote upload and bind its identity
    #[tracing::instrument(skip(self), fields(protocol = self.client.protocol_name(), bucket = %self.bucket, key = %self.key))]
    async fn initiate(&mut self) -> UploadResult<()> {
        let response = self
            .client
            .initiate(&self.request, &self.cancel)
            .await
            .map_err(remote_error)?;

        self.upload_id = Some(response.upload_id.clone());
        self.bucket = response.bucket.clone();
        self.key = response.key.clone();
        self.encryption_active = response.server_side_encryption.is_active();
        self.buffer = PartBuffer::new(self.config.buffer_capacity, self.flush_point());
        self.status.set_upload_id(&response.upload_id);
        self.set_state(UploadState::Uploading);

        info!(
            upload_id = %response.upload_id,
            encrypted = self.encryption_active,
            "Initiated multipart upload"
        );
        self.notifier.notify(UploadEvent::Initiated(response));

        if self.cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }
        Ok(())
    }

    /// Append bytes, cutting parts whenever the flush point is reached
    pub(crate) async fn write(&mut self, data: &[u8]) -> UploadResult<()> {
        if self.cancel.is_cancelled() || self.state == UploadState::Aborted {
            return Ok(());
        }
        if self.closed {
            return Err(UploadError::Sequence(
                "write after the stream was closed".to_string(),
            ));
        }
        if self.state == UploadState::Completed {
            return Err(UploadError::Sequence(
                "write after the upload completed".to_string(),
            ));
        }

        if self.state == UploadState::Uninitiated {
            self.initiate().await?;
        }

        let flush_point = self.flush_point();
        let mut remaining = data;
        while !remaining.is_empty() {
            if self.cancel.is_cancelled() {
                return Err(UploadError::Cancelled);
            }

            let consumed = self.buffer.fill(remaining, flush_point);
            remaining = &remaining[consumed..];

            if self.buffer.len() >= flush_point {
                self.flush(false).await?;
            }
        }

        Ok(())
    }

    /// Transmit the buffered bytes as the next part, if the size policy allows
    async fn flush(&mut self, is_last_part: bool) -> UploadResult<()> {
        if self.cancel.is_cancelled()
            || self.state != UploadState::Uploading
            || (!is_last_part && self.buffer.is_empty())
        {
            return Ok(());
        }

        let withhold = self.encryption_active && !is_last_part;
        let size = self.buffer.part_len(withhold);

        if !is_last_part && size < self.config.min_part_size {
            return Ok(());
        }
        if is_last_part && size == 0 && self.config.empty_final_part == EmptyFinalPart::Skip {
            debug!(key = %self.key, "Skipping empty final part");
            return Ok(());
        }

        let part_number = self.next_part_number;
        if part_number > MAX_PART_NUMBER {
            return Err(UploadError::Remote(StorageError::MultipartUpload(format!(
                "part number {} exceeds the limit of {} parts",
                part_number, MAX_PART_NUMBER
            ))));
        }

        let upload_id = self.upload_id.clone().ok_or_else(|| {
            UploadError::Sequence("no upload id bound to an uploading session".to_string())
        })?;

        let body = self.buffer.take_part(withhold);
        let progress = (size > 0 && self.notifier.has_listener(UploadEventKind::PartUploaded))
            .then(|| PartProgress::new(self.notifier.clone(), part_number, size as u64));

        let request = UploadPartRequest {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            upload_id,
            part_number,
            body: body.clone(),
            is_last_part,
            progress,
        };

        debug!(part_number, size, is_last_part, key = %self.key, "Uploading part");
        let info = match self.client.upload_part(request, &self.cancel).await {
            Ok(info) => info,
            Err(e) => {
                self.buffer.restore(body);
                return Err(remote_error(e));
            }
        };

        self.next_part_number += 1;
        self.bytes_uploaded += size as u64;
        self.status.record_part(&info, self.bytes_uploaded);
        self.parts.push(info.clone());

        if size > 0 {
            self.notifier.notify(UploadEvent::PartUploaded(info));
        }

        if self.cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }
        Ok(())
    }

    /// Send the final part and assemble the object
    #[tracing::instrument(skip(self), fields(bucket = %self.bucket, key = %self.key))]
    pub(crate) async fn complete_upload(&mut self) -> UploadResult<CompleteReceipt> {
        if self.state != UploadState::Uploading {
            return Err(UploadError::Sequence(format!(
                "cannot complete an upload that is {}",
                self.state
            )));
        }
        if self.cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        self.flush(true).await?;

        let mut parts = self.parts.clone();
        parts.sort_by_key(|p| p.part_number);
        let part_count = parts.len();

        let request = CompleteRequest {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            upload_id: self.upload_id.clone().unwrap_or_default(),
            parts,
        };
        let receipt = self
            .client
            .complete(request, &self.cancel)
            .await
            .map_err(remote_error)?;

        self.set_state(UploadState::Completed);
        info!(
            parts = part_count,
            bytes = self.bytes_uploaded,
            etag = receipt.etag.as_deref().unwrap_or(""),
            "Completed multipart upload"
        );
        self.receipt = Some(receipt.clone());
        self.notifier.notify(UploadEvent::Completed(receipt.clone()));
        Ok(receipt)
    }

    /// Discard the remote upload; buffered bytes are dropped
    #[tracing::instrument(skip(self), fields(bucket = %self.bucket, key = %self.key))]
    pub(crate) async fn abort_upload(&mut self) -> UploadResult<AbortReceipt> {
        let request = self.pending_abort().ok_or_else(|| {
            UploadError::Sequence(format!("cannot abort an upload that is {}", self.state))
        })?;

        self.buffer.clear();
        let receipt = self.client.abort(request).await.map_err(UploadError::Remote)?;

        self.set_state(UploadState::Aborted);
        info!(
            upload_id = %receipt.upload_id,
            parts_discarded = self.parts.len(),
            "Aborted multipart upload"
        );
        self.notifier.notify(UploadEvent::Aborted(receipt.clone()));
        Ok(receipt)
    }

    /// Abort request for a remote upload still in flight
    pub(crate) fn pending_abort(&self) -> Option<AbortRequest> {
        if self.state != UploadState::Uploading {
            return None;
        }
        self.upload_id.as_ref().map(|upload_id| AbortRequest {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            upload_id: upload_id.clone(),
        })
    }

    /// Close the session: abort when cancelled, complete otherwise.
    ///
    /// A close that fails never leaves the remote upload pending: the upload is
    /// aborted and the original error returned. Later calls only retry an abort
    /// that did not go through.
    pub(crate) async fn teardown(&mut self) -> UploadResult<()> {
        if self.closed {
            return self.discard().await;
        }
        self.closed = true;

        if self.cancel.is_cancelled() {
            return self.discard().await;
        }

        let result = match self.state {
            UploadState::Uninitiated => match self.initiate().await {
                Ok(()) => self.complete_upload().await.map(drop),
                Err(e) => Err(e),
            },
            UploadState::Uploading => self.complete_upload().await.map(drop),
            UploadState::Completed | UploadState::Aborted => Ok(()),
        };

        match result {
            Err(e) if e.is_cancelled() => {
                self.discard().await?;
                Err(e)
            }
            Err(e) => {
                warn!(key = %self.key, error = %e, "Close failed, aborting the upload");
                if let Err(abort_err) = self.discard().await {
                    warn!(key = %self.key, error = %abort_err, "Abort after failed close did not go through");
                }
                Err(e)
            }
            ok => ok,
        }
    }

    /// Abort whatever is still open remotely, or end locally if nothing is
    async fn discard(&mut self) -> UploadResult<()> {
        match self.state {
            UploadState::Uploading => self.abort_upload().await.map(drop),
            UploadState::Uninitiated => {
                debug!(key = %self.key, "Nothing reached the store, ending locally");
                self.set_state(UploadState::Aborted);
                Ok(())
            }
            UploadState::Completed | UploadState::Aborted => Ok(()),
        }
    }

    pub(crate) fn summary(&self) -> UploadSummary {
        UploadSummary {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            upload_id: self.upload_id.clone(),
            state: self.state,
            parts: self.parts.len(),
            bytes_uploaded: self.bytes_uploaded,
            etag: self.receipt.as_ref().and_then(|r| r.etag.clone()),
            location: self.receipt.as_ref().and_then(|r| r.location.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::memory::{MemoryMultipartStore, RecordedCall};
    use crate::protocol::{ServerSideEncryption, MIN_PART_SIZE};

    const MIB: usize = 1024 * 1024;

    fn session_with(
        store: Arc<MemoryMultipartStore>,
        config: StreamConfig,
    ) -> (UploadSession, CancellationToken, UploadNotifier) {
        let cancel = CancellationToken::new();
        let notifier = UploadNotifier::new();
        let session = UploadSession::new(
            store,
            InitiateRequest::new("test-bucket", "object.bin"),
            config,
            notifier.clone(),
            cancel.clone(),
            Arc::new(SessionStatus::new()),
        );
        (session, cancel, notifier)
    }

    #[tokio::test]
    async fn test_write_initiates_lazily() {
        let store = Arc::new(MemoryMultipartStore::new());
        let (mut session, _, notifier) = session_with(store.clone(), StreamConfig::default());
        let mut events = notifier.subscribe(&[UploadEventKind::Initiated]);

        assert!(store.calls().is_empty());
        session.write(b"abc").await.unwrap();

        assert_eq!(session.state, UploadState::Uploading);
        assert_eq!(session.upload_id.as_deref(), Some("mem-upload-0001"));
        assert!(matches!(events.try_recv(), Ok(UploadEvent::Initiated(_))));
        assert_eq!(store.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_flush_cuts_parts_at_threshold() {
        let store = Arc::new(MemoryMultipartStore::new());
        let (mut session, _, _) = session_with(store.clone(), StreamConfig::default());

        session.write(&vec![7u8; 11 * MIB]).await.unwrap();
        assert_eq!(store.part_sizes(), vec![5 * MIB, 5 * MIB]);
        assert_eq!(session.buffer.len(), MIB);
        assert_eq!(session.next_part_number, 3);

        session.complete_upload().await.unwrap();
        assert_eq!(store.part_sizes(), vec![5 * MIB, 5 * MIB, MIB]);
        assert_eq!(session.bytes_uploaded, (11 * MIB) as u64);
    }

    #[tokio::test]
    async fn test_encrypted_parts_withhold_one_byte() {
        let store = Arc::new(MemoryMultipartStore::new().with_encryption(ServerSideEncryption::Aes256));
        let (mut session, _, _) = session_with(store.clone(), StreamConfig::default());

        session.write(&vec![1u8; 2 * MIN_PART_SIZE + 2]).await.unwrap();
        assert!(session.encryption_active);
        assert_eq!(store.part_sizes(), vec![MIN_PART_SIZE, MIN_PART_SIZE]);
        assert_eq!(session.buffer.len(), 2);

        session.complete_upload().await.unwrap();
        assert_eq!(store.part_sizes().last(), Some(&2));
    }

    #[tokio::test]
    async fn test_failed_part_is_restored() {
        let store = Arc::new(MemoryMultipartStore::new());
        let (mut session, _, _) = session_with(store.clone(), StreamConfig::default());
        store.fail_next(
            crate::protocol::memory::StoreOperation::UploadPart,
            StorageError::Network("reset".to_string()),
        );

        let err = session.write(&vec![3u8; 5 * MIB]).await.unwrap_err();
        assert!(matches!(err, UploadError::Remote(StorageError::Network(_))));
        assert_eq!(session.buffer.len(), 5 * MIB);
        assert!(session.parts.is_empty());

        session.complete_upload().await.unwrap();
        assert_eq!(store.object("test-bucket", "object.bin").unwrap().len(), 5 * MIB);
    }

    #[tokio::test]
    async fn test_complete_requires_uploading() {
        let store = Arc::new(MemoryMultipartStore::new());
        let (mut session, _, _) = session_with(store, StreamConfig::default());

        let err = session.complete_upload().await.unwrap_err();
        assert!(matches!(err, UploadError::Sequence(_)));
        let err = session.abort_upload().await.unwrap_err();
        assert!(matches!(err, UploadError::Sequence(_)));
    }

    #[tokio::test]
    async fn test_abort_discards_buffer() {
        let store = Arc::new(MemoryMultipartStore::new());
        let (mut session, _, _) = session_with(store.clone(), StreamConfig::default());

        session.write(b"pending bytes").await.unwrap();
        session.abort_upload().await.unwrap();

        assert_eq!(session.state, UploadState::Aborted);
        assert!(session.buffer.is_empty());
        assert!(store.part_sizes().is_empty());
        assert_eq!(store.pending_uploads(), 0);
    }

    #[tokio::test]
    async fn test_teardown_runs_once() {
        let store = Arc::new(MemoryMultipartStore::new());
        let (mut session, _, _) = session_with(store.clone(), StreamConfig::default());

        session.write(b"x").await.unwrap();
        session.teardown().await.unwrap();
        session.teardown().await.unwrap();

        assert_eq!(store.complete_calls(), 1);
        assert!(matches!(
            session.write(b"y").await,
            Err(UploadError::Sequence(_))
        ));
    }

    #[tokio::test]
    async fn test_cancelled_teardown_before_initiate_is_local() {
        let store = Arc::new(MemoryMultipartStore::new());
        let (mut session, cancel, _) = session_with(store.clone(), StreamConfig::default());

        cancel.cancel();
        session.write(b"ignored").await.unwrap();
        session.teardown().await.unwrap();

        assert_eq!(session.state, UploadState::Aborted);
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_initiate_on_close_ends_locally() {
        let store = Arc::new(MemoryMultipartStore::new());
        let (mut session, _, _) = session_with(store.clone(), StreamConfig::default());
        store.fail_next(
            crate::protocol::memory::StoreOperation::Initiate,
            StorageError::AccessDenied("denied".to_string()),
        );

        let err = session.teardown().await.unwrap_err();
        assert!(matches!(err, UploadError::Remote(StorageError::AccessDenied(_))));
        assert_eq!(session.state, UploadState::Aborted);

        session.teardown().await.unwrap();
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_after_part_keeps_bookkeeping() {
        let store = Arc::new(MemoryMultipartStore::new());
        let (mut session, cancel, _) = session_with(store.clone(), StreamConfig::default());
        let token = cancel.clone();
        store.set_part_hook(Arc::new(move |_| token.cancel()));

        let err = session.write(&vec![0u8; 5 * MIB]).await.unwrap_err();
        assert!(matches!(err, UploadError::Cancelled));
        assert_eq!(session.parts.len(), 1);
        assert_eq!(session.bytes_uploaded, (5 * MIB) as u64);

        session.teardown().await.unwrap();
        assert_eq!(session.state, UploadState::Aborted);
        assert!(matches!(store.calls().last(), Some(RecordedCall::Abort { .. })));
        assert_eq!(store.complete_calls(), 0);
    }

    #[tokio::test]
    async fn test_summary_after_completion() {
        let store = Arc::new(MemoryMultipartStore::new());
        let (mut session, _, _) = session_with(store, StreamConfig::default());

        session.write(b"summary").await.unwrap();
        session.teardown().await.unwrap();

        let summary = session.summary();
        assert_eq!(summary.state, UploadState::Completed);
        assert_eq!(summary.parts, 1);
        assert_eq!(summary.bytes_uploaded, 7);
        assert!(summary.etag.is_some());
        assert_eq!(
            summary.location.as_deref(),
            Some("memory://test-bucket/object.bin")
        );
    }
}

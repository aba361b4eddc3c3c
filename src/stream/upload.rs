//! Public upload stream handle

use futures::FutureExt;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::{UploadEvent, UploadEventKind, UploadNotifier};
use super::session::{UploadSession, UploadSummary};
use super::state::{SessionStatus, UploadState};
use super::writer::{BlockingUploadWriter, UploadWriter};
use crate::config::{EmptyFinalPart, StreamConfig};
use crate::core::OperationLock;
use crate::error::{UploadError, UploadResult};
use crate::protocol::{InitiateRequest, MultipartOperations, UploadPartInfo};

/// A write-only byte stream that lands in an object store as a multipart upload.
///
/// Writes are buffered and cut into parts of at least the configured minimum
/// size. [`close`](Self::close) completes the upload, or aborts it when
/// [`cancel`](Self::cancel) was called first. All operations on one stream are
/// serialized, so the handle can be shared between tasks behind an `Arc`.
///
/// Dropping a stream whose upload is still in flight starts a background abort
/// on the current tokio runtime; it never completes the upload implicitly.
pub struct UploadStream {
    lock: OperationLock<UploadSession>,
    cancel: CancellationToken,
    notifier: UploadNotifier,
    status: Arc<SessionStatus>,
    request: InitiateRequest,
}

impl UploadStream {
    /// Start configuring a stream that uploads through `client`
    pub fn builder(client: Arc<dyn MultipartOperations>) -> UploadStreamBuilder {
        UploadStreamBuilder::new(client)
    }

    /// Create a stream for a prebuilt request
    pub fn new(
        client: Arc<dyn MultipartOperations>,
        request: InitiateRequest,
        config: StreamConfig,
    ) -> UploadResult<Self> {
        Self::with_cancellation(client, request, config, CancellationToken::new())
    }

    fn with_cancellation(
        client: Arc<dyn MultipartOperations>,
        request: InitiateRequest,
        config: StreamConfig,
        cancel: CancellationToken,
    ) -> UploadResult<Self> {
        config.validate()?;
        request.validate().map_err(UploadError::Config)?;

        let notifier = UploadNotifier::new();
        let status = Arc::new(SessionStatus::new());
        let lock_timeout = config.lock_timeout();
        let session = UploadSession::new(
            client,
            request.clone(),
            config,
            notifier.clone(),
            cancel.clone(),
            status.clone(),
        );

        Ok(Self {
            lock: OperationLock::new(session, lock_timeout)?,
            cancel,
            notifier,
            status,
            request,
        })
    }

    /// Append bytes to the upload.
    ///
    /// The first write creates the remote upload. Writes after cancellation or
    /// abort are ignored; writes after close or completion fail.
    pub async fn write(&self, data: &[u8]) -> UploadResult<()> {
        let mut session = self.lock.acquire().await?;
        session.write(data).await
    }

    /// Finish the upload: complete it, or abort it if cancellation was requested.
    ///
    /// Only the first call does anything; later calls return `Ok(())`.
    pub async fn close(&self) -> UploadResult<()> {
        self.lock.run(|session| session.teardown().boxed()).await
    }

    /// Close the stream and report what was uploaded
    pub async fn finish(&self) -> UploadResult<UploadSummary> {
        self.close().await?;
        self.summary().await
    }

    /// Snapshot of the upload, taken between operations
    pub async fn summary(&self) -> UploadResult<UploadSummary> {
        self.lock
            .call(|session| async move { Ok(session.summary()) }.boxed())
            .await
    }

    /// Request cancellation. Idempotent; the upload is aborted on close.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            debug!(bucket = %self.request.bucket, key = %self.request.key, "Upload cancellation requested");
        }
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token that cancels this stream when triggered
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Current lifecycle state
    pub fn state(&self) -> UploadState {
        self.status.state()
    }

    /// Receiver that observes every state change
    pub fn watch_state(&self) -> watch::Receiver<UploadState> {
        self.status.watch()
    }

    /// Upload id, once the remote upload exists
    pub fn upload_id(&self) -> Option<String> {
        self.status.upload_id()
    }

    /// Parts acknowledged so far, in transmission order
    pub fn parts(&self) -> Vec<UploadPartInfo> {
        self.status.parts()
    }

    /// Bytes acknowledged by the store so far; buffered bytes are not counted
    pub fn len(&self) -> u64 {
        self.status.bytes_uploaded()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Always fails: the final size of a stream is whatever was written
    pub fn set_len(&self, _len: u64) -> UploadResult<()> {
        Err(UploadError::Unsupported {
            operation: "set_len",
        })
    }

    pub fn bucket(&self) -> &str {
        &self.request.bucket
    }

    pub fn key(&self) -> &str {
        &self.request.key
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock.timeout()
    }

    /// Subscribe to a set of event kinds
    pub fn subscribe(&self, kinds: &[UploadEventKind]) -> UnboundedReceiver<UploadEvent> {
        self.notifier.subscribe(kinds)
    }

    /// Subscribe to every event kind
    pub fn subscribe_all(&self) -> UnboundedReceiver<UploadEvent> {
        self.notifier.subscribe_all()
    }

    /// Wrap the stream in a `tokio::io::AsyncWrite` adapter
    pub fn into_writer(self) -> UploadWriter {
        UploadWriter::new(Arc::new(self))
    }

    /// Wrap the stream in a blocking `std::io::Write` adapter driven by `handle`
    pub fn into_blocking_writer(self, handle: Handle) -> BlockingUploadWriter {
        BlockingUploadWriter::new(Arc::new(self), handle)
    }
}

impl fmt::Debug for UploadStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadStream")
            .field("bucket", &self.request.bucket)
            .field("key", &self.request.key)
            .field("state", &self.state())
            .field("upload_id", &self.upload_id())
            .field("bytes_uploaded", &self.len())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl Drop for UploadStream {
    fn drop(&mut self) {
        let session = self.lock.get_mut();
        let Some(request) = session.pending_abort() else {
            return;
        };
        let client = session.client();

        match Handle::try_current() {
            Ok(handle) => {
                warn!(
                    bucket = %request.bucket,
                    key = %request.key,
                    upload_id = %request.upload_id,
                    "Upload stream dropped without close; aborting in background"
                );
                handle.spawn(async move {
                    match client.abort(request).await {
                        Ok(receipt) => info!(
                            upload_id = %receipt.upload_id,
                            "Background abort of dropped upload succeeded"
                        ),
                        Err(e) => warn!(error = %e, "Background abort of dropped upload failed"),
                    }
                });
            }
            Err(_) => warn!(
                bucket = %request.bucket,
                key = %request.key,
                upload_id = %request.upload_id,
                "Upload stream dropped outside a tokio runtime; multipart upload left pending"
            ),
        }
    }
}

/// Builder for [`UploadStream`]
pub struct UploadStreamBuilder {
    client: Arc<dyn MultipartOperations>,
    request: InitiateRequest,
    config: StreamConfig,
    cancel: Option<CancellationToken>,
}

impl UploadStreamBuilder {
    fn new(client: Arc<dyn MultipartOperations>) -> Self {
        Self {
            client,
            request: InitiateRequest::default(),
            config: StreamConfig::default(),
            cancel: None,
        }
    }

    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.request.bucket = bucket.into();
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.request.key = key.into();
        self
    }

    /// Use a prebuilt request; replaces any bucket or key set earlier
    pub fn request(mut self, request: InitiateRequest) -> Self {
        self.request = request;
        self
    }

    pub fn config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    pub fn buffer_capacity(mut self, bytes: usize) -> Self {
        self.config.buffer_capacity = bytes;
        self
    }

    pub fn min_part_size(mut self, bytes: usize) -> Self {
        self.config.min_part_size = bytes;
        self
    }

    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.config.lock_timeout_ms = timeout.as_millis().min(u64::MAX as u128) as u64;
        self
    }

    pub fn empty_final_part(mut self, behavior: EmptyFinalPart) -> Self {
        self.config.empty_final_part = behavior;
        self
    }

    /// Cancel the stream whenever `token` is cancelled
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Validate everything and create the stream
    pub fn build(self) -> UploadResult<UploadStream> {
        let cancel = self
            .cancel
            .map(|parent| parent.child_token())
            .unwrap_or_default();
        UploadStream::with_cancellation(self.client, self.request, self.config, cancel)
    }
}

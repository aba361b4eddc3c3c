//! Upload lifecycle state and the status mirror read by accessors

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;

use crate::protocol::UploadPartInfo;

/// Lifecycle state of an upload stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    /// No remote upload exists yet
    #[default]
    Uninitiated,

    /// Remote upload created; parts may be transmitted
    Uploading,

    /// Object assembled by the store
    Completed,

    /// Upload discarded
    Aborted,
}

impl UploadState {
    /// Completed and Aborted are final; nothing leaves them
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadState::Completed | UploadState::Aborted)
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UploadState::Uninitiated => "uninitiated",
            UploadState::Uploading => "uploading",
            UploadState::Completed => "completed",
            UploadState::Aborted => "aborted",
        };
        write!(f, "{}", s)
    }
}

/// Copy of session bookkeeping readable without taking the operation lock.
///
/// Only the session writes here, and always while it holds the lock.
#[derive(Debug)]
pub(crate) struct SessionStatus {
    state: watch::Sender<UploadState>,
    bytes_uploaded: AtomicU64,
    upload_id: Mutex<Option<String>>,
    parts: Mutex<Vec<UploadPartInfo>>,
}

impl SessionStatus {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(UploadState::Uninitiated);
        Self {
            state,
            bytes_uploaded: AtomicU64::new(0),
            upload_id: Mutex::new(None),
            parts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn state(&self) -> UploadState {
        *self.state.borrow()
    }

    pub(crate) fn watch(&self) -> watch::Receiver<UploadState> {
        self.state.subscribe()
    }

    pub(crate) fn set_state(&self, state: UploadState) {
        self.state.send_replace(state);
    }

    pub(crate) fn bytes_uploaded(&self) -> u64 {
        self.bytes_uploaded.load(Ordering::Acquire)
    }

    pub(crate) fn upload_id(&self) -> Option<String> {
        self.upload_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_upload_id(&self, upload_id: &str) {
        *self.upload_id.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(upload_id.to_string());
    }

    pub(crate) fn parts(&self) -> Vec<UploadPartInfo> {
        self.parts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn record_part(&self, part: &UploadPartInfo, bytes_uploaded: u64) {
        self.parts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(part.clone());
        self.bytes_uploaded.store(bytes_uploaded, Ordering::Release);
    }
}

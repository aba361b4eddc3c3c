//! Upload lifecycle notifications
//!
//! Callers observe an [`UploadStream`](super::UploadStream) by subscribing to
//! typed [`UploadEvent`]s. Each subscription is an unbounded tokio channel that
//! only receives the event kinds it asked for; a listener exists for as long as
//! its receiver is alive.
//!
//! Firing points:
//! - `Initiated` after the remote upload was created
//! - `PartUploaded` after each transmitted part that carried data
//! - `TransferProgress` while a part is in flight, but only when at least one
//!   `PartUploaded` listener exists and the part is non-empty
//! - `Completed` after a successful completion call
//! - `Aborted` after a successful abort call
//!
//! # Example
//!
//! ```no_run
//! use upstream_s3::stream::{UploadEvent, UploadEventKind, UploadStream};
//!
//! # async fn watch(stream: &UploadStream) {
//! let mut events = stream.subscribe(&[UploadEventKind::PartUploaded]);
//! tokio::spawn(async move {
//!     while let Some(event) = events.recv().await {
//!         if let UploadEvent::PartUploaded(part) = event {
//!             println!("part {} stored ({} bytes)", part.part_number, part.size);
//!         }
//!     }
//! });
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::protocol::{AbortReceipt, CompleteReceipt, InitiateResponse, UploadPartInfo};

/// Kinds of events a listener can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UploadEventKind {
    /// Remote upload created
    Initiated,
    /// A data-carrying part was acknowledged
    PartUploaded,
    /// Bytes of an in-flight part were transferred
    TransferProgress,
    /// Upload completed
    Completed,
    /// Upload aborted
    Aborted,
}

impl UploadEventKind {
    /// Every event kind
    pub const ALL: [UploadEventKind; 5] = [
        UploadEventKind::Initiated,
        UploadEventKind::PartUploaded,
        UploadEventKind::TransferProgress,
        UploadEventKind::Completed,
        UploadEventKind::Aborted,
    ];
}

/// Event emitted by an upload stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UploadEvent {
    /// Remote upload created
    Initiated(InitiateResponse),

    /// A data-carrying part was acknowledged
    PartUploaded(UploadPartInfo),

    /// Bytes of an in-flight part were handed to the transport
    TransferProgress {
        /// Part being transmitted
        part_number: i32,
        /// Bytes transferred since the previous progress event for this part
        bytes: u64,
        /// Total size of the part
        part_size: u64,
    },

    /// Upload completed
    Completed(CompleteReceipt),

    /// Upload aborted
    Aborted(AbortReceipt),
}

impl UploadEvent {
    /// The kind of this event
    pub fn kind(&self) -> UploadEventKind {
        match self {
            UploadEvent::Initiated(_) => UploadEventKind::Initiated,
            UploadEvent::PartUploaded(_) => UploadEventKind::PartUploaded,
            UploadEvent::TransferProgress { .. } => UploadEventKind::TransferProgress,
            UploadEvent::Completed(_) => UploadEventKind::Completed,
            UploadEvent::Aborted(_) => UploadEventKind::Aborted,
        }
    }
}

struct Listener {
    kinds: Vec<UploadEventKind>,
    sender: UnboundedSender<UploadEvent>,
}

impl Listener {
    fn wants(&self, kind: UploadEventKind) -> bool {
        self.kinds.contains(&kind) && !self.sender.is_closed()
    }
}

/// Registry of event listeners shared by a stream and its session
#[derive(Clone, Default)]
pub struct UploadNotifier {
    listeners: Arc<Mutex<Vec<Listener>>>,
}

impl UploadNotifier {
    /// Create a notifier with no listeners
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a set of event kinds
    pub fn subscribe(&self, kinds: &[UploadEventKind]) -> UnboundedReceiver<UploadEvent> {
        let (sender, receiver) = unbounded_channel();
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        listeners.push(Listener {
            kinds: kinds.to_vec(),
            sender,
        });
        receiver
    }

    /// Subscribe to every event kind
    pub fn subscribe_all(&self) -> UnboundedReceiver<UploadEvent> {
        self.subscribe(&UploadEventKind::ALL)
    }

    /// Whether a live listener for `kind` exists
    pub fn has_listener(&self, kind: UploadEventKind) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        listeners.retain(|l| !l.sender.is_closed());
        listeners.iter().any(|l| l.wants(kind))
    }

    /// Deliver an event to every listener subscribed to its kind
    pub fn notify(&self, event: UploadEvent) {
        let kind = event.kind();
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        // Dropped receivers are pruned on send failure.
        listeners.retain(|l| !l.kinds.contains(&kind) || l.sender.send(event.clone()).is_ok());
    }

    /// Number of live listeners
    pub fn listener_count(&self) -> usize {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        listeners.retain(|l| !l.sender.is_closed());
        listeners.len()
    }
}

impl fmt::Debug for UploadNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadNotifier")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Progress sink handed to the remote client for one part transmission
#[derive(Clone)]
pub struct PartProgress {
    notifier: UploadNotifier,
    part_number: i32,
    part_size: u64,
}

impl PartProgress {
    pub(crate) fn new(notifier: UploadNotifier, part_number: i32, part_size: u64) -> Self {
        Self {
            notifier,
            part_number,
            part_size,
        }
    }

    /// Part this sink reports for
    pub fn part_number(&self) -> i32 {
        self.part_number
    }

    /// Total size of the part
    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    /// Forward `bytes` newly transferred bytes.
    ///
    /// Signals stop as soon as the last `PartUploaded` listener goes away.
    pub fn advance(&self, bytes: u64) {
        if bytes == 0 || !self.notifier.has_listener(UploadEventKind::PartUploaded) {
            return;
        }
        self.notifier.notify(UploadEvent::TransferProgress {
            part_number: self.part_number,
            bytes,
            part_size: self.part_size,
        });
    }
}

impl fmt::Debug for PartProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartProgress")
            .field("part_number", &self.part_number)
            .field("part_size", &self.part_size)
            .finish()
    }
}

//! Buffered multipart upload streams
//!
//! An [`UploadStream`] turns arbitrary incremental writes into a valid multipart
//! upload: bytes are buffered until a part of at least the minimum part size can
//! be cut, parts are sent strictly in order, and closing either completes the
//! object or, after [`UploadStream::cancel`], aborts it.

pub mod events;
mod session;
mod state;
mod upload;
mod writer;

pub use events::{PartProgress, UploadEvent, UploadEventKind, UploadNotifier};
pub use session::UploadSummary;
pub use state::UploadState;
pub use upload::{UploadStream, UploadStreamBuilder};
pub use writer::{BlockingUploadWriter, UploadWriter};

/*!
 * Core building blocks shared by upload streams
 */

pub mod buffer;
pub mod concurrency;

pub use buffer::PartBuffer;
pub use concurrency::{OperationLock, DEFAULT_LOCK_TIMEOUT};

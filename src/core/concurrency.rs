/*!
 * Operation lock serializing every mutating call on an upload session
 *
 * A single-slot async lock with a bounded acquisition wait. Holding the lock is
 * the only thing that orders writes, flushes and teardown; the guard is released
 * on every exit path, including errors and cancelled futures.
 */

use futures::future::BoxFuture;
use std::fmt;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

use crate::error::{UploadError, UploadResult};

/// Default time to wait for the lock before giving up
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

/// Single-slot lock owning a value, with an acquisition timeout
pub struct OperationLock<T> {
    inner: Mutex<T>,
    timeout: Duration,
}

impl<T> OperationLock<T> {
    /// Create a new lock around `value`
    ///
    /// # Arguments
    /// * `timeout` - Maximum time an operation waits for the lock; must be non-zero
    pub fn new(value: T, timeout: Duration) -> UploadResult<Self> {
        if timeout.is_zero() {
            return Err(UploadError::Config(
                "Lock acquisition timeout must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            inner: Mutex::new(value),
            timeout,
        })
    }

    /// Acquire the lock, waiting at most the configured timeout
    pub async fn acquire(&self) -> UploadResult<MutexGuard<'_, T>> {
        tokio::time::timeout(self.timeout, self.inner.lock())
            .await
            .map_err(|_| UploadError::LockTimeout(self.timeout))
    }

    /// Try to acquire the lock without waiting
    pub fn try_acquire(&self) -> Option<MutexGuard<'_, T>> {
        self.inner.try_lock().ok()
    }

    /// Run an operation that produces no value while holding the lock
    pub async fn run<F>(&self, op: F) -> UploadResult<()>
    where
        F: for<'a> FnOnce(&'a mut T) -> BoxFuture<'a, UploadResult<()>>,
    {
        self.call(op).await
    }

    /// Run an operation producing a value while holding the lock
    pub async fn call<R, F>(&self, op: F) -> UploadResult<R>
    where
        F: for<'a> FnOnce(&'a mut T) -> BoxFuture<'a, UploadResult<R>>,
    {
        let mut guard = self.acquire().await?;
        op(&mut *guard).await
    }

    /// Get the configured acquisition timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Access the value without locking; exclusive borrow proves no one else holds it
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}

impl<T> fmt::Debug for OperationLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationLock")
            .field("timeout", &self.timeout)
            .field("locked", &self.inner.try_lock().is_err())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_zero_timeout_rejected() {
        let result = OperationLock::new(0u32, Duration::ZERO);
        assert!(matches!(result, Err(UploadError::Config(_))));
    }

    #[tokio::test]
    async fn test_call_returns_value() {
        let lock = OperationLock::new(41u32, DEFAULT_LOCK_TIMEOUT).unwrap();

        let value = lock
            .call(|v| {
                async move {
                    *v += 1;
                    Ok(*v)
                }
                .boxed()
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_lock_released_after_error() {
        let lock = OperationLock::new(Vec::<u8>::new(), Duration::from_millis(50)).unwrap();

        let result = lock
            .run(|v| {
                async move {
                    v.push(1);
                    Err(UploadError::Sequence("boom".to_string()))
                }
                .boxed()
            })
            .await;
        assert!(matches!(result, Err(UploadError::Sequence(_))));

        lock.run(|v| {
            async move {
                v.push(2);
                Ok(())
            }
            .boxed()
        })
        .await
        .unwrap();

        assert_eq!(*lock.acquire().await.unwrap(), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_times_out() {
        let lock = OperationLock::new((), Duration::from_millis(100)).unwrap();
        let _held = lock.acquire().await.unwrap();

        let result = lock.run(|_| async { Ok(()) }.boxed()).await;
        match result {
            Err(UploadError::LockTimeout(waited)) => {
                assert_eq!(waited, Duration::from_millis(100))
            }
            other => panic!("expected lock timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_try_acquire() {
        let lock = OperationLock::new(0u8, DEFAULT_LOCK_TIMEOUT).unwrap();

        let guard = lock.try_acquire();
        assert!(guard.is_some());
        assert!(lock.try_acquire().is_none());

        drop(guard);
        assert!(lock.try_acquire().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_operations_never_overlap() {
        let lock = Arc::new(OperationLock::new(0usize, DEFAULT_LOCK_TIMEOUT).unwrap());
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let lock = lock.clone();
            let active = active.clone();
            let max_active = max_active.clone();

            handles.push(tokio::spawn(async move {
                lock.run(|count| {
                    async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        max_active.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        *count += 1;
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    }
                    .boxed()
                })
                .await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(max_active.load(Ordering::SeqCst), 1);
        assert_eq!(*lock.acquire().await.unwrap(), 16);
    }
}

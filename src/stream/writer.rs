//! I/O adapters over [`UploadStream`]
//!
//! [`UploadWriter`] plugs a stream into anything that takes a
//! `tokio::io::AsyncWrite` (`tokio::io::copy`, encoders, serializers).
//! [`BlockingUploadWriter`] does the same for synchronous `std::io::Write`
//! producers running outside the runtime, e.g. inside `spawn_blocking`.
//!
//! Both also implement the read and seek traits so generic code gets a clear
//! `ErrorKind::Unsupported` instead of a missing-trait compile error.

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::io::{self, SeekFrom};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncSeek, AsyncWrite, ReadBuf};
use tokio::runtime::Handle;

use super::upload::UploadStream;
use crate::error::{UploadError, UploadResult};

fn unsupported(operation: &'static str) -> io::Error {
    UploadError::Unsupported { operation }.into()
}

fn seek_operation(position: SeekFrom) -> &'static str {
    if position == SeekFrom::Current(0) {
        "position"
    } else {
        "seek"
    }
}

/// `AsyncWrite` adapter; shutdown closes the upload
pub struct UploadWriter {
    stream: Arc<UploadStream>,
    pending: Option<BoxFuture<'static, UploadResult<usize>>>,
    closing: Option<BoxFuture<'static, UploadResult<()>>>,
}

impl UploadWriter {
    pub fn new(stream: Arc<UploadStream>) -> Self {
        Self {
            stream,
            pending: None,
            closing: None,
        }
    }

    /// The underlying stream, for status and subscriptions
    pub fn stream(&self) -> &Arc<UploadStream> {
        &self.stream
    }

    /// Drive an in-flight write to completion
    fn poll_pending(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if let Some(fut) = self.pending.as_mut() {
            let result = futures::ready!(fut.as_mut().poll(cx));
            self.pending = None;
            result.map_err(io::Error::from)?;
        }
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for UploadWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let stream = &this.stream;
        let fut = this.pending.get_or_insert_with(|| {
            let stream = stream.clone();
            let data = Bytes::copy_from_slice(buf);
            async move { stream.write(&data).await.map(|()| data.len()) }.boxed()
        });

        let result = futures::ready!(fut.as_mut().poll(cx));
        this.pending = None;
        // A retry may pass a shorter slice than the one the write started with
        Poll::Ready(result.map(|n| n.min(buf.len())).map_err(io::Error::from))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // Parts are cut by size; flushing only settles the write in flight
        self.get_mut().poll_pending(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        futures::ready!(this.poll_pending(cx))?;

        let stream = &this.stream;
        let fut = this.closing.get_or_insert_with(|| {
            let stream = stream.clone();
            async move { stream.close().await }.boxed()
        });

        let result = futures::ready!(fut.as_mut().poll(cx));
        this.closing = None;
        Poll::Ready(result.map_err(io::Error::from))
    }
}

impl AsyncRead for UploadWriter {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Err(unsupported("read")))
    }
}

impl AsyncSeek for UploadWriter {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        Err(unsupported(seek_operation(position)))
    }

    // start_seek never succeeds, so no seek is ever in flight here
    fn poll_complete(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Poll::Ready(Ok(0))
    }
}

/// Blocking `std::io::Write` adapter.
///
/// Every call blocks on `handle`, so it must not be used from inside an async
/// task; run it on a plain thread or inside `spawn_blocking`.
pub struct BlockingUploadWriter {
    stream: Arc<UploadStream>,
    handle: Handle,
}

impl BlockingUploadWriter {
    pub fn new(stream: Arc<UploadStream>, handle: Handle) -> Self {
        Self { stream, handle }
    }

    pub fn stream(&self) -> &Arc<UploadStream> {
        &self.stream
    }

    /// Complete (or, after cancellation, abort) the upload
    pub fn close(&self) -> UploadResult<()> {
        self.handle.block_on(self.stream.close())
    }
}

impl io::Write for BlockingUploadWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.handle
            .block_on(self.stream.write(buf))
            .map_err(io::Error::from)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Read for BlockingUploadWriter {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(unsupported("read"))
    }
}

impl io::Seek for BlockingUploadWriter {
    fn seek(&mut self, position: SeekFrom) -> io::Result<u64> {
        Err(unsupported(seek_operation(position)))
    }
}

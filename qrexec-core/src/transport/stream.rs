//! Transport built on any `AsyncRead + AsyncWrite` byte stream.
//!
//! This is what the agent binary uses for real connections: a Unix domain
//! socket, a `tokio::io::duplex` pair, or (eventually) a libvchan FFI binding
//! that exposes the same `AsyncRead`/`AsyncWrite` surface. Grounded on this
//! codebase's own byte-stream transport, simplified down to the read/writev
//! contract below it — framing itself lives one layer up, in [`crate::channel`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex as AsyncMutex;

use crate::error::TransportError;

use super::Transport;

/// Size of each chunk pulled from the underlying stream per `read` call.
/// Not meaningful to callers above this layer; just an I/O granularity.
const READ_CHUNK_SIZE: usize = 16 * 1024;

pub struct StreamTransport {
    inner: Arc<StreamInner>,
}

impl Clone for StreamTransport {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct StreamInner {
    reader: AsyncMutex<Box<dyn AsyncRead + Unpin + Send + Sync>>,
    writer: AsyncMutex<Box<dyn AsyncWrite + Unpin + Send + Sync>>,
    closed: AtomicBool,
}

impl StreamTransport {
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::from_split(reader, writer)
    }

    pub fn from_split<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + Sync + 'static,
        W: AsyncWrite + Unpin + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(StreamInner {
                reader: AsyncMutex::new(Box::new(reader)),
                writer: AsyncMutex::new(Box::new(writer)),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Two ends of an in-memory duplex stream, useful for tests that want to
    /// exercise the real framing code path without a socket.
    pub fn pair() -> (Self, Self) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        (Self::new(a), Self::new(b))
    }
}

impl Transport for StreamTransport {
    async fn read(&self) -> Result<Option<Bytes>, TransportError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let mut reader = self.inner.reader.lock().await;
        let mut buf = BytesMut::zeroed(READ_CHUNK_SIZE);
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(buf.freeze()))
    }

    async fn writev(&self, bufs: &[Bytes]) -> Result<(), TransportError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let mut writer = self.inner.writer.lock().await;
        for b in bufs {
            writer.write_all(b).await?;
        }
        writer.flush().await?;
        Ok(())
    }

    async fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let mut writer = self.inner.writer.lock().await;
        let _ = writer.shutdown().await;
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pair_delivers_writes_as_reads() {
        let (a, b) = StreamTransport::pair();
        a.writev(&[Bytes::from_static(b"ping")]).await.unwrap();
        let got = b.read().await.unwrap().unwrap();
        assert_eq!(&got[..], b"ping");
    }

    #[tokio::test]
    async fn close_marks_transport_closed() {
        let (a, _b) = StreamTransport::pair();
        a.close().await;
        assert!(a.is_closed());
        let err = a.writev(&[Bytes::from_static(b"x")]).await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }
}

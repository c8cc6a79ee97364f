//! The framed channel: owns one transport, reassembles the
//! length-prefixed message framing on top of it, and serializes concurrent
//! `send`/`recv` callers.

use bytes::{Bytes, BytesMut};
use tokio::sync::Mutex as AsyncMutex;

use crate::error::TransportError;
use crate::transport::Transport;
use crate::wire::{FrameType, Header, HEADER_SIZE};

/// Outcome of a `recv` or `read_exactly`: either data, or a clean
/// end-of-stream.
#[derive(Debug)]
pub enum RecvOutcome<T> {
    Frame(T),
    Eof,
}

/// One channel opened over a [`Transport`], framing raw bytes into
/// `(type, payload)` messages.
///
/// Invariant: the carry-over read buffer is only ever touched
/// while `read_buf`'s mutex is held — holding the lock *is* holding the
/// buffer, there is no way to reach it otherwise.
pub struct FramedChannel<T: Transport> {
    transport: T,
    read_buf: AsyncMutex<BytesMut>,
    write_lock: AsyncMutex<()>,
}

impl<T: Transport> FramedChannel<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            read_buf: AsyncMutex::new(BytesMut::new()),
            write_lock: AsyncMutex::new(()),
        }
    }

    /// Pull bytes from the carry-over buffer, refilling from the transport
    /// as needed, until exactly `n` bytes have been produced.
    ///
    /// `Ok(RecvOutcome::Eof)` only when the stream ended with *zero* bytes
    /// already consumed into this read; an end-of-stream mid-read is a
    /// transport error (a frame was promised and never completed).
    async fn read_exactly(
        &self,
        buf: &mut BytesMut,
        n: usize,
    ) -> Result<RecvOutcome<Bytes>, TransportError> {
        while buf.len() < n {
            match self.transport.read().await? {
                Some(chunk) => buf.extend_from_slice(&chunk),
                None => {
                    if buf.is_empty() {
                        return Ok(RecvOutcome::Eof);
                    }
                    return Err(TransportError::Closed);
                }
            }
        }
        Ok(RecvOutcome::Frame(buf.split_to(n).freeze()))
    }

    /// Block until a full frame is available.
    pub async fn recv(&self) -> Result<RecvOutcome<(FrameType, Bytes)>, TransportError> {
        let mut buf = self.read_buf.lock().await;

        let header_bytes = match self.read_exactly(&mut buf, HEADER_SIZE).await? {
            RecvOutcome::Frame(b) => b,
            RecvOutcome::Eof => return Ok(RecvOutcome::Eof),
        };
        // HEADER_SIZE bytes were already validated present by read_exactly;
        // unpack cannot fail here.
        let header = Header::unpack(&header_bytes).expect("header_bytes has HEADER_SIZE len");

        let payload = match self
            .read_exactly(&mut buf, header.length as usize)
            .await?
        {
            RecvOutcome::Frame(b) => b,
            RecvOutcome::Eof => return Err(TransportError::Closed),
        };

        Ok(RecvOutcome::Frame((header.frame_type, payload)))
    }

    /// Write a header and payload as a single atomic unit: no other `send`
    /// can interleave bytes between them.
    pub async fn send(&self, frame_type: FrameType, payload: Bytes) -> Result<(), TransportError> {
        let _guard = self.write_lock.lock().await;
        let header = Header {
            frame_type,
            length: payload.len() as u32,
        };
        let header_bytes = Bytes::copy_from_slice(&header.pack());
        self.transport.writev(&[header_bytes, payload]).await
    }

    pub async fn close(&self) {
        self.transport.close().await;
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }
}

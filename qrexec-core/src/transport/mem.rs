//! In-process transport used by unit and integration tests.
//!
//! Grounded on the `mpsc`-backed in-process transport this codebase ships
//! for its own semantic-reference transport: two halves of a channel pair
//! exchange `Bytes` chunks directly, with no real I/O involved.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::{Bytes, BytesMut};
use tokio::sync::{Mutex as AsyncMutex, mpsc};

use crate::error::TransportError;

use super::Transport;

const CHANNEL_CAPACITY: usize = 64;

/// An in-process duplex transport. Cloning shares the same underlying
/// channel halves.
#[derive(Clone)]
pub struct MemTransport {
    inner: Arc<MemInner>,
}

struct MemInner {
    tx: mpsc::Sender<Bytes>,
    rx: AsyncMutex<mpsc::Receiver<Bytes>>,
    closed: AtomicBool,
}

impl MemTransport {
    /// Create a connected pair: writes to one side arrive as reads on the
    /// other.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::channel(CHANNEL_CAPACITY);
        let (tx_b, rx_b) = mpsc::channel(CHANNEL_CAPACITY);

        let a = Self {
            inner: Arc::new(MemInner {
                tx: tx_b,
                rx: AsyncMutex::new(rx_a),
                closed: AtomicBool::new(false),
            }),
        };
        let b = Self {
            inner: Arc::new(MemInner {
                tx: tx_a,
                rx: AsyncMutex::new(rx_b),
                closed: AtomicBool::new(false),
            }),
        };
        (a, b)
    }
}

impl Transport for MemTransport {
    async fn read(&self) -> Result<Option<Bytes>, TransportError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let mut rx = self.inner.rx.lock().await;
        Ok(rx.recv().await)
    }

    async fn writev(&self, bufs: &[Bytes]) -> Result<(), TransportError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let mut combined = BytesMut::with_capacity(bufs.iter().map(Bytes::len).sum());
        for b in bufs {
            combined.extend_from_slice(b);
        }
        self.inner
            .tx
            .send(combined.freeze())
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

//! The duplex byte-channel abstraction consumed by the framed channel.
//!
//! `Transport` is deliberately narrow: pull the next available chunk, write
//! a gather-list as one atomic unit, and close. A real inter-domain channel
//! primitive (libvchan or similar) implements exactly this trait; the two
//! implementations in this module exist for testing (`MemTransport`) and for
//! any real byte stream this process already has a handle to
//! (`StreamTransport`).

use bytes::Bytes;

use crate::error::TransportError;

pub mod mem;
pub mod stream;

/// A duplex byte-oriented channel between two domains.
///
/// Chunk boundaries returned by `read` are not meaningful to callers above
/// this layer — the framed channel re-buffers them into frames.
pub trait Transport: Send + Sync + 'static {
    /// Pull the next available chunk of bytes. Returns `Ok(None)` on a clean
    /// end-of-stream.
    fn read(&self) -> impl Future<Output = Result<Option<Bytes>, TransportError>> + Send;

    /// Gather-write all buffers as a single atomic unit: no other writer may
    /// interleave bytes between them.
    fn writev(&self, bufs: &[Bytes]) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Release the channel. Idempotent.
    fn close(&self) -> impl Future<Output = ()> + Send;

    /// Whether `close` has already been called.
    fn is_closed(&self) -> bool;
}

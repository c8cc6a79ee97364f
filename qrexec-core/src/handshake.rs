//! Version handshake.
//!
//! The wire order is asymmetric and not negotiable: the server side (the
//! listener, on the management channel) sends its `hello` first and then
//! receives the peer's; the client side (a per-session channel opened
//! toward the caller) receives first and then sends.

use bytes::Bytes;
use tracing::debug;

use crate::channel::{FramedChannel, RecvOutcome};
use crate::error::ProtocolError;
use crate::transport::Transport;
use crate::wire::{FrameType, PeerInfo, PROTOCOL_VERSION};

async fn send_hello<T: Transport>(channel: &FramedChannel<T>) -> Result<(), ProtocolError> {
    let info = PeerInfo {
        version: PROTOCOL_VERSION,
    };
    channel
        .send(FrameType::Hello, info.pack())
        .await
        .map_err(|_| ProtocolError::EofDuringHandshake)
}

async fn recv_hello<T: Transport>(channel: &FramedChannel<T>) -> Result<(), ProtocolError> {
    let (frame_type, payload) = match channel
        .recv()
        .await
        .map_err(|_| ProtocolError::EofDuringHandshake)?
    {
        RecvOutcome::Frame(f) => f,
        RecvOutcome::Eof => return Err(ProtocolError::EofDuringHandshake),
    };
    if frame_type != FrameType::Hello {
        return Err(ProtocolError::UnexpectedFrame {
            expected: "hello",
            got: frame_type.wire_value(),
        });
    }
    let info = PeerInfo::unpack(&payload)?;
    if info.version != PROTOCOL_VERSION {
        return Err(ProtocolError::VersionMismatch { got: info.version });
    }
    Ok(())
}

/// Server-side handshake: send our `hello`, then receive the peer's.
/// Used by the listener on the long-lived management channel.
pub async fn server_handshake<T: Transport>(channel: &FramedChannel<T>) -> Result<(), ProtocolError> {
    send_hello(channel).await?;
    recv_hello(channel).await?;
    debug!(version = PROTOCOL_VERSION, "server handshake complete");
    Ok(())
}

/// Client-side handshake: receive the peer's `hello` first, then send ours.
/// Used by a session's per-request channel opened toward the calling domain.
pub async fn client_handshake<T: Transport>(channel: &FramedChannel<T>) -> Result<(), ProtocolError> {
    recv_hello(channel).await?;
    send_hello(channel).await?;
    debug!(version = PROTOCOL_VERSION, "client handshake complete");
    Ok(())
}

/// Helper used by tests and by `MemTransport`-backed peers that stand in for
/// the calling domain: reply with a `hello` carrying an explicit version
/// (which may be wrong, to exercise the mismatch path) without unpacking
/// anything.
pub async fn send_raw_hello<T: Transport>(
    channel: &FramedChannel<T>,
    version: u32,
) -> Result<(), ProtocolError> {
    let info = PeerInfo { version };
    channel
        .send(FrameType::Hello, info.pack())
        .await
        .map_err(|_| ProtocolError::EofDuringHandshake)
}

/// Read one `hello` frame sent by the other side, without validating its
/// version. Used by test peers that drive the server side of a handshake.
pub async fn recv_raw_hello<T: Transport>(channel: &FramedChannel<T>) -> Result<Bytes, ProtocolError> {
    match channel
        .recv()
        .await
        .map_err(|_| ProtocolError::EofDuringHandshake)?
    {
        RecvOutcome::Frame((FrameType::Hello, payload)) => Ok(payload),
        RecvOutcome::Frame((other, _)) => Err(ProtocolError::UnexpectedFrame {
            expected: "hello",
            got: other.wire_value(),
        }),
        RecvOutcome::Eof => Err(ProtocolError::EofDuringHandshake),
    }
}

//! Framed protocol, handshake, byte-stream flow, and session lifecycle for
//! a qrexec-style guest agent: the pieces shared between the listener that
//! owns the long-lived management channel and the per-request sessions it
//! spawns.
//!
//! Module layout mirrors the layering of the protocol itself, bottom to
//! top: [`wire`] (fixed-layout structs) under [`transport`] (raw duplex
//! byte channel) under [`channel`] (length-prefixed framing) under
//! [`handshake`] and [`flow`] (the two uses of a framed channel) under
//! [`session`] and [`listener`] (orchestration).

pub mod channel;
pub mod error;
pub mod flow;
pub mod handshake;
pub mod listener;
pub mod session;
pub mod transport;
pub mod wire;

pub use channel::{FramedChannel, RecvOutcome};
pub use error::{CmdlineError, CodecError, ProtocolError, SessionError, TransportError};
pub use flow::{ExecMode, Flow};
pub use handshake::{client_handshake, server_handshake};
pub use listener::run_listener;
pub use session::{parse_cmdline, run_session, Dialer, Handler};
pub use transport::Transport;
pub use wire::{ExecParams, ExitStatus, FrameType, Header, PeerInfo, PROTOCOL_VERSION};

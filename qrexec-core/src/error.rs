//! Error types for each fallible component of the agent.
//!
//! Every enum here gets a hand-written `Display` and `std::error::Error`
//! impl rather than a derive-macro error crate, matching the rest of this
//! codebase.

use std::fmt;

/// Something went wrong reading or writing the underlying duplex channel.
#[derive(Debug)]
pub enum TransportError {
    /// The channel was already closed, or the peer closed it.
    Closed,
    /// The underlying I/O primitive reported an error.
    Io(std::io::Error),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "transport closed"),
            Self::Io(e) => write!(f, "transport I/O error: {e}"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Closed => None,
            Self::Io(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Wire codec failed to decode a header or payload.
#[derive(Debug)]
pub enum CodecError {
    /// A fixed-layout payload was shorter than its declared prefix.
    Truncated { expected: usize, got: usize },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { expected, got } => {
                write!(f, "payload truncated: expected {expected} bytes, got {got}")
            }
        }
    }
}

impl std::error::Error for CodecError {}

/// A frame arrived that violates the channel's or handshake's protocol
/// expectations.
#[derive(Debug)]
pub enum ProtocolError {
    /// A frame type other than the expected one arrived during handshake.
    UnexpectedFrame { expected: &'static str, got: u32 },
    /// The peer's declared protocol version was not 2.
    VersionMismatch { got: u32 },
    /// `Eof` arrived before the handshake completed.
    EofDuringHandshake,
    /// A frame type other than `data_stdin` arrived while the flow was
    /// reading stdin.
    UnexpectedStreamFrame { got: u32 },
    /// The codec rejected the payload.
    Codec(CodecError),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedFrame { expected, got } => {
                write!(f, "expected {expected} frame, got type {got}")
            }
            Self::VersionMismatch { got } => {
                write!(f, "unsupported protocol version {got}, expected 2")
            }
            Self::EofDuringHandshake => write!(f, "connection closed during handshake"),
            Self::UnexpectedStreamFrame { got } => {
                write!(f, "expected data_stdin frame, got type {got}")
            }
            Self::Codec(e) => write!(f, "codec error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Codec(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CodecError> for ProtocolError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

/// The `cmdline` tail of an `exec_params` payload was malformed.
#[derive(Debug)]
pub enum CmdlineError {
    /// No trailing NUL byte was found.
    MissingNul,
    /// No `:` separator was found before the NUL.
    MissingColon,
}

impl fmt::Display for CmdlineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingNul => write!(f, "cmdline is missing its trailing NUL terminator"),
            Self::MissingColon => write!(f, "cmdline is missing the user:command separator"),
        }
    }
}

impl std::error::Error for CmdlineError {}

/// Anything that can end a session before or instead of invoking the
/// handler. Every variant maps to exit code 255 per spec.
#[derive(Debug)]
pub enum SessionError {
    Transport(TransportError),
    Protocol(ProtocolError),
    Cmdline(CmdlineError),
    /// The handler itself returned an error.
    Handler(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::Protocol(e) => write!(f, "protocol error: {e}"),
            Self::Cmdline(e) => write!(f, "malformed cmdline: {e}"),
            Self::Handler(msg) => write!(f, "handler error: {msg}"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Protocol(e) => Some(e),
            Self::Cmdline(e) => Some(e),
            Self::Handler(_) => None,
        }
    }
}

impl From<TransportError> for SessionError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<ProtocolError> for SessionError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

impl From<CmdlineError> for SessionError {
    fn from(e: CmdlineError) -> Self {
        Self::Cmdline(e)
    }
}

impl SessionError {
    /// Exit code this error maps to: every session-fatal condition is
    /// reported to the peer as 255.
    pub fn exit_code(&self) -> i32 {
        255
    }
}

//! Fixed-layout wire structs and the frame type tag.
//!
//! All integers are little-endian. Every `pack`/`unpack` pair round-trips:
//! `unpack(pack(x)) == x` for every value `x` can represent.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::CodecError;

/// Size of the fixed message header: `type: u32` + `length: u32`.
pub const HEADER_SIZE: usize = 8;

/// The protocol version this agent speaks. Any other value is fatal.
pub const PROTOCOL_VERSION: u32 = 2;

/// Frame type tag, exhaustive over the recognized wire types with an
/// explicit `Unknown` catch-all so callers can log-and-continue instead of
/// treating an unrecognized type as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Hello,
    JustExec,
    ExecCmdline,
    DataStdin,
    DataStdout,
    DataStderr,
    DataExitCode,
    ConnectionTerminated,
    Unknown(u32),
}

const TYPE_HELLO: u32 = 0x190;
const TYPE_JUST_EXEC: u32 = 0x191;
const TYPE_EXEC_CMDLINE: u32 = 0x192;
const TYPE_DATA_STDIN: u32 = 0x193;
const TYPE_DATA_STDOUT: u32 = 0x194;
const TYPE_DATA_STDERR: u32 = 0x195;
const TYPE_DATA_EXIT_CODE: u32 = 0x196;
const TYPE_CONNECTION_TERMINATED: u32 = 0x197;

impl FrameType {
    pub fn wire_value(self) -> u32 {
        match self {
            Self::Hello => TYPE_HELLO,
            Self::JustExec => TYPE_JUST_EXEC,
            Self::ExecCmdline => TYPE_EXEC_CMDLINE,
            Self::DataStdin => TYPE_DATA_STDIN,
            Self::DataStdout => TYPE_DATA_STDOUT,
            Self::DataStderr => TYPE_DATA_STDERR,
            Self::DataExitCode => TYPE_DATA_EXIT_CODE,
            Self::ConnectionTerminated => TYPE_CONNECTION_TERMINATED,
            Self::Unknown(v) => v,
        }
    }
}

impl From<u32> for FrameType {
    fn from(v: u32) -> Self {
        match v {
            TYPE_HELLO => Self::Hello,
            TYPE_JUST_EXEC => Self::JustExec,
            TYPE_EXEC_CMDLINE => Self::ExecCmdline,
            TYPE_DATA_STDIN => Self::DataStdin,
            TYPE_DATA_STDOUT => Self::DataStdout,
            TYPE_DATA_STDERR => Self::DataStderr,
            TYPE_DATA_EXIT_CODE => Self::DataExitCode,
            TYPE_CONNECTION_TERMINATED => Self::ConnectionTerminated,
            other => Self::Unknown(other),
        }
    }
}

/// A decoded message header: frame type and payload length.
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub frame_type: FrameType,
    pub length: u32,
}

impl Header {
    pub fn pack(self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.frame_type.wire_value().to_le_bytes());
        buf[4..8].copy_from_slice(&self.length.to_le_bytes());
        buf
    }

    pub fn unpack(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < HEADER_SIZE {
            return Err(CodecError::Truncated {
                expected: HEADER_SIZE,
                got: bytes.len(),
            });
        }
        let frame_type = u32::from_le_bytes(bytes[0..4].try_into().unwrap()).into();
        let length = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        Ok(Self { frame_type, length })
    }
}

/// `peer_info` payload: `version: u32` followed by reserved bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerInfo {
    pub version: u32,
}

/// Reserved bytes trailing the version in a `peer_info` payload on the wire.
/// The agent never inspects them; they exist purely for layout compatibility.
pub const PEER_INFO_RESERVED: usize = 60;
pub const PEER_INFO_SIZE: usize = 4 + PEER_INFO_RESERVED;

impl PeerInfo {
    pub fn pack(self) -> Bytes {
        let mut buf = BytesMut::with_capacity(PEER_INFO_SIZE);
        buf.put_u32_le(self.version);
        buf.put_bytes(0, PEER_INFO_RESERVED);
        buf.freeze()
    }

    pub fn unpack(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < 4 {
            return Err(CodecError::Truncated {
                expected: 4,
                got: bytes.len(),
            });
        }
        let version = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        Ok(Self { version })
    }
}

/// `exec_params` payload: `connect_domain`, `connect_port`, then the
/// `cmdline` tail.
#[derive(Debug, Clone)]
pub struct ExecParams {
    pub connect_domain: u32,
    pub connect_port: u32,
    pub cmdline: Bytes,
}

/// Size of the fixed prefix of `exec_params` (domain + port), echoed
/// verbatim in `connection_terminated`.
pub const EXEC_PARAMS_PREFIX_SIZE: usize = 8;

impl ExecParams {
    pub fn pack(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(EXEC_PARAMS_PREFIX_SIZE + self.cmdline.len());
        buf.put_u32_le(self.connect_domain);
        buf.put_u32_le(self.connect_port);
        buf.put_slice(&self.cmdline);
        buf.freeze()
    }

    pub fn unpack(bytes: &Bytes) -> Result<Self, CodecError> {
        if bytes.len() < EXEC_PARAMS_PREFIX_SIZE {
            return Err(CodecError::Truncated {
                expected: EXEC_PARAMS_PREFIX_SIZE,
                got: bytes.len(),
            });
        }
        let connect_domain = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let connect_port = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let cmdline = bytes.slice(EXEC_PARAMS_PREFIX_SIZE..);
        Ok(Self {
            connect_domain,
            connect_port,
            cmdline,
        })
    }

    /// The fixed (domain, port) prefix, echoed verbatim in
    /// `connection_terminated` regardless of how the cmdline parsed.
    pub fn prefix(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(EXEC_PARAMS_PREFIX_SIZE);
        buf.put_u32_le(self.connect_domain);
        buf.put_u32_le(self.connect_port);
        buf.freeze()
    }
}

/// `exit_status` payload: `return_code: i64` little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    pub return_code: i64,
}

pub const EXIT_STATUS_SIZE: usize = 8;

impl ExitStatus {
    pub fn pack(self) -> [u8; EXIT_STATUS_SIZE] {
        self.return_code.to_le_bytes()
    }

    pub fn unpack(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < EXIT_STATUS_SIZE {
            return Err(CodecError::Truncated {
                expected: EXIT_STATUS_SIZE,
                got: bytes.len(),
            });
        }
        let return_code = i64::from_le_bytes(bytes[0..8].try_into().unwrap());
        Ok(Self { return_code })
    }
}

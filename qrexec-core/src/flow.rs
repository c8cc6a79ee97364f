//! Byte-stream flow layer: maps a framed channel opened for one
//! execution into `write`/`ewrite`/`read`/`read_line`/`close`.

use bytes::{Bytes, BytesMut};
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

use crate::channel::{FramedChannel, RecvOutcome};
use crate::error::{ProtocolError, SessionError};
use crate::transport::Transport;
use crate::wire::{ExitStatus, FrameType};

/// The execution mode a flow is fixed to at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Fire-and-forget: no stdin/stdout streaming takes place.
    JustExec,
    /// Full bidirectional streaming.
    ExecCmdline,
}

/// The stream-oriented view of one execution session.
pub struct Flow<T: Transport> {
    channel: FramedChannel<T>,
    mode: ExecMode,
    stdin: AsyncMutex<StdinState>,
}

struct StdinState {
    buf: BytesMut,
    eof: bool,
}

impl<T: Transport> Flow<T> {
    pub fn new(channel: FramedChannel<T>, mode: ExecMode) -> Self {
        Self {
            channel,
            mode,
            stdin: AsyncMutex::new(StdinState {
                buf: BytesMut::new(),
                eof: false,
            }),
        }
    }

    pub fn mode(&self) -> ExecMode {
        self.mode
    }

    /// Send bytes on the stdout sub-stream. A no-op in `JustExec` mode and
    /// for empty buffers (reserved as the end-of-stream marker).
    pub async fn write(&self, bytes: Bytes) -> Result<(), SessionError> {
        self.write_on(FrameType::DataStdout, bytes).await
    }

    /// Send bytes on the stderr sub-stream. Same rules as [`Flow::write`].
    pub async fn ewrite(&self, bytes: Bytes) -> Result<(), SessionError> {
        self.write_on(FrameType::DataStderr, bytes).await
    }

    async fn write_on(&self, frame_type: FrameType, bytes: Bytes) -> Result<(), SessionError> {
        if self.mode == ExecMode::JustExec || bytes.is_empty() {
            return Ok(());
        }
        self.channel.send(frame_type, bytes).await?;
        Ok(())
    }

    /// Formatted convenience over [`Flow::write`]; appends a trailing
    /// newline.
    pub async fn writef(&self, args: std::fmt::Arguments<'_>) -> Result<(), SessionError> {
        let mut s = format!("{args}");
        s.push('\n');
        self.write(Bytes::from(s.into_bytes())).await
    }

    /// Formatted convenience over [`Flow::ewrite`]; appends a trailing
    /// newline.
    pub async fn ewritef(&self, args: std::fmt::Arguments<'_>) -> Result<(), SessionError> {
        let mut s = format!("{args}");
        s.push('\n');
        self.ewrite(Bytes::from(s.into_bytes())).await
    }

    /// Pull one chunk of stdin: first drains any carry-over left by a prior
    /// `read_line`, otherwise blocks on the next `data_stdin` frame.
    pub async fn read(&self) -> Result<Option<Bytes>, SessionError> {
        if self.mode == ExecMode::JustExec {
            return Ok(None);
        }

        let mut state = self.stdin.lock().await;
        if !state.buf.is_empty() {
            let drained = state.buf.split().freeze();
            return Ok(Some(drained));
        }
        if state.eof {
            return Ok(None);
        }
        drop(state);

        match self.recv_stdin_frame().await? {
            Some(bytes) => Ok(Some(bytes)),
            None => {
                self.stdin.lock().await.eof = true;
                Ok(None)
            }
        }
    }

    /// Return bytes up to (not including) the next `\n`, buffering any
    /// residue for the next call. End-of-stream before a newline is reached
    /// discards the residual partial line and returns `Ok(None)` (see
    /// DESIGN.md for why this default was chosen over buffering it).
    pub async fn read_line(&self) -> Result<Option<String>, SessionError> {
        if self.mode == ExecMode::JustExec {
            return Ok(None);
        }

        loop {
            let mut state = self.stdin.lock().await;
            if let Some(pos) = state.buf.iter().position(|&b| b == b'\n') {
                let line = state.buf.split_to(pos);
                state.buf.advance_past_newline();
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }
            if state.eof {
                return Ok(None);
            }
            drop(state);

            match self.recv_stdin_frame().await? {
                Some(bytes) => {
                    self.stdin.lock().await.buf.extend_from_slice(&bytes);
                }
                None => {
                    self.stdin.lock().await.eof = true;
                }
            }
        }
    }

    async fn recv_stdin_frame(&self) -> Result<Option<Bytes>, SessionError> {
        match self.channel.recv().await? {
            RecvOutcome::Frame((FrameType::DataStdin, payload)) => {
                if payload.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(payload))
                }
            }
            RecvOutcome::Frame((other, _)) => Err(SessionError::from(ProtocolError::UnexpectedStreamFrame {
                got: other.wire_value(),
            })),
            RecvOutcome::Eof => Ok(None),
        }
    }

    /// Send the end-of-stream marker and exit code, then close the
    /// underlying channel. Runs on every exit path;
    /// errors are logged but never propagated, so a failing close can't mask
    /// the handler's own result.
    pub async fn close(&self, exit_code: i32) {
        if let Err(e) = self
            .channel
            .send(FrameType::DataStdout, Bytes::new())
            .await
        {
            warn!(error = %e, "failed to send end-of-stream marker during close");
        }

        let status = ExitStatus {
            return_code: exit_code as i64,
        };
        if let Err(e) = self
            .channel
            .send(FrameType::DataExitCode, Bytes::copy_from_slice(&status.pack()))
            .await
        {
            warn!(error = %e, "failed to send exit code during close");
        }

        self.channel.close().await;
    }
}

trait AdvancePastNewline {
    fn advance_past_newline(&mut self);
}

impl AdvancePastNewline for BytesMut {
    fn advance_past_newline(&mut self) {
        if !self.is_empty() {
            let _ = self.split_to(1);
        }
    }
}

//! Per-request session lifecycle: open a channel to the caller,
//! handshake, invoke the handler, and guarantee the flow is closed on every
//! exit path.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{info, warn};

use crate::error::CmdlineError;
use crate::flow::{ExecMode, Flow};
use crate::handshake::client_handshake;
use crate::transport::Transport;
use crate::FramedChannel;

/// Opens the secondary per-request transport channel to a calling domain.
/// A real agent implements this against the hypervisor's channel-open
/// primitive; tests implement it against [`crate::transport::mem::MemTransport`].
pub trait Dialer<T: Transport>: Send + Sync {
    fn dial(
        &self,
        domid: u32,
        port: u32,
    ) -> impl Future<Output = Result<T, crate::error::TransportError>> + Send;
}

/// The embedder-supplied command handler.
///
/// Implementations must not call `flow.close()` themselves; the session
/// lifecycle owns that call.
pub trait Handler<T: Transport>: Send + Sync {
    fn handle(
        &self,
        user: String,
        cmd: String,
        flow: Arc<Flow<T>>,
    ) -> impl Future<Output = Result<i32, String>> + Send;
}

/// Split a `cmdline` payload of the form `USER:COMMAND\0` into its parts.
pub fn parse_cmdline(bytes: &[u8]) -> Result<(String, String), CmdlineError> {
    let without_nul = bytes.strip_suffix(&[0]).ok_or(CmdlineError::MissingNul)?;
    let colon = without_nul
        .iter()
        .position(|&b| b == b':')
        .ok_or(CmdlineError::MissingColon)?;
    let user = String::from_utf8_lossy(&without_nul[..colon]).into_owned();
    let cmd = String::from_utf8_lossy(&without_nul[colon + 1..]).into_owned();
    Ok((user, cmd))
}

/// Drop guard ensuring `flow.close()` runs even if the owning future is
/// cancelled (e.g. the session's task is aborted) before reaching the
/// ordinary close call at the end of [`run_session`]. On the ordinary path
/// `close()` is called explicitly and consumes the guard, so `Drop` finds
/// nothing left to do.
struct CloseGuard<T: Transport> {
    flow: Option<Arc<Flow<T>>>,
    exit_code: i32,
}

impl<T: Transport> CloseGuard<T> {
    fn new(flow: Arc<Flow<T>>) -> Self {
        Self {
            flow: Some(flow),
            exit_code: 255,
        }
    }

    fn set_exit_code(&mut self, code: i32) {
        self.exit_code = code;
    }

    /// Run the close sequence and consume the guard, defusing `Drop`.
    async fn close(mut self) -> i32 {
        let flow = self.flow.take().expect("close() runs at most once");
        let exit_code = self.exit_code;
        flow.close(exit_code).await;
        exit_code
    }
}

impl<T: Transport> Drop for CloseGuard<T> {
    fn drop(&mut self) {
        if let Some(flow) = self.flow.take() {
            let exit_code = self.exit_code;
            tokio::spawn(async move {
                flow.close(exit_code).await;
            });
        }
    }
}

/// Run one session to completion: dial the caller, handshake, parse
/// `cmdline`, invoke the handler, and close the flow. Returns the exit code
/// that was reported to the peer.
pub async fn run_session<T, D, H>(
    dialer: &D,
    handler: &H,
    domid: u32,
    port: u32,
    cmdline: Bytes,
    mode: ExecMode,
) -> i32
where
    T: Transport,
    D: Dialer<T>,
    H: Handler<T>,
{
    let transport = match dialer.dial(domid, port).await {
        Ok(t) => t,
        Err(e) => {
            warn!(domid, port, error = %e, "failed to open per-session channel");
            return 255;
        }
    };

    let channel = FramedChannel::new(transport);
    if let Err(e) = client_handshake(&channel).await {
        warn!(domid, port, error = %e, "handshake failed");
        channel.close().await;
        return 255;
    }

    let flow = Arc::new(Flow::new(channel, mode));
    let mut guard = CloseGuard::new(flow.clone());

    let exit_code = match parse_cmdline(&cmdline) {
        Ok((user, cmd)) => {
            info!(domid, port, user = %user, cmd = %cmd, "invoking handler");
            match handler.handle(user, cmd, flow.clone()).await {
                Ok(code) => code,
                Err(msg) => {
                    warn!(domid, port, error = %msg, "handler failed");
                    255
                }
            }
        }
        Err(e) => {
            warn!(domid, port, error = %e, "malformed cmdline");
            255
        }
    };

    info!(domid, port, exit_code, "session ended");
    guard.set_exit_code(exit_code);
    guard.close().await
}

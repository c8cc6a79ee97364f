//! The management-channel listener: one long-lived handshake, then a
//! loop that spawns a session per incoming request and reports each one's
//! outcome back to the peer.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{info, warn};

use crate::channel::{FramedChannel, RecvOutcome};
use crate::error::ProtocolError;
use crate::flow::ExecMode;
use crate::handshake::server_handshake;
use crate::session::{run_session, Dialer, Handler};
use crate::transport::Transport;
use crate::wire::{ExecParams, FrameType};

/// Run the listener to completion: handshake on `management`, then loop
/// accepting `just_exec`/`exec_cmdline` requests until the peer closes the
/// channel. Each accepted request is run as its own spawned session; the
/// listener never blocks on one session while another could be accepted.
/// Every accepted request gets exactly one `connection_terminated` reply on
/// `management`, even if the per-session channel never opened.
pub async fn run_listener<M, T, D, H>(
    management: FramedChannel<M>,
    dialer: Arc<D>,
    handler: Arc<H>,
) -> Result<(), ProtocolError>
where
    M: Transport,
    T: Transport,
    D: Dialer<T> + 'static,
    H: Handler<T> + 'static,
{
    server_handshake(&management).await?;
    info!("listener handshake complete, accepting requests");
    let management = Arc::new(management);

    loop {
        let (frame_type, payload) = match management.recv().await {
            Ok(RecvOutcome::Frame(f)) => f,
            Ok(RecvOutcome::Eof) => {
                info!("management channel closed, listener exiting");
                return Ok(());
            }
            Err(e) => {
                warn!(error = %e, "management channel read failed, listener exiting");
                return Ok(());
            }
        };

        let mode = match frame_type {
            FrameType::JustExec => ExecMode::JustExec,
            FrameType::ExecCmdline => ExecMode::ExecCmdline,
            other => {
                warn!(frame_type = other.wire_value(), "ignoring unrecognized request frame");
                continue;
            }
        };

        let params = match ExecParams::unpack(&payload) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "malformed exec_params, dropping request");
                continue;
            }
        };

        let management = management.clone();
        let dialer = dialer.clone();
        let handler = handler.clone();

        tokio::spawn(run_and_report(management, params, mode, dialer, handler));
    }
}

async fn run_and_report<M, T, D, H>(
    management: Arc<FramedChannel<M>>,
    params: ExecParams,
    mode: ExecMode,
    dialer: Arc<D>,
    handler: Arc<H>,
) where
    M: Transport,
    T: Transport,
    D: Dialer<T>,
    H: Handler<T>,
{
    let prefix = params.prefix();
    let exit_code = run_session(
        dialer.as_ref(),
        handler.as_ref(),
        params.connect_domain,
        params.connect_port,
        params.cmdline,
        mode,
    )
    .await;
    info!(
        domid = params.connect_domain,
        port = params.connect_port,
        exit_code,
        "session finished"
    );

    if let Err(e) = management
        .send(FrameType::ConnectionTerminated, prefix)
        .await
    {
        warn!(error = %e, "failed to report connection_terminated to peer");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::{recv_raw_hello, send_raw_hello};
    use crate::transport::mem::MemTransport;
    use crate::wire::{ExecParams, PROTOCOL_VERSION};

    struct NullDialer;

    impl Dialer<MemTransport> for NullDialer {
        async fn dial(
            &self,
            _domid: u32,
            _port: u32,
        ) -> Result<MemTransport, crate::error::TransportError> {
            let (a, b) = MemTransport::pair();
            drop(b);
            Ok(a)
        }
    }

    struct ParsingHandler {
        called: tokio::sync::mpsc::UnboundedSender<(String, String)>,
    }

    impl Handler<MemTransport> for ParsingHandler {
        async fn handle(
            &self,
            user: String,
            cmd: String,
            _flow: Arc<crate::flow::Flow<MemTransport>>,
        ) -> Result<i32, String> {
            let _ = self.called.send((user, cmd));
            Ok(0)
        }
    }

    #[tokio::test]
    async fn listener_exits_cleanly_on_peer_eof() {
        let (a, b) = MemTransport::pair();
        let management = FramedChannel::new(a);
        let peer = FramedChannel::new(b);

        let peer_task = tokio::spawn(async move {
            send_raw_hello(&peer, PROTOCOL_VERSION).await.unwrap();
            recv_raw_hello(&peer).await.unwrap();
            drop(peer);
        });

        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let dialer = Arc::new(NullDialer);
        let handler = Arc::new(ParsingHandler { called: tx });
        run_listener(management, dialer, handler).await.unwrap();
        peer_task.await.unwrap();
    }

    #[tokio::test]
    async fn listener_ignores_unknown_frames_and_reports_connection_terminated() {
        let (a, b) = MemTransport::pair();
        let management = FramedChannel::new(a);
        let peer = FramedChannel::new(b);

        let peer_task = tokio::spawn(async move {
            send_raw_hello(&peer, PROTOCOL_VERSION).await.unwrap();
            recv_raw_hello(&peer).await.unwrap();
            peer.send(FrameType::Unknown(0xabc), Bytes::new())
                .await
                .unwrap();

            let params = ExecParams {
                connect_domain: 1,
                connect_port: 2,
                cmdline: Bytes::from_static(b"alice:true\0"),
            };
            peer.send(FrameType::ExecCmdline, params.pack())
                .await
                .unwrap();

            let (ty, payload) = match peer.recv().await.unwrap() {
                RecvOutcome::Frame(f) => f,
                RecvOutcome::Eof => panic!("expected connection_terminated"),
            };
            assert_eq!(ty, FrameType::ConnectionTerminated);
            assert_eq!(&payload[..], &params.prefix()[..]);

            drop(peer);
        });

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let dialer = Arc::new(NullDialer);
        let handler = Arc::new(ParsingHandler { called: tx });
        run_listener(management, dialer, handler).await.unwrap();
        peer_task.await.unwrap();

        let (user, cmd) = rx.recv().await.expect("handler should have been invoked");
        assert_eq!((user.as_str(), cmd.as_str()), ("alice", "true"));
    }
}

//! End-to-end scenarios driving a listener and a simulated caller entirely
//! over `MemTransport`, no real process or socket involved.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use qrexec_core::channel::RecvOutcome;
use qrexec_core::flow::Flow;
use qrexec_core::handshake::{recv_raw_hello, send_raw_hello};
use qrexec_core::transport::mem::MemTransport;
use qrexec_core::wire::{ExecParams, ExitStatus, FrameType, PROTOCOL_VERSION};
use qrexec_core::{run_listener, Dialer, FramedChannel, Handler, TransportError};

struct MemDialer {
    peers: tokio::sync::Mutex<Vec<MemTransport>>,
}

impl MemDialer {
    fn new(peers: Vec<MemTransport>) -> Self {
        Self {
            peers: tokio::sync::Mutex::new(peers),
        }
    }
}

impl Dialer<MemTransport> for MemDialer {
    async fn dial(&self, _domid: u32, _port: u32) -> Result<MemTransport, TransportError> {
        self.peers
            .lock()
            .await
            .pop()
            .ok_or(TransportError::Closed)
    }
}

struct ScriptedHandler<F> {
    run: F,
}

impl<F, Fut> Handler<MemTransport> for ScriptedHandler<F>
where
    F: Fn(String, String, Arc<Flow<MemTransport>>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<i32, String>> + Send,
{
    async fn handle(
        &self,
        user: String,
        cmd: String,
        flow: Arc<Flow<MemTransport>>,
    ) -> Result<i32, String> {
        (self.run)(user, cmd, flow).await
    }
}

async fn drive_management_handshake(management_peer: &FramedChannel<MemTransport>) {
    recv_raw_hello(management_peer).await.unwrap();
    send_raw_hello(management_peer, PROTOCOL_VERSION).await.unwrap();
}

fn exec_params(domid: u32, port: u32, cmdline: &'static [u8]) -> ExecParams {
    ExecParams {
        connect_domain: domid,
        connect_port: port,
        cmdline: Bytes::from_static(cmdline),
    }
}

/// Scenario 1: happy `just_exec`.
#[tokio::test]
async fn happy_just_exec_sends_zero_and_terminates() {
    let (mgmt_agent, mgmt_peer) = MemTransport::pair();
    let management_peer = FramedChannel::new(mgmt_peer);
    let management_agent = FramedChannel::new(mgmt_agent);

    let (session_agent, session_peer) = MemTransport::pair();
    let dialer = Arc::new(MemDialer::new(vec![session_agent]));
    let handler = Arc::new(ScriptedHandler {
        run: |_user, _cmd, _flow| async { Ok(0) },
    });

    let listener_task = tokio::spawn(run_listener(management_agent, dialer, handler));

    drive_management_handshake(&management_peer).await;
    let params = exec_params(5, 42, b"user:/bin/true\0");
    management_peer
        .send(FrameType::JustExec, params.pack())
        .await
        .unwrap();

    let session_channel = FramedChannel::new(session_peer);
    send_raw_hello(&session_channel, PROTOCOL_VERSION).await.unwrap();
    recv_raw_hello(&session_channel).await.unwrap();

    let (ty, payload) = match session_channel.recv().await.unwrap() {
        RecvOutcome::Frame(f) => f,
        RecvOutcome::Eof => panic!("expected data_stdout marker"),
    };
    assert_eq!(ty, FrameType::DataStdout);
    assert!(payload.is_empty());

    let (ty, payload) = match session_channel.recv().await.unwrap() {
        RecvOutcome::Frame(f) => f,
        RecvOutcome::Eof => panic!("expected data_exit_code"),
    };
    assert_eq!(ty, FrameType::DataExitCode);
    assert_eq!(&payload[..], &ExitStatus { return_code: 0 }.pack());

    let (ty, payload) = match management_peer.recv().await.unwrap() {
        RecvOutcome::Frame(f) => f,
        RecvOutcome::Eof => panic!("expected connection_terminated"),
    };
    assert_eq!(ty, FrameType::ConnectionTerminated);
    assert_eq!(&payload[..], &params.prefix()[..]);

    drop(management_peer);
    listener_task.await.unwrap().unwrap();
}

/// Scenario 2: happy `exec_cmdline` with stdin echoed back.
#[tokio::test]
async fn happy_exec_cmdline_echoes_stdin() {
    let (mgmt_agent, mgmt_peer) = MemTransport::pair();
    let management_peer = FramedChannel::new(mgmt_peer);
    let management_agent = FramedChannel::new(mgmt_agent);

    let (session_agent, session_peer) = MemTransport::pair();
    let dialer = Arc::new(MemDialer::new(vec![session_agent]));
    let handler = Arc::new(ScriptedHandler {
        run: |_user, _cmd, flow: Arc<Flow<MemTransport>>| async move {
            while let Some(chunk) = flow.read().await.map_err(|e| e.to_string())? {
                flow.write(chunk).await.map_err(|e| e.to_string())?;
            }
            Ok(0)
        },
    });

    let listener_task = tokio::spawn(run_listener(management_agent, dialer, handler));

    drive_management_handshake(&management_peer).await;
    let params = exec_params(5, 42, b"alice:cat\0");
    management_peer
        .send(FrameType::ExecCmdline, params.pack())
        .await
        .unwrap();

    let session_channel = FramedChannel::new(session_peer);
    send_raw_hello(&session_channel, PROTOCOL_VERSION).await.unwrap();
    recv_raw_hello(&session_channel).await.unwrap();

    session_channel
        .send(FrameType::DataStdin, Bytes::from_static(b"hello\n"))
        .await
        .unwrap();
    session_channel
        .send(FrameType::DataStdin, Bytes::new())
        .await
        .unwrap();

    let (ty, payload) = match session_channel.recv().await.unwrap() {
        RecvOutcome::Frame(f) => f,
        RecvOutcome::Eof => panic!("expected echoed stdout"),
    };
    assert_eq!(ty, FrameType::DataStdout);
    assert_eq!(&payload[..], b"hello\n");

    let (ty, payload) = match session_channel.recv().await.unwrap() {
        RecvOutcome::Frame(f) => f,
        RecvOutcome::Eof => panic!("expected end-of-stream marker"),
    };
    assert_eq!(ty, FrameType::DataStdout);
    assert!(payload.is_empty());

    let (ty, payload) = match session_channel.recv().await.unwrap() {
        RecvOutcome::Frame(f) => f,
        RecvOutcome::Eof => panic!("expected data_exit_code"),
    };
    assert_eq!(ty, FrameType::DataExitCode);
    assert_eq!(&payload[..], &ExitStatus { return_code: 0 }.pack());

    drop(management_peer);
    listener_task.await.unwrap().unwrap();
}

/// Scenario 3: malformed cmdline never reaches the handler but still closes
/// cleanly with exit 255.
#[tokio::test]
async fn malformed_cmdline_reports_255_without_invoking_handler() {
    let (mgmt_agent, mgmt_peer) = MemTransport::pair();
    let management_peer = FramedChannel::new(mgmt_peer);
    let management_agent = FramedChannel::new(mgmt_agent);

    let (session_agent, session_peer) = MemTransport::pair();
    let dialer = Arc::new(MemDialer::new(vec![session_agent]));
    let handler_calls = Arc::new(AtomicUsize::new(0));
    let handler = Arc::new(ScriptedHandler {
        run: {
            let handler_calls = handler_calls.clone();
            move |_user, _cmd, _flow| {
                let handler_calls = handler_calls.clone();
                async move {
                    handler_calls.fetch_add(1, Ordering::SeqCst);
                    Ok(0)
                }
            }
        },
    });

    let listener_task = tokio::spawn(run_listener(management_agent, dialer, handler));

    drive_management_handshake(&management_peer).await;
    let params = exec_params(1, 2, b"no-colon\0");
    management_peer
        .send(FrameType::ExecCmdline, params.pack())
        .await
        .unwrap();

    let session_channel = FramedChannel::new(session_peer);
    send_raw_hello(&session_channel, PROTOCOL_VERSION).await.unwrap();
    recv_raw_hello(&session_channel).await.unwrap();

    let (ty, payload) = match session_channel.recv().await.unwrap() {
        RecvOutcome::Frame(f) => f,
        RecvOutcome::Eof => panic!("expected data_stdout marker"),
    };
    assert_eq!(ty, FrameType::DataStdout);
    assert!(payload.is_empty());

    let (ty, payload) = match session_channel.recv().await.unwrap() {
        RecvOutcome::Frame(f) => f,
        RecvOutcome::Eof => panic!("expected data_exit_code"),
    };
    assert_eq!(ty, FrameType::DataExitCode);
    assert_eq!(&payload[..], &ExitStatus { return_code: 255 }.pack());

    let (ty, _) = match management_peer.recv().await.unwrap() {
        RecvOutcome::Frame(f) => f,
        RecvOutcome::Eof => panic!("expected connection_terminated"),
    };
    assert_eq!(ty, FrameType::ConnectionTerminated);
    assert_eq!(handler_calls.load(Ordering::SeqCst), 0);

    drop(management_peer);
    listener_task.await.unwrap().unwrap();
}

/// Scenario 4: handler writes partial output then errors.
#[tokio::test]
async fn handler_error_after_partial_write_still_closes_with_255() {
    let (mgmt_agent, mgmt_peer) = MemTransport::pair();
    let management_peer = FramedChannel::new(mgmt_peer);
    let management_agent = FramedChannel::new(mgmt_agent);

    let (session_agent, session_peer) = MemTransport::pair();
    let dialer = Arc::new(MemDialer::new(vec![session_agent]));
    let handler = Arc::new(ScriptedHandler {
        run: |_user, _cmd, flow: Arc<Flow<MemTransport>>| async move {
            flow.write(Bytes::from_static(b"partial"))
                .await
                .map_err(|e| e.to_string())?;
            Err("boom".to_string())
        },
    });

    let listener_task = tokio::spawn(run_listener(management_agent, dialer, handler));

    drive_management_handshake(&management_peer).await;
    let params = exec_params(1, 2, b"alice:boom\0");
    management_peer
        .send(FrameType::ExecCmdline, params.pack())
        .await
        .unwrap();

    let session_channel = FramedChannel::new(session_peer);
    send_raw_hello(&session_channel, PROTOCOL_VERSION).await.unwrap();
    recv_raw_hello(&session_channel).await.unwrap();

    let (ty, payload) = match session_channel.recv().await.unwrap() {
        RecvOutcome::Frame(f) => f,
        RecvOutcome::Eof => panic!("expected partial output"),
    };
    assert_eq!(ty, FrameType::DataStdout);
    assert_eq!(&payload[..], b"partial");

    let (ty, payload) = match session_channel.recv().await.unwrap() {
        RecvOutcome::Frame(f) => f,
        RecvOutcome::Eof => panic!("expected end-of-stream marker"),
    };
    assert_eq!(ty, FrameType::DataStdout);
    assert!(payload.is_empty());

    let (ty, payload) = match session_channel.recv().await.unwrap() {
        RecvOutcome::Frame(f) => f,
        RecvOutcome::Eof => panic!("expected data_exit_code"),
    };
    assert_eq!(ty, FrameType::DataExitCode);
    assert_eq!(&payload[..], &ExitStatus { return_code: 255 }.pack());

    drop(management_peer);
    listener_task.await.unwrap().unwrap();
}

/// Scenario 5: a per-session `hello` with the wrong version aborts before
/// the flow (and therefore the handler) is ever constructed, but
/// `connection_terminated` is still sent.
#[tokio::test]
async fn version_mismatch_on_session_channel_skips_handler() {
    let (mgmt_agent, mgmt_peer) = MemTransport::pair();
    let management_peer = FramedChannel::new(mgmt_peer);
    let management_agent = FramedChannel::new(mgmt_agent);

    let (session_agent, session_peer) = MemTransport::pair();
    let dialer = Arc::new(MemDialer::new(vec![session_agent]));
    let handler_calls = Arc::new(AtomicUsize::new(0));
    let handler = Arc::new(ScriptedHandler {
        run: {
            let handler_calls = handler_calls.clone();
            move |_user, _cmd, _flow| {
                let handler_calls = handler_calls.clone();
                async move {
                    handler_calls.fetch_add(1, Ordering::SeqCst);
                    Ok(0)
                }
            }
        },
    });

    let listener_task = tokio::spawn(run_listener(management_agent, dialer, handler));

    drive_management_handshake(&management_peer).await;
    let params = exec_params(1, 2, b"alice:true\0");
    management_peer
        .send(FrameType::ExecCmdline, params.pack())
        .await
        .unwrap();

    let session_channel = FramedChannel::new(session_peer);
    // Wrong version: the peer here plays the caller, which in the client
    // handshake is received first.
    send_raw_hello(&session_channel, 3).await.unwrap();
    let _ = recv_raw_hello(&session_channel).await;

    let (ty, _) = match management_peer.recv().await.unwrap() {
        RecvOutcome::Frame(f) => f,
        RecvOutcome::Eof => panic!("expected connection_terminated"),
    };
    assert_eq!(ty, FrameType::ConnectionTerminated);
    assert_eq!(handler_calls.load(Ordering::SeqCst), 0);

    drop(management_peer);
    listener_task.await.unwrap().unwrap();
}

/// Scenario 6: the management channel closing between requests ends the
/// listener loop cleanly, without disturbing unrelated state.
#[tokio::test]
async fn listener_eof_between_requests_exits_cleanly() {
    let (mgmt_agent, mgmt_peer) = MemTransport::pair();
    let management_peer = FramedChannel::new(mgmt_peer);
    let management_agent = FramedChannel::new(mgmt_agent);

    let dialer = Arc::new(MemDialer::new(vec![]));
    let handler = Arc::new(ScriptedHandler {
        run: |_user, _cmd, _flow| async { Ok(0) },
    });

    let listener_task = tokio::spawn(run_listener(management_agent, dialer, handler));
    drive_management_handshake(&management_peer).await;
    drop(management_peer);

    listener_task.await.unwrap().unwrap();
}

/// The per-session channel fails to open (no peer transport available to
/// hand out): the handler is never invoked, but `connection_terminated`
/// still reaches the caller with the original request's prefix.
#[tokio::test]
async fn dial_failure_still_reports_connection_terminated() {
    let (mgmt_agent, mgmt_peer) = MemTransport::pair();
    let management_peer = FramedChannel::new(mgmt_peer);
    let management_agent = FramedChannel::new(mgmt_agent);

    let dialer = Arc::new(MemDialer::new(vec![]));
    let handler_calls = Arc::new(AtomicUsize::new(0));
    let handler = Arc::new(ScriptedHandler {
        run: {
            let handler_calls = handler_calls.clone();
            move |_user, _cmd, _flow| {
                let handler_calls = handler_calls.clone();
                async move {
                    handler_calls.fetch_add(1, Ordering::SeqCst);
                    Ok(0)
                }
            }
        },
    });

    let listener_task = tokio::spawn(run_listener(management_agent, dialer, handler));

    drive_management_handshake(&management_peer).await;
    let params = exec_params(9, 99, b"alice:true\0");
    management_peer
        .send(FrameType::ExecCmdline, params.pack())
        .await
        .unwrap();

    let (ty, payload) = match management_peer.recv().await.unwrap() {
        RecvOutcome::Frame(f) => f,
        RecvOutcome::Eof => panic!("expected connection_terminated"),
    };
    assert_eq!(ty, FrameType::ConnectionTerminated);
    assert_eq!(&payload[..], &params.prefix()[..]);
    assert_eq!(handler_calls.load(Ordering::SeqCst), 0);

    drop(management_peer);
    listener_task.await.unwrap().unwrap();
}

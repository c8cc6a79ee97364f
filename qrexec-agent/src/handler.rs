//! The reference command handler: runs `/bin/sh -c <cmd>` and bridges its
//! stdio to the flow layer.
//!
//! Grounded on this codebase's conformance harness, which spawns a child
//! process and wraps its piped stdin/stdout in an `AsyncRead + AsyncWrite`
//! adapter for `StreamTransport`. Here the bridging runs the other
//! direction: three tasks copy between the child's piped stdio and a
//! `Flow`'s `read`/`write`/`ewrite`, since a `Flow` isn't itself an
//! `AsyncRead`/`AsyncWrite` stream.

use std::process::Stdio;
use std::sync::Arc;

use bytes::Bytes;
use qrexec_core::{Flow, Handler, Transport};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::warn;

const COPY_CHUNK_SIZE: usize = 16 * 1024;

pub struct ProcessHandler;

impl<T: Transport> Handler<T> for ProcessHandler {
    async fn handle(&self, user: String, cmd: String, flow: Arc<Flow<T>>) -> Result<i32, String> {
        // `user` identifies the account the peer asked to run as; this
        // reference handler always runs as the agent's own user and only
        // logs the request, leaving privilege separation to a real
        // deployment's process-spawning primitive.
        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg(&cmd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| format!("failed to spawn {cmd:?} for {user}: {e}"))?;

        let mut child_stdin = child.stdin.take().expect("piped stdin");
        let mut child_stdout = child.stdout.take().expect("piped stdout");
        let mut child_stderr = child.stderr.take().expect("piped stderr");

        let stdin_task = {
            let flow = flow.clone();
            tokio::spawn(async move {
                loop {
                    match flow.read().await {
                        Ok(Some(chunk)) => {
                            if child_stdin.write_all(&chunk).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!(error = %e, "reading stdin from flow failed");
                            break;
                        }
                    }
                }
                let _ = child_stdin.shutdown().await;
            })
        };

        let stdout_task = {
            let flow = flow.clone();
            tokio::spawn(async move { copy_to_flow(&mut child_stdout, flow, Channel::Stdout).await })
        };

        let stderr_task = {
            let flow = flow.clone();
            tokio::spawn(async move { copy_to_flow(&mut child_stderr, flow, Channel::Stderr).await })
        };

        let status = child
            .wait()
            .await
            .map_err(|e| format!("waiting on child failed: {e}"))?;

        let _ = stdin_task.await;
        let _ = stdout_task.await;
        let _ = stderr_task.await;

        // Signal termination has no POSIX exit code; the decided mapping
        // is exit code 255 (DESIGN.md, unspecified-behavior note).
        Ok(status.code().unwrap_or(255))
    }
}

enum Channel {
    Stdout,
    Stderr,
}

async fn copy_to_flow<T, R>(mut src: R, flow: Arc<Flow<T>>, channel: Channel)
where
    T: Transport,
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = vec![0u8; COPY_CHUNK_SIZE];
    loop {
        let n = match src.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "reading child output failed");
                break;
            }
        };
        let chunk = Bytes::copy_from_slice(&buf[..n]);
        let sent = match channel {
            Channel::Stdout => flow.write(chunk).await,
            Channel::Stderr => flow.ewrite(chunk).await,
        };
        if let Err(e) = sent {
            warn!(error = %e, "writing child output to flow failed");
            break;
        }
    }
}

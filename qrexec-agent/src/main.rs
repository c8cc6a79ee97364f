//! Reference qrexec-style guest agent: accepts one management connection,
//! runs the listener loop, and dials back per-session connections to carry
//! each command's stdio.

mod handler;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use qrexec_core::transport::stream::StreamTransport;
use qrexec_core::{run_listener, FramedChannel};
use tokio::net::{UnixListener, UnixStream};
use tracing_subscriber::EnvFilter;

use handler::ProcessHandler;

#[derive(Parser, Debug)]
#[command(name = "qrexec-agent")]
#[command(about = "Reference guest agent for the qrexec-style command protocol")]
struct Args {
    /// Unix socket the management channel is accepted on, standing in for
    /// the hypervisor-provided management channel.
    #[arg(long)]
    management_socket: PathBuf,

    /// Directory containing one Unix socket per (domid, port) pair that a
    /// per-session channel dials into, standing in for the hypervisor's
    /// inter-domain channel-open primitive.
    #[arg(long)]
    session_socket_dir: PathBuf,

    /// Overrides `RUST_LOG` when set.
    #[arg(long)]
    log_filter: Option<String>,
}

fn main() {
    let args = Args::parse();

    let filter = match &args.log_filter {
        Some(f) => EnvFilter::new(f),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to create runtime");

    rt.block_on(run(args));
}

async fn run(args: Args) {
    if args.management_socket.exists() {
        let _ = std::fs::remove_file(&args.management_socket);
    }
    let listener = UnixListener::bind(&args.management_socket)
        .unwrap_or_else(|e| panic!("failed to bind {:?}: {e}", args.management_socket));

    tracing::info!(socket = ?args.management_socket, "waiting for management connection");
    let (stream, _) = listener
        .accept()
        .await
        .expect("failed to accept management connection");
    tracing::info!("management connection accepted");

    let management = FramedChannel::new(StreamTransport::new(stream));
    let dialer = Arc::new(UnixDialer {
        socket_dir: args.session_socket_dir,
    });
    let handler = Arc::new(ProcessHandler);

    if let Err(e) = run_listener(management, dialer, handler).await {
        tracing::error!(error = %e, "listener exited with a handshake error");
        std::process::exit(1);
    }
}

struct UnixDialer {
    socket_dir: PathBuf,
}

impl qrexec_core::Dialer<StreamTransport> for UnixDialer {
    async fn dial(
        &self,
        domid: u32,
        port: u32,
    ) -> Result<StreamTransport, qrexec_core::TransportError> {
        let path = self.socket_dir.join(format!("{domid}-{port}.sock"));
        let stream = UnixStream::connect(&path).await?;
        Ok(StreamTransport::new(stream))
    }
}

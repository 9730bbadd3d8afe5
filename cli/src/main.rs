use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use qssl_handshake::{QsslConfig, QsslTransport};
use tokio::net::UdpSocket;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "qssl", about = "Hybrid classical/post-quantum secure datagram endpoints")]
struct Cli {
    #[command(flatten)]
    tuning: Tuning,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Wait for one initiator, then answer its messages until it closes
    Serve {
        #[arg(long, env = "QSSL_BIND", default_value = "0.0.0.0:9443")]
        bind: SocketAddr,
        /// Write the derived session key here once the handshake completes
        #[arg(long, env = "QSSL_KEY_FILE")]
        key_file: Option<PathBuf>,
        /// Reply to each message with the same bytes
        #[arg(long)]
        echo: bool,
    },
    /// Handshake with a responder and send one message
    Send {
        #[arg(long, env = "QSSL_PEER", default_value = "127.0.0.1:9443")]
        peer: SocketAddr,
        #[arg(long, default_value = "0.0.0.0:0")]
        bind: SocketAddr,
        #[arg(long)]
        message: String,
        /// Wait for the responder's reply before closing
        #[arg(long)]
        expect_reply: bool,
        #[arg(long, env = "QSSL_KEY_FILE")]
        key_file: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct Tuning {
    #[arg(long, global = true, default_value_t = 500)]
    ack_timeout_ms: u64,
    #[arg(long, global = true, default_value_t = 5)]
    max_retries: u32,
    #[arg(long, global = true, default_value_t = 30)]
    receive_timeout_secs: u64,
    #[arg(long, global = true, default_value_t = 60)]
    handshake_timeout_secs: u64,
    #[arg(long, global = true)]
    verbose: bool,
}

impl Tuning {
    fn config(&self) -> Result<QsslConfig> {
        let mut builder = QsslConfig::builder()
            .ack_timeout(Duration::from_millis(self.ack_timeout_ms))
            .max_retries(self.max_retries)
            .receive_timeout(Duration::from_secs(self.receive_timeout_secs))
            .handshake_timeout(Duration::from_secs(self.handshake_timeout_secs));
        if self.verbose {
            builder = builder.verbose();
        }
        builder.build().map_err(anyhow::Error::msg)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let cli = Cli::parse();
    let transport = QsslTransport::new(cli.tuning.config()?);

    match cli.command {
        Command::Serve {
            bind,
            key_file,
            echo,
        } => serve(&transport, bind, key_file, echo).await,
        Command::Send {
            peer,
            bind,
            message,
            expect_reply,
            key_file,
        } => send(&transport, bind, peer, &message, expect_reply, key_file).await,
    }
}

async fn serve(
    transport: &QsslTransport,
    bind: SocketAddr,
    key_file: Option<PathBuf>,
    echo: bool,
) -> Result<()> {
    let socket = UdpSocket::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(%bind, "waiting for an initiator");

    let mut session = transport.accept(socket).await.context("handshake failed")?;
    info!(key = %session.session_key()?.fingerprint(), "session active");
    if let Some(path) = &key_file {
        session
            .persist_key(path)
            .await
            .context("failed to write session key")?;
    }

    let handled = session
        .serve(|message| {
            println!("{}", String::from_utf8_lossy(message));
            echo.then(|| message.to_vec())
        })
        .await
        .context("session aborted")?;

    let stats = session.stats();
    info!(
        handled,
        retransmissions = stats.link.retransmissions,
        duration_ms = stats.duration_ms,
        "peer closed the session"
    );
    Ok(())
}

async fn send(
    transport: &QsslTransport,
    bind: SocketAddr,
    peer: SocketAddr,
    message: &str,
    expect_reply: bool,
    key_file: Option<PathBuf>,
) -> Result<()> {
    let socket = UdpSocket::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;

    let mut session = transport
        .connect(socket, peer)
        .await
        .with_context(|| format!("handshake with {peer} failed"))?;
    info!(%peer, key = %session.session_key()?.fingerprint(), "session active");
    if let Some(path) = &key_file {
        session
            .persist_key(path)
            .await
            .context("failed to write session key")?;
    }

    if expect_reply {
        match session.request(message.as_bytes()).await? {
            Some(reply) => println!("{}", String::from_utf8_lossy(&reply)),
            None => info!("responder closed before replying"),
        }
    } else {
        session.send(message.as_bytes()).await?;
    }

    session.close().await.context("close was not acknowledged")?;
    Ok(())
}

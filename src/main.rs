use std::sync::Arc;

use anyhow::Context;
use chrono::Local;
use clap::Parser;
use log::{error, info, warn};
use peercall::calls::media::{DeviceMediaCapture, RemoteMediaHandle, SyntheticCaptureBackend};
use peercall::calls::{
    CallObserver, CallSession, CallState, CallType, ErrorKind, WebRtcTransportFactory,
    WebSocketSignalingChannel,
};
use peercall::config::{CallRole, CallSessionConfig, PeerCallConfig};

// Places or answers one call through a signaling relay.
//
// Usage:
//   cargo run -- --relay ws://localhost:8080/ws --user alice --peer bob           # audio call
//   cargo run -- --relay ws://localhost:8080/ws --user bob --peer alice --answer  # answer it
//   cargo run -- -r ws://localhost:8080/ws -u alice -p bob --video                # video call
//
// Capture devices are synthetic, so the run exercises signaling and
// negotiation only.

#[derive(Parser)]
#[command(name = "peercall")]
#[command(about = "Place or answer a peer-to-peer call")]
struct Cli {
    /// Signaling relay base URL; the local user id is appended as a path segment.
    #[arg(short, long)]
    relay: Option<String>,

    #[arg(short, long)]
    user: String,

    #[arg(short, long)]
    peer: String,

    #[arg(long)]
    video: bool,

    /// Wait for the peer's offer instead of calling.
    #[arg(long)]
    answer: bool,

    /// JSON file with signaling, webrtc and media settings.
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,
}

struct LoggingObserver;

impl CallObserver for LoggingObserver {
    fn on_remote_stream(&self, remote: RemoteMediaHandle) {
        info!(
            "Remote stream up ({} track(s), video: {})",
            remote.len(),
            remote.has_video()
        );
    }

    fn on_call_end(&self) {
        info!("Call over");
    }

    fn on_error(&self, kind: ErrorKind, message: &str) {
        error!("{} ({kind}): {message}", kind.category().message());
    }

    fn on_state_changed(&self, state: &CallState) {
        info!("State: {state}");
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<PeerCallConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            PeerCallConfig::from_json(&json).context("parsing config")?
        }
        None => PeerCallConfig::default(),
    };
    if let Some(relay) = &cli.relay {
        config.signaling.relay_url = relay.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let call_type = if cli.video {
        CallType::Video
    } else {
        CallType::Audio
    };
    let role = if cli.answer {
        CallRole::Callee
    } else {
        CallRole::Caller
    };
    let session_config = CallSessionConfig::new(&cli.user, &cli.peer, call_type, role)
        .with_connect_timeout(config.signaling.connect_timeout);

    let mut session = CallSession::new(
        session_config,
        Arc::new(DeviceMediaCapture::new(SyntheticCaptureBackend, config.media)),
        Arc::new(WebSocketSignalingChannel::new(config.signaling.clone())),
        Arc::new(WebRtcTransportFactory::new(config.webrtc.clone())),
        Arc::new(LoggingObserver),
    );

    let handle = session.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, hanging up");
            handle.hangup();
        }
    });

    if let Err(e) = session.start().await {
        warn!("Call could not start: {e}");
        return Ok(());
    }

    let final_state = session.run().await;
    info!("Final state: {final_state}");
    Ok(())
}

//! playoutd: the playout media playback daemon

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use playout_common::ServerConfig;
use tracing::info;

use playout_server::cdm::{CdmService, UnavailableOcdmFactory};
use playout_server::ipc::SessionManagementServer;
use playout_server::service::{self, PlaybackService};
use playout_server::shm::SharedMemoryBuffer;

/// Hosts media pipelines on behalf of client applications.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Unix socket to listen on
    #[arg(short, long, default_value = "/tmp/playout-0")]
    socket: PathBuf,

    /// Number of concurrent playback sessions
    #[arg(long, default_value_t = 2)]
    max_playbacks: u32,

    /// Per-session audio buffer size in bytes
    #[arg(long, default_value_t = 1024 * 1024)]
    audio_buffer: u32,

    /// Per-session video buffer size in bytes
    #[arg(long, default_value_t = 7 * 1024 * 1024)]
    video_buffer: u32,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", &args.log_level);
    }
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("playoutd v{} starting", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig {
        socket_path: args.socket.display().to_string(),
        max_playbacks: args.max_playbacks,
        audio_partition_len: args.audio_buffer,
        video_partition_len: args.video_buffer,
        ..Default::default()
    };

    let shm = Arc::new(
        SharedMemoryBuffer::new(
            config.max_playbacks,
            config.audio_partition_len,
            config.video_partition_len,
        )
        .context("creating the shared media buffer")?,
    );
    info!(
        "Shared media buffer: {} bytes across {} partitions",
        shm.size(),
        config.max_playbacks
    );

    // Platform integrations install a real OCDM factory here; without
    // one, DRM calls fail cleanly and clear content still plays.
    let cdm = Arc::new(CdmService::new(Arc::new(UnavailableOcdmFactory)));

    let player_factory = make_player_factory()?;
    let playback = service::spawn(PlaybackService::new(
        config.clone(),
        shm.clone(),
        player_factory,
        cdm.clone(),
    ));

    let server = SessionManagementServer::bind(&args.socket, playback, cdm, shm)
        .context("binding the session management socket")?;

    tokio::select! {
        _ = server.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    Ok(())
}

#[cfg(feature = "gst")]
fn make_player_factory() -> Result<Arc<dyn playout_server::player::PlayerFactory>> {
    Ok(Arc::new(
        playout_server::player::GstPlayerFactory::new().context("initialising GStreamer")?,
    ))
}

#[cfg(not(feature = "gst"))]
fn make_player_factory() -> Result<Arc<dyn playout_server::player::PlayerFactory>> {
    anyhow::bail!("built without the 'gst' feature; no pipeline backend available")
}

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tape_common::{format_ms, parse_to_ms};
use tape_core::config::CastConfig;
use tape_core::runner::{FfmpegLauncher, Runner, RunnerEvent};
use tape_core::{Session, SessionOptions};
use tracing::{error, info, warn};

/// tapecast: restream a video file (or a live feed) to a tape relay,
/// driven by chat commands.
#[derive(Parser)]
#[command(name = "tapecast", version)]
struct Args {
    /// Path to config.yaml. Defaults to the user config directory.
    #[arg(long, global = true, env = "TAPECAST_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Cast to a relay. Without a file, casts whatever is published to the
    /// local ingress as a live feed.
    Cast {
        /// Relay server URL (http:// or https://)
        #[arg(env = "TAPECAST_SERVER")]
        server_url: String,

        /// Video file to cast
        file: Option<PathBuf>,

        /// Title shown to viewers. Defaults to the file's metadata or name.
        #[arg(long, env = "TAPECAST_TITLE")]
        title: Option<String>,

        /// Room to cast into
        #[arg(long, env = "TAPECAST_ROOM")]
        room: Option<String>,
    },
    /// Transcode a file to an output URL locally and log the position.
    StreamTest {
        file: PathBuf,
        /// e.g. rtmp://localhost/live/test
        output: String,
    },
}

fn configure_logging() {
    use tracing_subscriber::prelude::*;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_line_number(true)
        .with_target(false)
        .with_file(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

#[tokio::main]
async fn main() {
    configure_logging();
    let args = Args::parse();

    let config = CastConfig::load(args.config.as_deref()).unwrap_or_else(|e| {
        error!("Failed to load config: {e}");
        std::process::exit(1);
    });

    match args.command {
        Command::Cast {
            server_url,
            file,
            title,
            room,
        } => {
            let options = SessionOptions {
                tape: file,
                title,
                room,
            };
            cast(&server_url, options, &config).await;
        }
        Command::StreamTest { file, output } => stream_test(&file, &output, &config).await,
    }
}

async fn cast(server_url: &str, options: SessionOptions, config: &CastConfig) {
    info!("tapecast connecting to {server_url}");
    let session = Session::connect(server_url, options, config)
        .await
        .unwrap_or_else(|e| {
            error!("Failed to start cast session: {e}");
            std::process::exit(1);
        });
    info!("Casting; ingress listening on {}", session.ingress_addr());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        _ = session.closed() => warn!("Relay closed the chat feed"),
    }

    if let Err(e) = session.shutdown().await {
        error!("Shutdown failed: {e}");
        std::process::exit(1);
    }
    info!("tapecast stopped");
}

async fn stream_test(file: &Path, output: &str, config: &CastConfig) {
    if !file.exists() {
        error!("File not found: {}", file.display());
        std::process::exit(1);
    }
    let (runner, mut events) = Runner::new(Arc::new(FfmpegLauncher::from_config(config)));
    runner.start(file, 0, output).unwrap_or_else(|e| {
        error!("{e}");
        std::process::exit(1);
    });

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                if let Err(e) = runner.stop() {
                    warn!("Failed to stop transcoder: {e}");
                }
                break;
            }
            event = events.recv() => match event {
                Some(RunnerEvent::Progress(progress)) => {
                    let Some(out_time) = progress.out_time() else {
                        continue;
                    };
                    match parse_to_ms(out_time) {
                        Ok(ms) => {
                            info!("time: {}", format_ms(progress.seek_ms.saturating_add(ms)))
                        }
                        Err(e) => warn!("{e}"),
                    }
                }
                Some(RunnerEvent::Exited { clean, .. }) => {
                    info!("Transcoder finished (clean: {clean})");
                    break;
                }
                None => break,
            }
        }
    }
}

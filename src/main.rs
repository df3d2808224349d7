/// Wake-word listener binary
///
/// `listen` runs the live capture loop; `replay` scores a recorded WAV file
/// with the same framing and threshold.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use wake_listener::audio_buffer::DEFAULT_CLIP_SECS;
use wake_listener::clip::DEFAULT_CLIP_PATH;
use wake_listener::config::DEFAULT_WAKE_WORD;
use wake_listener::{
    replay_wav, AnnounceFormat, ClipConfig, CpalSource, DetectionLoop, HandoffCommand,
    ListenerConfig, ListenerError, SubprocessOracle, TriggerPolicy, DEFAULT_THRESHOLD,
};

#[derive(Parser)]
#[command(name = "wake-listener", version, about = "Listen for a wake word and hand off to a command")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Listen on the default microphone until interrupted
    Listen(ListenArgs),

    /// Score a recorded 16kHz mono WAV file
    Replay(ReplayArgs),
}

#[derive(Args)]
struct ModelArgs {
    /// Scorer command speaking the frame/JSON line protocol
    #[arg(long, env = "WAKE_ORACLE_CMD")]
    oracle_cmd: String,

    /// Score map key to listen for
    #[arg(short, long, env = "WAKE_WORD", default_value = DEFAULT_WAKE_WORD)]
    wake_word: String,

    /// Detection threshold (0.0 - 1.0)
    #[arg(short, long, env = "WAKE_THRESHOLD", default_value_t = DEFAULT_THRESHOLD)]
    threshold: f32,
}

#[derive(Args)]
struct ListenArgs {
    #[command(flatten)]
    model: ModelArgs,

    /// Save the audio leading up to each detection
    #[arg(long, env = "WAKE_SAVE_CLIP")]
    save_clip: bool,

    /// Where the clip is written (overwritten on every detection)
    #[arg(long, env = "WAKE_CLIP_PATH", default_value = DEFAULT_CLIP_PATH)]
    clip_path: PathBuf,

    /// Seconds of audio kept for the clip
    #[arg(long, env = "WAKE_CLIP_SECS", default_value_t = DEFAULT_CLIP_SECS)]
    clip_secs: f32,

    /// Print detections as JSON
    #[arg(long)]
    json: bool,

    /// Command run after each detection; listening resumes when it exits
    #[arg(last = true)]
    handoff: Vec<String>,
}

#[derive(Args)]
struct ReplayArgs {
    #[command(flatten)]
    model: ModelArgs,

    /// Recording to score
    #[arg(default_value = DEFAULT_CLIP_PATH)]
    file: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr; stdout carries detection announcements
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("wake_listener=info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Listen(args) => listen(args).await,
        Commands::Replay(args) => replay(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            let code = e
                .downcast_ref::<ListenerError>()
                .map(ListenerError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}

async fn listen(args: ListenArgs) -> anyhow::Result<()> {
    info!("Starting wake-word listener");

    let config = ListenerConfig {
        wake_word: args.model.wake_word,
        threshold: args.model.threshold,
        clip: ClipConfig {
            enabled: args.save_clip,
            duration_secs: args.clip_secs,
            path: args.clip_path,
        },
        handoff: HandoffCommand::from_argv(args.handoff),
        announce: if args.json {
            AnnounceFormat::Json
        } else {
            AnnounceFormat::Plain
        },
        ..Default::default()
    };
    config.validate().map_err(ListenerError::from)?;

    let oracle = SubprocessOracle::from_command_line(&args.model.oracle_cmd)
        .map_err(ListenerError::from)
        .context("Failed to start scoring model")?;

    let cancel = CancellationToken::new();
    watch_interrupts(cancel.clone());

    let source = CpalSource::new(config.sample_rate, config.frame_len);
    let mut detection =
        DetectionLoop::new(source, oracle, &config, cancel).map_err(ListenerError::from)?;

    let stats = detection.run().await?;
    info!(
        "Wake-word listener stopped: {} sessions, {} frames scored, {} detections",
        stats.sessions, stats.frames_scored, stats.detections
    );

    Ok(())
}

async fn replay(args: ReplayArgs) -> anyhow::Result<()> {
    let config = ListenerConfig {
        wake_word: args.model.wake_word,
        threshold: args.model.threshold,
        ..Default::default()
    };
    config.validate().map_err(ListenerError::from)?;

    let mut oracle = SubprocessOracle::from_command_line(&args.model.oracle_cmd)
        .map_err(ListenerError::from)
        .context("Failed to start scoring model")?;
    let policy = TriggerPolicy::new(config.wake_word.clone(), config.threshold);

    let report = replay_wav(
        &args.file,
        &mut oracle,
        &policy,
        config.frame_len,
        config.sample_rate,
    )
    .await
    .map_err(ListenerError::from)?;

    if let Some(warning) = &report.format_warning {
        println!("Warning: {}", warning);
    }

    match &report.detection {
        Some(hit) => {
            println!("Wake word detected in recording!");
            println!(
                "Detection score: {:.3} (frame {}, {:.2}s)",
                hit.score, hit.frame_index, hit.offset_secs
            );
        }
        None => {
            println!("No wake word detected in recording");
            println!("Maximum detection score: {:.3}", report.max_score);
        }
    }

    Ok(())
}

/// Cancel on Ctrl+C. Repeated interrupts only log.
fn watch_interrupts(cancel: CancellationToken) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if cancel.is_cancelled() {
                warn!("Interrupt received again; shutdown already in progress");
            } else {
                info!("Interrupt received, shutting down");
                cancel.cancel();
            }
        }
    });
}

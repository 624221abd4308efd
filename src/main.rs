//! pitchcap CLI: record from the microphone, transcode files, list devices.
//!
//! Subcommands:
//! - `pitchcap record [-o out.wav] [--seconds N] [--device NAME] [--transcribe]`
//! - `pitchcap transcode <input> [-o out.wav]`
//! - `pitchcap devices`

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::oneshot;

use pitchcap::{
    audio::{list_input_devices, CpalSource, SymphoniaDecoder, WavBytes},
    config::AppConfig,
    pipeline::{transcode_chunks, PipelineError, PipelineOrchestrator},
    stt::{HttpTranscriber, Transcriber},
};

#[derive(Parser)]
#[command(name = "pitchcap")]
#[command(about = "Capture speech and produce 16 kHz mono WAV for transcription")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record from an input device until Enter is pressed or the timer ends
    Record {
        /// Output WAV path
        #[arg(short, long, default_value = "recording.wav")]
        output: PathBuf,

        /// Stop automatically after this many seconds
        #[arg(long)]
        seconds: Option<f32>,

        /// Input device name (see `pitchcap devices`)
        #[arg(long)]
        device: Option<String>,

        /// Post the recording to the transcription endpoint
        #[arg(long)]
        transcribe: bool,
    },

    /// Convert an audio file (WAV, FLAC, Ogg Vorbis, WebM) to canonical WAV
    Transcode {
        /// Input container file
        input: PathBuf,

        /// Output WAV path
        #[arg(short, long, default_value = "output.wav")]
        output: PathBuf,
    },

    /// List input devices
    Devices,
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

/// Resolves on Enter, or when `seconds` elapse.
///
/// Stdin is read on a plain thread so a pending read never holds up runtime
/// shutdown.
async fn stop_signal(seconds: Option<f32>) {
    let (tx, rx) = oneshot::channel::<()>();
    std::thread::spawn(move || {
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
        let _ = tx.send(());
    });

    match seconds {
        Some(secs) => {
            tokio::select! {
                _ = rx => {}
                _ = tokio::time::sleep(Duration::from_secs_f32(secs.max(0.0))) => {
                    log::info!("recording timer elapsed");
                }
            }
        }
        None => {
            let _ = rx.await;
        }
    }
}

async fn record(
    mut config: AppConfig,
    output: &Path,
    seconds: Option<f32>,
    device: Option<String>,
    transcribe: bool,
) -> Result<()> {
    if device.is_some() {
        config.capture.device = device;
    }

    let mut orchestrator = PipelineOrchestrator::new(
        Box::new(CpalSource::new(config.capture.clone())),
        Arc::new(SymphoniaDecoder::new()),
        config.audio.clone(),
    );

    let mut states = orchestrator.subscribe();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            log::info!("{}", state.label());
        }
    });

    match seconds {
        Some(secs) => println!("Recording for up to {secs:.1} s, press Enter to stop early..."),
        None => println!("Recording, press Enter to stop..."),
    }

    let wav = match orchestrator.record_and_transcode(stop_signal(seconds)).await {
        Ok(wav) => wav,
        Err(PipelineError::NoAudioCaptured) => {
            println!("No audio was captured. Check the input device and try again.");
            return Ok(());
        }
        Err(e) => return Err(e).context("recording failed"),
    };

    write_wav(output, &wav)?;

    if transcribe || config.transcribe.enabled {
        let stt = HttpTranscriber::from_config(&config.transcribe);
        let text = stt
            .transcribe(&wav)
            .await
            .with_context(|| format!("transcription via {} failed", stt.endpoint()))?;
        println!("{text}");
    }

    Ok(())
}

async fn transcode(config: AppConfig, input: &Path, output: &Path) -> Result<()> {
    let bytes =
        std::fs::read(input).with_context(|| format!("failed to read {}", input.display()))?;

    let wav = transcode_chunks(
        Arc::new(SymphoniaDecoder::new()),
        vec![bytes],
        config.audio.target_sample_rate,
        config.audio.resampler,
    )
    .await
    .with_context(|| format!("failed to transcode {}", input.display()))?;

    write_wav(output, &wav)
}

fn devices() -> Result<()> {
    let names = list_input_devices()?;
    if names.is_empty() {
        println!("No input devices found.");
    }
    for name in names {
        println!("{name}");
    }
    Ok(())
}

fn write_wav(path: &Path, wav: &WavBytes) -> Result<()> {
    std::fs::write(path, wav.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    let header = wav.header();
    println!(
        "Wrote {} ({:.2} s, {} Hz mono, {} bytes)",
        path.display(),
        wav.duration_secs(),
        header.sample_rate,
        wav.len()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => AppConfig::load().unwrap_or_else(|e| {
            log::warn!("Failed to load config ({e}); using defaults");
            AppConfig::default()
        }),
    };

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    match cli.command {
        Commands::Record {
            output,
            seconds,
            device,
            transcribe,
        } => rt.block_on(record(config, &output, seconds, device, transcribe)),
        Commands::Transcode { input, output } => rt.block_on(transcode(config, &input, &output)),
        Commands::Devices => devices(),
    }
}

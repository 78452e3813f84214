//! Entrain CLI - Command-line interface for Synheart Entrain
//!
//! Commands:
//! - simulate: Replay recorded samples through the controller
//! - timing: Show pulse timing for a cadence
//! - config: Print the default configuration or check a config file

use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use synheart_entrain::haptics::LoggingActuator;
use synheart_entrain::{
    AnxietyEpisode, AnxietySample, EntrainError, EntrainmentConfig, EntrainmentController,
    EpisodeSink, FeedError, FeedStatus, JsonLinesEpisodeSink, MemoryEpisodeSink, PulseTiming,
    SessionState, ENTRAIN_VERSION,
};

/// Entrain - Anxiety-triggered haptic breathing entrainment
#[derive(Parser)]
#[command(name = "entrain")]
#[command(author = "Synheart AI Inc")]
#[command(version = ENTRAIN_VERSION)]
#[command(about = "Replay and inspect haptic entrainment sessions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay NDJSON samples through the controller, printing events as NDJSON
    Simulate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Configuration file (JSON); defaults apply when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Append completed episodes to this file (NDJSON)
        #[arg(long)]
        episodes: Option<PathBuf>,

        /// Pace samples by their timestamp gaps instead of replaying at once
        #[arg(long)]
        realtime: bool,
    },

    /// Show on/off pulse durations for a cadence
    Timing {
        /// Pulses per minute
        #[arg(long)]
        cadence: f64,

        /// Fraction of each cycle the actuator is on
        #[arg(long, default_value = "0.5")]
        duty: f64,
    },

    /// Print the default configuration, or validate a configuration file
    Config {
        /// Configuration file to check
        #[arg(long)]
        check: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), EntrainCliError> {
    match cli.command {
        Commands::Simulate {
            input,
            config,
            episodes,
            realtime,
        } => cmd_simulate(&input, config.as_deref(), episodes.as_deref(), realtime).await,

        Commands::Timing { cadence, duty } => cmd_timing(cadence, duty),

        Commands::Config { check } => cmd_config(check.as_deref()),
    }
}

async fn cmd_simulate(
    input: &Path,
    config: Option<&Path>,
    episodes: Option<&Path>,
    realtime: bool,
) -> Result<(), EntrainCliError> {
    let config = load_config(config)?;
    let samples = parse_samples(&read_input(input)?)?;
    if samples.is_empty() {
        return Err(EntrainCliError::NoSamples);
    }

    let file_sink = episodes.map(JsonLinesEpisodeSink::open).transpose()?;
    let log = MemoryEpisodeSink::new();
    let memory = log.clone();
    let sink = move |episode: &AnxietyEpisode| {
        if let Some(file_sink) = &file_sink {
            if let Err(e) = file_sink.record(episode) {
                warn!(error = %e, "Failed to write episode");
            }
        }
        if let Err(e) = memory.record(episode) {
            warn!(error = %e, "Failed to keep episode");
        }
    };

    let controller = EntrainmentController::new(config, sink)?;
    let mut events = controller.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => warn!(error = %e, "Failed to encode event"),
                },
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event printer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    info!(samples = samples.len(), realtime, "Replaying samples");
    controller
        .start(sample_feed(samples, realtime), Arc::new(LoggingActuator))
        .await;

    let mut status = controller.watch_status();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        _ = async {
            // Let an episode in progress run to recovery or abort
            let _ = status
                .wait_for(|s| s.feed != FeedStatus::Live && s.state == SessionState::Idle)
                .await;
        } => {}
    }

    controller.stop().await;
    drop(controller);
    let _ = printer.await;

    info!(episodes = log.len(), "Simulation finished");
    Ok(())
}

fn cmd_timing(cadence: f64, duty: f64) -> Result<(), EntrainCliError> {
    let config = EntrainmentConfig {
        target_cadence_bpm: cadence,
        duty_cycle: duty,
        ..Default::default()
    };
    config.validate()?;

    let timing = PulseTiming::from_cadence(cadence, duty);
    let report = serde_json::json!({
        "cadence_bpm": cadence,
        "duty_cycle": duty,
        "on_ms": timing.on.as_millis() as u64,
        "off_ms": timing.off.as_millis() as u64,
        "cycle_ms": timing.cycle().as_millis() as u64,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn cmd_config(check: Option<&Path>) -> Result<(), EntrainCliError> {
    match check {
        Some(path) => {
            let config = EntrainmentConfig::from_json(&fs::read_to_string(path)?)?;
            let timing = PulseTiming::from_cadence(config.target_cadence_bpm, config.duty_cycle);
            let report = serde_json::json!({
                "valid": true,
                "path": path.display().to_string(),
                "on_ms": timing.on.as_millis() as u64,
                "off_ms": timing.off.as_millis() as u64,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        None => println!("{}", EntrainmentConfig::default().to_json()?),
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<EntrainmentConfig, EntrainCliError> {
    match path {
        Some(path) => Ok(EntrainmentConfig::from_json(&fs::read_to_string(path)?)?),
        None => Ok(EntrainmentConfig::default()),
    }
}

fn read_input(input: &Path) -> Result<String, EntrainCliError> {
    if input.to_string_lossy() == "-" {
        if atty::is(atty::Stream::Stdin) {
            return Err(EntrainCliError::NoInput);
        }
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn parse_samples(data: &str) -> Result<Vec<AnxietySample>, EntrainCliError> {
    data.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line).map_err(|e| {
                EntrainCliError::ParseError(format!("line {}: {}", n + 1, e))
            })
        })
        .collect()
}

/// Turn recorded samples into a feed, optionally paced by timestamp gaps
fn sample_feed(
    samples: Vec<AnxietySample>,
    realtime: bool,
) -> impl futures::Stream<Item = Result<AnxietySample, FeedError>> + Send + 'static {
    let mut previous = None;
    let paced: Vec<(AnxietySample, Duration)> = samples
        .into_iter()
        .map(|sample| {
            let gap = previous
                .and_then(|prev: AnxietySample| (sample.timestamp - prev.timestamp).to_std().ok())
                .filter(|_| realtime)
                .unwrap_or(Duration::ZERO);
            previous = Some(sample);
            (sample, gap)
        })
        .collect();

    stream::iter(paced).then(|(sample, gap)| async move {
        if !gap.is_zero() {
            tokio::time::sleep(gap).await;
        }
        Ok(sample)
    })
}

#[derive(Debug)]
enum EntrainCliError {
    Io(io::Error),
    Entrain(EntrainError),
    Json(serde_json::Error),
    NoInput,
    NoSamples,
    ParseError(String),
}

impl From<io::Error> for EntrainCliError {
    fn from(e: io::Error) -> Self {
        EntrainCliError::Io(e)
    }
}

impl From<EntrainError> for EntrainCliError {
    fn from(e: EntrainError) -> Self {
        EntrainCliError::Entrain(e)
    }
}

impl From<serde_json::Error> for EntrainCliError {
    fn from(e: serde_json::Error) -> Self {
        EntrainCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<EntrainCliError> for CliError {
    fn from(e: EntrainCliError) -> Self {
        match e {
            EntrainCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            EntrainCliError::Entrain(EntrainError::InvalidConfig(msg)) => CliError {
                code: "INVALID_CONFIG".to_string(),
                message: msg,
                hint: Some("Run `entrain config` to see a valid configuration".to_string()),
            },
            EntrainCliError::Entrain(e) => CliError {
                code: "ENTRAIN_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            EntrainCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check the JSON syntax".to_string()),
            },
            EntrainCliError::NoInput => CliError {
                code: "NO_INPUT".to_string(),
                message: "No input on stdin".to_string(),
                hint: Some("Pipe NDJSON samples in, or pass --input <file>".to_string()),
            },
            EntrainCliError::NoSamples => CliError {
                code: "NO_SAMPLES".to_string(),
                message: "Input contains no samples".to_string(),
                hint: Some(
                    "Each line should look like {\"timestamp\":\"2024-01-15T14:00:00Z\",\"hr\":72,\"hrv\":48.5}"
                        .to_string(),
                ),
            },
            EntrainCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Each line must be one JSON sample".to_string()),
            },
        }
    }
}

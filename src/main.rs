//! cardscan - Real-time payment card recognition
//!
//! Command line front end. Replays recorded recognizer output through the
//! multi-engine scanner, which is how scanning behaviour is tuned and checked
//! without a camera.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::{bounded, Sender};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use cardscan::capture::FrameMetadata;
use cardscan::config::{self, ScanConfig};
use cardscan::scan::{CardDetails, MainLoop, ScanObserver, ScanResult, ScanState};
use cardscan::vision::{self, Prediction, RecognitionEngine, ScriptedEngine};

/// cardscan - multi-engine payment card scanner
#[derive(Parser, Debug)]
#[command(name = "cardscan")]
#[command(about = "Combine noisy per-frame card readings into one confident result")]
struct Args {
    /// Configuration file (defaults to the user configuration directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level, overrides the configuration file
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a JSON script of recognized text lines through the scanner
    Replay {
        /// Script file: JSON array of {"lines": [...], "latency_ms": n, "image": path, "roi": {...}}
        script: PathBuf,

        /// Number of engines to run side by side
        #[arg(short, long)]
        engines: Option<usize>,

        /// Delay between frames in milliseconds
        #[arg(long, default_value = "33")]
        frame_interval_ms: u64,

        /// Give up and cancel after this many seconds
        #[arg(long, default_value = "30")]
        timeout_secs: u64,
    },
    /// Print the effective configuration as TOML
    PrintConfig,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let (config, source) = load_or_create_config(args.config.as_deref())?;

    // Initialize logging
    let level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_new(level)?)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match source {
        Some(path) => info!("Loaded configuration from {:?}", path),
        None => info!("Using default configuration"),
    }

    match args.command {
        Command::Replay {
            script,
            engines,
            frame_interval_ms,
            timeout_secs,
        } => run_replay(
            &config,
            &script,
            engines,
            Duration::from_millis(frame_interval_ms),
            Duration::from_secs(timeout_secs),
        ),
        Command::PrintConfig => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// Load configuration from the given or default path, falling back to defaults
fn load_or_create_config(path: Option<&Path>) -> Result<(ScanConfig, Option<PathBuf>)> {
    if let Some(path) = path {
        // An explicitly named file must load
        return Ok((config::load_config(path)?, Some(path.to_path_buf())));
    }

    if let Ok(config_path) = config::default_config_path() {
        if config_path.exists() {
            if let Ok(config) = config::load_config(&config_path) {
                return Ok((config, Some(config_path)));
            }
        }
    }
    Ok((ScanConfig::default(), None))
}

/// Feed the script to the scanner until it completes or the timeout passes
fn run_replay(
    config: &ScanConfig,
    script: &Path,
    engines: Option<usize>,
    frame_interval: Duration,
    timeout: Duration,
) -> Result<()> {
    let frames = vision::load_script(script)?;
    if frames.is_empty() {
        bail!("Replay script {:?} contains no frames", script);
    }
    let frame_count = frames.len() as u64;
    let base_dir = script.parent().unwrap_or_else(|| Path::new("."));
    let templates = vision::script_frames(&frames, base_dir)?;

    let engine_count = engines.unwrap_or(config.scanner.engine_count).max(1);
    let base = ScriptedEngine::new("replay-0", frames);
    let engines: Vec<Box<dyn RecognitionEngine>> = (0..engine_count)
        .map(|i| Box::new(base.sibling(format!("replay-{}", i))) as Box<dyn RecognitionEngine>)
        .collect();

    let (done_tx, done_rx) = bounded(1);
    let observer = Arc::new(ConsoleObserver { done: done_tx });
    let scanner = MainLoop::with_config(engines, Some(observer), config)?;

    info!(
        "Replaying {} frame(s) from {:?} with {} engine(s)",
        frame_count, script, engine_count
    );

    let stop = AtomicBool::new(false);
    let outcome = std::thread::scope(|scope| {
        scope.spawn(|| {
            let mut id = 0u64;
            while !stop.load(Ordering::SeqCst) {
                // Loop the script so slow-finishing sessions keep getting frames
                let mut frame = templates[(id % frame_count) as usize].clone();
                frame.timestamp = Instant::now();
                scanner.push(frame);
                id += 1;
                std::thread::sleep(frame_interval);
            }
        });

        let outcome = done_rx.recv_timeout(timeout).ok();
        stop.store(true, Ordering::SeqCst);
        outcome
    });

    match outcome {
        Some(result) => {
            println!("Scan complete ({} frames, {:?})", result.frame_count, result.duration);
            if result.has_number() {
                println!("  number: {}", result.number);
            } else {
                println!("  number: <none>");
            }
            if let Some(expiry) = result.expiry {
                println!("  expiry: {}", expiry);
            }
            if let Some(name) = &result.name {
                println!("  name:   {}", name);
            }
        }
        None => {
            warn!("No result after {:?}, cancelling", timeout);
            scanner.user_cancelled();
        }
    }

    let stats = scanner.statistics();
    info!(
        "Session {}: {} frames processed, {:.1} fps, success: {:?}",
        stats.session_id,
        stats.frames_processed,
        stats.frames_per_second(),
        stats.success()
    );

    Ok(())
}

/// Logs scanner progress and hands the final result back to `run_replay`
struct ConsoleObserver {
    done: Sender<ScanResult>,
}

impl ScanObserver for ConsoleObserver {
    fn on_prediction(&self, prediction: &Prediction, frame: &FrameMetadata, state: ScanState) {
        debug!(
            "[{}] frame {} in {:?}: number {}, state {}",
            prediction.engine,
            frame.frame_id,
            prediction.duration,
            prediction.number.as_deref().map(mask_number).unwrap_or_default(),
            state
        );
    }

    fn on_show_no_card(&self) {
        debug!("No card yet");
    }

    fn on_show_wrong_card(&self, details: &CardDetails) {
        info!("Wrong card? {}", describe(details));
    }

    fn on_show_card_details(&self, details: &CardDetails) {
        info!("Reading {}", describe(details));
    }

    fn on_show_card_details_urgent(&self, details: &CardDetails) {
        info!("Reading (needs torch) {}", describe(details));
    }

    fn on_complete(&self, result: &ScanResult) {
        info!("Scan finished in state {}", result.state);
        let _ = self.done.try_send(result.clone());
    }
}

/// Keep only the last four digits for log output
fn mask_number(number: &str) -> String {
    let visible = number.len().saturating_sub(4);
    format!("{}{}", "*".repeat(visible), &number[visible..])
}

fn describe(details: &CardDetails) -> String {
    format!(
        "number {} expiry {} name {}",
        details.number.as_deref().map(mask_number).unwrap_or_else(|| "-".into()),
        details.expiry.map(|e| e.to_string()).unwrap_or_else(|| "-".into()),
        details.name.as_deref().unwrap_or("-")
    )
}

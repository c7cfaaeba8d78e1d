//! # Singulation Line Daemon
//!
//! Loads the line configuration, brings up the drives, starts the
//! upstream transports and the line pipeline, then runs until Ctrl+C.
//!
//! With `--operator-stdin`, one JSON [`SafetyIoEvent`] per line on stdin
//! drives the safety I/O bridge, e.g. `{"kind":"emergency_stop"}` or
//! `{"kind":"remote_local_mode_changed","mode":"local"}`.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use singu::{LinePipeline, SafetyIoBridge};
use singu_common::config::{ConfigLoader, LogLevel};
use singu_common::consts::DEFAULT_CONFIG_PATH;
use singu_common::line::LineConfig;
use singu_common::safety::SafetyIoEvent;
use singu_control_unit::{RealtimeNotifier, SafetyIsolator, TracingNotifier};
use singu_hal::{AxisController, AxisEventAggregator, DriveRegistry, SimBus};
use singu_link::FrameHub;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::signal;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const STATUS_INTERVAL: Duration = Duration::from_secs(10);

/// Singulation line control daemon
#[derive(Parser, Debug)]
#[command(name = "singu")]
#[command(version)]
#[command(about = "Conveyor singulation line: upstream speed frames to axis drives")]
struct Args {
    /// Path to the line configuration TOML.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,

    /// Read safety I/O events as JSON lines from stdin.
    #[arg(long)]
    operator_stdin: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = LineConfig::load(&args.config);
    let level = match &config {
        Ok(c) => c.shared.log_level,
        Err(_) => LogLevel::default(),
    };
    setup_tracing(&args, level);

    info!("singu v{} starting", env!("CARGO_PKG_VERSION"));

    let result = match config {
        Ok(config) => run(&args, config).await,
        Err(e) => Err(e.into()),
    };
    if let Err(e) = result {
        error!("FATAL: {e}");
        process::exit(1);
    }

    info!("singu shutdown complete");
}

async fn run(args: &Args, config: LineConfig) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    info!(
        service = %config.shared.service_name,
        axes = config.axes.len(),
        upstream = %config.upstream.host,
        driver = %config.controller.driver,
        "config OK"
    );

    let hub = FrameHub::new();
    let notifier: Arc<dyn RealtimeNotifier> = Arc::new(TracingNotifier);
    let isolator = Arc::new(SafetyIsolator::new(notifier.clone()));
    let events = Arc::new(AxisEventAggregator::default());
    let registry = DriveRegistry::with_builtin();

    let controller = Arc::new(AxisController::from_config(
        &config,
        &registry,
        Arc::new(SimBus::new()),
        events,
    )?);
    // A failed bring-up is already on the event stream; the pipeline's
    // event pump turns it into a trip.
    if let Err(e) = controller.initialize().await {
        error!(error = %e, "axis controller bring-up failed");
    }

    let pipeline = Arc::new(LinePipeline::start(
        &config,
        hub,
        controller,
        isolator,
        notifier,
    )?);
    let bridge = SafetyIoBridge::new(pipeline.clone());

    let mut status = interval(STATUS_INTERVAL);
    status.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut operator = args
        .operator_stdin
        .then(|| BufReader::new(tokio::io::stdin()).lines());

    loop {
        let wake = tokio::select! {
            signal = signal::ctrl_c() => {
                match signal {
                    Ok(()) => info!("received shutdown signal (Ctrl+C)"),
                    Err(e) => error!("unable to listen for shutdown signal: {e}"),
                }
                break;
            }
            _ = status.tick() => Wake::Status,
            line = next_operator_line(operator.as_mut()) => Wake::Operator(line),
        };

        match wake {
            Wake::Status => info!(
                safety = %pipeline.isolator().state(),
                paused = pipeline.is_paused(),
                counters = ?pipeline.counters(),
                "line status"
            ),
            Wake::Operator(Ok(Some(line))) if line.trim().is_empty() => {}
            Wake::Operator(Ok(Some(line))) => match serde_json::from_str::<SafetyIoEvent>(&line) {
                Ok(event) => bridge.handle(event).await,
                Err(e) => warn!(error = %e, "unrecognised operator input"),
            },
            Wake::Operator(Ok(None)) => {
                info!("operator input closed");
                operator = None;
            }
            Wake::Operator(Err(e)) => {
                warn!(error = %e, "operator input failed");
                operator = None;
            }
        }
    }

    info!("initiating graceful shutdown");
    bridge.handle(SafetyIoEvent::StopRequested).await;
    pipeline.shutdown().await;
    Ok(())
}

enum Wake {
    Status,
    Operator(std::io::Result<Option<String>>),
}

type OperatorLines = Lines<BufReader<Stdin>>;

/// Next operator line, or never when operator input is off.
async fn next_operator_line(lines: Option<&mut OperatorLines>) -> std::io::Result<Option<String>> {
    match lines {
        Some(lines) => lines.next_line().await,
        None => std::future::pending().await,
    }
}

fn setup_tracing(args: &Args, level: LogLevel) {
    let directive = if args.verbose {
        LogLevel::Debug.as_directive()
    } else {
        level.as_directive()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init();
    }
}

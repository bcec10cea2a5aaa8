//! Mimic command-line host.
//!
//! Mirrors the screen into a hardware encoder and streams the compressed
//! video to an accessory device (or any file or pipe).

mod config;

use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mimic_capture::CaptureGrant;
use mimic_engine::{command_channel, Engine, HeadlessPlatform, SessionCommand, StartRequest};
use mimic_ipc::{event_channel, EndReason, SessionEvent};
use mimic_transport::{FrameSink, WriterSink, ACCESSORY_DEVICE_PATH};

use crate::config::Overrides;

/// Mimic - stream the screen over an accessory transport
#[derive(Parser, Debug)]
#[command(name = "mimic")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Session configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Transport device or file; '-' writes to stdout
    #[arg(short, long, default_value = ACCESSORY_DEVICE_PATH)]
    output: String,

    /// Stop after this many seconds
    #[arg(short, long)]
    duration: Option<u64>,

    /// Capture grant token
    #[arg(long, default_value = "headless")]
    grant: String,

    /// Print engine events as JSON lines on stderr
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    overrides: Overrides,
}

/// Initialize logging.
fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "mimic=info,mimic_engine=debug,mimic_capture=info,mimic_encoder=info,mimic_transport=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn open_sink(output: &str) -> Result<Box<dyn FrameSink>> {
    if output == "-" {
        return Ok(Box::new(WriterSink::new(io::stdout())));
    }
    if output == ACCESSORY_DEVICE_PATH {
        let sink = WriterSink::open_device(output)
            .with_context(|| format!("Accessory not attached at {output}"))?;
        return Ok(Box::new(sink));
    }

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(output)
        .with_context(|| format!("Failed to open {output}"))?;
    Ok(Box::new(WriterSink::new(file)))
}

fn run(cli: Cli) -> Result<Option<EndReason>> {
    let config = config::load(cli.config.as_deref(), &cli.overrides)?;
    let sink = open_sink(&cli.output)?;

    info!(
        width = config.width,
        height = config.height,
        dpi = config.dpi,
        output = %cli.output,
        "Mimic starting"
    );

    let (command_tx, command_rx) = command_channel();
    let (event_tx, event_rx) = event_channel();

    let engine_thread = thread::Builder::new()
        .name("mimic-engine".into())
        .spawn(move || {
            let mut engine = Engine::new(Arc::new(HeadlessPlatform), command_rx, event_tx);
            engine.run();
        })
        .context("Failed to spawn engine thread")?;

    command_tx
        .send(SessionCommand::Start(StartRequest::new(
            CaptureGrant::new(cli.grant),
            sink,
            config,
        )))
        .map_err(|e| anyhow::anyhow!("{e}"))
        .context("Engine not accepting commands")?;

    let deadline = cli
        .duration
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut ended = None;

    loop {
        let timeout = deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::from_millis(500));

        match event_rx.recv_timeout(timeout) {
            Ok(event) => {
                if cli.json {
                    match serde_json::to_string(&event) {
                        Ok(line) => eprintln!("{line}"),
                        Err(e) => warn!("Failed to serialize event: {}", e),
                    }
                }
                match event {
                    SessionEvent::SessionEnded { reason, detail } => {
                        info!(?reason, detail = detail.as_deref().unwrap_or(""), "{}", reason.message());
                        ended = Some(reason);
                        break;
                    }
                    SessionEvent::Error { message } => error!("Engine error: {}", message),
                    _ => {}
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    info!("Duration elapsed, stopping");
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    if command_tx.send(SessionCommand::Shutdown).is_err() {
        warn!("Engine already gone");
    }
    if engine_thread.join().is_err() {
        error!("Engine thread panicked");
    }

    // A stop requested above reports its end after the loop exits.
    for event in event_rx.try_iter() {
        if let Some(reason) = event.end_reason() {
            ended.get_or_insert(reason);
        }
    }

    Ok(ended)
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    let code = match run(cli) {
        Ok(Some(reason)) if reason.is_fault() => 1,
        Ok(_) => 0,
        Err(e) => {
            error!("{:#}", e);
            2
        }
    };
    process::exit(code);
}

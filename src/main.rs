//! MIDI-OBS Bridge
//!
//! Switches OBS Studio program scenes when MIDI notes arrive, e.g. from
//! ProPresenter's MIDI output.

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use midi_obs_bridge::bridge::Bridge;
use midi_obs_bridge::config::{watcher::ConfigWatcher, AppConfig};
use midi_obs_bridge::obs::ObwsTransport;
use midi_obs_bridge::sniffer;
use midi_obs_bridge::source::{MidirSource, NoteSource};

/// Upper bound for in-flight scene changes at shutdown
const SEND_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// MIDI-OBS Bridge - switch OBS scenes from MIDI notes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "BRIDGE_CONFIG", default_value = "config.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Also write JSON logs to daily rolling files in this directory
    #[arg(long, env = "BRIDGE_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// List available MIDI input ports
    #[arg(long)]
    list_ports: bool,

    /// Print incoming notes and their mapped scenes without connecting to OBS
    #[arg(long)]
    sniff: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Parse command line arguments
    let args = Args::parse();

    // Held until exit so buffered file logs are flushed
    let _log_guard = init_logging(&args.log_level, args.log_dir.as_deref())?;

    if args.list_ports {
        sniffer::list_ports_formatted();
        return Ok(());
    }

    if args.check_config || args.sniff {
        let config = AppConfig::load(&args.config).await.unwrap_or_else(|e| exit_config_error(&e));

        if args.check_config {
            for line in config.summary_lines() {
                println!("{}", line);
            }
            println!("\n{}", "Configuration OK".green());
            return Ok(());
        }

        return sniffer::run_sniffer(&config).await;
    }

    info!("Configuration file: {}", args.config);

    // Load configuration with hot-reload watcher
    let (config_watcher, initial_config) = ConfigWatcher::new(args.config.clone())
        .await
        .unwrap_or_else(|e| exit_config_error(&e));

    for line in initial_config.summary_lines() {
        info!("{}", line);
    }

    run_app(&initial_config, config_watcher, shutdown_signal()).await?;

    info!("MIDI-OBS Bridge shutdown complete");
    Ok(())
}

fn exit_config_error(error: &anyhow::Error) -> ! {
    eprintln!("{} {:#}", "Configuration error:".red().bold(), error);
    std::process::exit(1);
}

async fn run_app(
    config: &AppConfig,
    mut config_watcher: ConfigWatcher,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<()> {
    let bridge = Bridge::start(config, Arc::new(ObwsTransport::new()))?;

    let source = MidirSource::new(config.midi.clone());
    source.subscribe(bridge.note_handler());

    let started = source.start(bridge.cancel_token()).await;
    if started.is_ok() {
        info!("✅ Bridge running, press Ctrl+C to exit");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                Some(new_config) = config_watcher.next_config() => bridge.apply_reload(&new_config),
            }
        }
    }

    bridge.shutdown(&source, SEND_DRAIN_TIMEOUT).await;

    started.context("Failed to start MIDI input")
}

fn init_logging(level: &str, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("Invalid log level: {}", level))?;

    let console_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "midi-obs-bridge.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer).json();
            (Some(layer), Some(guard))
        },
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C ({}), shutting down", e);
        return;
    }
    info!("Shutdown signal received");
}

//! trapsink - Main Application Entry Point

use anyhow::{Context, Result};
use clap::{Arg, Command};
use futures_util::stream::StreamExt;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use trapsink::{Config, TrapListener};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("trapsink")
        .version(env!("CARGO_PKG_VERSION"))
        .about("SNMP v2c trap listener with strict configuration validation")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("config.json"),
        )
        .arg(
            Arg::new("daemon")
                .short('d')
                .long("daemon")
                .help("Run as daemon (suppress console output)")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .help("Generate a default configuration file and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("check")
                .long("check")
                .help("Validate the configuration file and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .map(PathBuf::from)
        .context("Missing configuration path")?;
    let daemon_mode = matches.get_flag("daemon");

    if matches.get_flag("generate-config") {
        return generate_default_config(&config_path).await;
    }

    let config = Config::load_from_file(&config_path)
        .await
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;

    if matches.get_flag("check") {
        return check_config(&config, &config_path);
    }

    initialise_logging(&config, daemon_mode)?;

    info!("Starting trapsink v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from: {}", config_path.display());

    config.validate().context("Configuration validation failed")?;

    run_application(config).await
}

/// Generate a default configuration file
async fn generate_default_config(config_path: &PathBuf) -> Result<()> {
    if config_path.exists() {
        anyhow::bail!("Configuration file already exists: {}", config_path.display());
    }

    Config::default()
        .save_to_file(config_path)
        .await
        .context("Failed to save default configuration")?;

    println!("Configuration generated: {}", config_path.display());
    println!("Please edit the community strings and restart the application.");

    Ok(())
}

/// Validate configuration without starting the listener
fn check_config(config: &Config, config_path: &PathBuf) -> Result<()> {
    config.validate().context("Configuration validation failed")?;

    let params = config
        .listener
        .build_params(tracing::Dispatch::none())
        .context("Invalid listener configuration")?;

    println!("Configuration OK: {}", config_path.display());
    println!(
        "Listener: {}://{}:{} SNMP {} ({} community string(s))",
        params.transport,
        config.listener.bind_address,
        params.port,
        params.version,
        config.listener.community_strings.len()
    );

    Ok(())
}

/// Install the global subscriber described by the `logging` section
fn initialise_logging(config: &Config, daemon_mode: bool) -> Result<()> {
    let logging = &config.logging;
    let level = logging
        .tracing_level()
        .with_context(|| format!("Unknown log level: {}", logging.level))?;

    let mut layers = Vec::new();

    if logging.console_output && !daemon_mode {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stdout)
            .with_ansi(true);
        layers.push(console_layer.boxed());
    }

    if let Some(ref log_file_path) = logging.file_output {
        let rotation = logging
            .rotation()
            .with_context(|| format!("Unknown rotation strategy: {}", logging.rotation_strategy))?;
        let log_path = Path::new(log_file_path);
        let log_dir = log_path.parent().unwrap_or(Path::new("."));
        let log_filename = log_path
            .file_name()
            .with_context(|| format!("Log file path has no file name: {}", log_file_path))?;

        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

        let (non_blocking, guard) =
            tracing_appender::non_blocking(RollingFileAppender::new(rotation, log_dir, log_filename));

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_file(true)
            .with_line_number(true)
            .with_target(false);
        layers.push(file_layer.boxed());

        // Dropping the guard stops the background writer
        let _ = LOG_GUARD.set(guard);
    }

    if layers.is_empty() {
        layers.push(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).boxed());
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(LevelFilter::from_level(level))
        .init();

    Ok(())
}

/// Main application runtime
async fn run_application(config: Config) -> Result<()> {
    let logger = tracing::dispatcher::get_default(|dispatch| dispatch.clone());
    let params = config
        .listener
        .build_params(logger)
        .context("Invalid listener configuration")?;

    let (trap_tx, mut trap_rx) = mpsc::unbounded_channel();

    let listener = TrapListener::bind(config.listener.clone(), params, trap_tx)
        .await
        .context("SNMP listener failed to start")?;
    let local_addr = listener.local_addr()?;

    let mut listener_handle = tokio::spawn(async move {
        if let Err(e) = listener.run().await {
            error!("SNMP listener failed: {:#}", e);
        }
    });

    let mut signals = Signals::new([SIGTERM, SIGINT]).context("Failed to register signal handlers")?;

    info!("trapsink started successfully, listening on {}", local_addr);

    let listener_stopped = loop {
        tokio::select! {
            _ = signals.next() => {
                info!("Received shutdown signal, stopping gracefully...");
                break false;
            }
            _ = &mut listener_handle => {
                warn!("SNMP listener stopped unexpectedly");
                break true;
            }
            Some(trap) = trap_rx.recv() => {
                info!(
                    "Received SNMP {} trap from {} ({} byte PDU)",
                    trap.version,
                    trap.source,
                    trap.pdu().len()
                );
                debug!("Trap community: {}", trap.community);
            }
        }
    };

    if !listener_stopped {
        // The listener stops once nothing receives its traps
        drop(trap_rx);
        if tokio::time::timeout(std::time::Duration::from_secs(5), &mut listener_handle)
            .await
            .is_err()
        {
            warn!("SNMP listener did not stop in time, aborting");
            listener_handle.abort();
        }
    }

    info!("trapsink stopped");
    Ok(())
}

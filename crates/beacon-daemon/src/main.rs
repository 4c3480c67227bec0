//! # beacon
//!
//! Beacon server binary: loads settings, initializes logging, and runs the
//! connection server until SIGINT/SIGTERM, then shuts down gracefully.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use beacon_logging::{LogFormat, LogLevel};
use beacon_server::{BeaconServer, ServerConfig, TracingObserver};
use beacon_settings::{BeaconSettings, LoadedSettings, RejectedOverride, ServerSettings};
use clap::Parser;

/// Single-port binary + WebSocket broadcast server.
#[derive(Parser, Debug)]
#[command(name = "beacon", about = "Single-port binary + WebSocket broadcast server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `~/.beacon/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error.
    #[arg(long, value_parser = parse_log_level)]
    log_level: Option<LogLevel>,

    /// Log format: compact or json.
    #[arg(long, value_parser = parse_log_format)]
    log_format: Option<LogFormat>,
}

fn parse_log_level(s: &str) -> Result<LogLevel, String> {
    LogLevel::parse(s).ok_or_else(|| format!("unknown log level `{s}`"))
}

fn parse_log_format(s: &str) -> Result<LogFormat, String> {
    LogFormat::parse(s).ok_or_else(|| format!("unknown log format `{s}`"))
}

impl Cli {
    /// Command-line flags take precedence over file and environment.
    fn apply(&self, settings: &mut BeaconSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = self.log_level {
            settings.logging.level = level;
        }
        if let Some(format) = self.log_format {
            settings.logging.format = format;
        }
    }
}

/// Map loaded settings onto the server's plain configuration.
///
/// A socket buffer size of 0 leaves the kernel default in place.
fn server_config(settings: &ServerSettings) -> ServerConfig {
    ServerConfig {
        host: settings.host.clone(),
        port: settings.port,
        backlog: settings.backlog,
        recv_buffer_size: (settings.recv_buffer_size > 0).then_some(settings.recv_buffer_size),
        send_buffer_size: (settings.send_buffer_size > 0).then_some(settings.send_buffer_size),
        idle_timeout_ms: settings.idle_timeout_ms,
        sweep_interval_ms: settings.sweep_interval_ms,
        max_frame_length: settings.max_frame_length,
        max_handshake_bytes: settings.max_handshake_bytes,
        outbound_queue: settings.outbound_queue,
        shutdown_timeout_ms: settings.shutdown_timeout_ms,
        ..ServerConfig::default()
    }
}

/// Log environment overrides the loader ignored. Runs after the subscriber
/// is installed; the loader itself cannot log.
fn report_rejected(rejected: &[RejectedOverride]) {
    for r in rejected {
        tracing::warn!(
            key = r.key,
            value = %r.value,
            expected = %r.expected,
            "ignoring invalid environment override"
        );
    }
}

/// Resolve once SIGINT (ctrl-c) or SIGTERM arrives.
async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.context("Failed to listen for ctrl-c")?,
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings_path = cli
        .settings
        .clone()
        .unwrap_or_else(beacon_settings::settings_path);
    let LoadedSettings {
        mut settings,
        rejected,
    } = beacon_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    cli.apply(&mut settings);

    beacon_logging::init_subscriber(settings.logging.level, settings.logging.format);
    tracing::debug!(path = %settings_path.display(), "settings loaded");
    report_rejected(&rejected);

    let server = BeaconServer::with_observer(
        server_config(&settings.server),
        Arc::new(TracingObserver),
    );
    let (addr, _accept_loop) = server.listen().await.context("Failed to start server")?;
    tracing::info!(%addr, "beacon ready");

    wait_for_signal().await?;

    tracing::info!("Shutting down...");
    if !server.shutdown().await {
        tracing::warn!("connections did not drain before the shutdown timeout");
    }
    tracing::info!(uptime_secs = server.uptime().as_secs(), "Shutdown complete");
    Ok(())
}

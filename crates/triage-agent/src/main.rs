//! # triage-agent
//!
//! Triage server binary: loads settings, wires the analyzer and identity
//! resolver into the server, and serves until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use triage_analysis::SimulatedAnalyzer;
use triage_server::config::ServerConfig;
use triage_server::identity::TokenIdentityResolver;
use triage_server::server::TriageServer;
use triage_settings::TriageSettings;

/// Triage analysis notification server.
#[derive(Parser, Debug)]
#[command(name = "triage-agent", about = "Triage analysis notification server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (defaults to `~/.triage/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log level filter (overrides settings; `RUST_LOG` still wins).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON.
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn settings_path(&self) -> PathBuf {
        self.settings
            .clone()
            .unwrap_or_else(triage_settings::settings_path)
    }

    /// Apply command-line overrides on top of loaded settings.
    fn apply(&self, settings: &mut TriageSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.log_json {
            settings.logging.json = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args.settings_path();
    let mut settings = triage_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    args.apply(&mut settings);

    triage_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);

    let metrics = triage_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let resolver = TokenIdentityResolver::from_settings(&settings.auth);
    if settings.auth.tokens.is_empty() && settings.auth.trusted_header.is_none() {
        tracing::warn!("no tokens or trusted header configured; every handshake will be rejected");
    }
    let analyzer = SimulatedAnalyzer::from_settings(&settings.analysis);

    let server = TriageServer::new(
        ServerConfig::from_settings(&settings),
        Arc::new(resolver),
        Arc::new(analyzer),
        Some(metrics),
    );

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!(
        stages = settings.analysis.stages,
        stage_delay_ms = settings.analysis.stage_delay_ms,
        "Triage agent listening on http://{addr}"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server
        .shutdown()
        .graceful_shutdown(
            vec![handle],
            Some(Duration::from_millis(settings.server.shutdown_timeout_ms)),
        )
        .await;

    tracing::info!("Shutdown complete");
    Ok(())
}

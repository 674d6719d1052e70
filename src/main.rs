//! Poolwarden - Balance-Triggered Liquidity Provisioning Engine
//!
//! Aggregates depositor contributions at a collection account and, once
//! both token balances cross their thresholds, executes a single
//! safety-checked AMM liquidity-add and attributes the minted LP tokens
//! back to depositors.

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commands::history::HistoryCommand;
use poolwarden_chain::{RegistryApprovalSource, RelayGateway};
use poolwarden_core::{AppConfig, ConfigWatcher, EngineEvent};
use poolwarden_engine::{ControlServer, Orchestrator, SafetyGovernor};
use poolwarden_ledger::Database;
use poolwarden_observability::{init_logging, LogFormat};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn, Level};

/// Default configuration file path
const DEFAULT_CONFIG_PATH: &str = "config/poolwarden.toml";

#[derive(Debug, Parser)]
#[command(name = "poolwarden", about = "Balance-triggered AMM liquidity provisioning engine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the provisioning engine (default)
    Run,
    /// Show the batch audit log and daily usage
    History(HistoryCommand),
}

/// Main application state
struct App {
    config_path: String,
    config: AppConfig,
    db: Database,
    governor: Arc<SafetyGovernor>,
    gateway: Arc<RelayGateway>,
    event_tx: broadcast::Sender<EngineEvent>,
}

impl App {
    /// Create a new application instance
    async fn new() -> Result<Self> {
        let config_path = std::env::var("POOLWARDEN_CONFIG")
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let config = Self::load_config(&config_path)?;

        let db = Database::new(&config.engine.db_path)
            .await
            .context("Failed to open ledger database")?;

        let gateway = Arc::new(RelayGateway::new(
            config.chain.relay_url.clone(),
            config.chain.request_timeout_secs,
            config.chain.dry_run,
        ));

        let approvals = Arc::new(RegistryApprovalSource::new(
            config.chain.approval_registry_url.clone(),
            config.chain.request_timeout_secs,
        ));

        let governor = Arc::new(SafetyGovernor::new(config.safety.clone(), approvals));

        let (event_tx, _) = broadcast::channel(256);

        Ok(Self {
            config_path,
            config,
            db,
            governor,
            gateway,
            event_tx,
        })
    }

    /// Load configuration from the TOML file
    fn load_config(config_path: &str) -> Result<AppConfig> {
        if Path::new(config_path).exists() {
            let content = std::fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config file: {}", config_path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", config_path))
        } else {
            warn!("Config file not found, using defaults (emergency stop engaged)");
            Ok(AppConfig::default())
        }
    }

    /// Start the engine and its supporting tasks
    async fn run(self) -> Result<()> {
        info!("Starting poolwarden...");
        info!(
            collection_account = %self.config.chain.collection_account,
            pair = %self.config.chain.pair,
            dry_run = self.config.chain.dry_run,
            poll_interval_secs = self.config.engine.poll_interval_secs,
            "Engine configured"
        );
        if self.config.safety.emergency_stop {
            warn!("Emergency stop is engaged; no batches will trigger until cleared");
        }

        let (shutdown_tx, _) = broadcast::channel::<()>(1);

        // Config watcher for hot reload of safety limits
        let watcher = ConfigWatcher::new(&self.config_path, self.event_tx.clone());
        let watcher_handle = tokio::spawn(async move {
            if let Err(e) = watcher.run().await {
                error!(error = %e, "Config watcher error");
            }
        });

        // Operator control server
        let control_handle = if self.config.control.enabled {
            let server = ControlServer::new(
                self.config.control.clone(),
                self.governor.clone(),
                self.db.clone(),
            );
            Some(tokio::spawn(async move {
                if let Err(e) = server.run().await {
                    error!(error = %e, "Control server error");
                }
            }))
        } else {
            None
        };

        // The provisioning loop
        let orchestrator = Orchestrator::new(
            &self.config,
            self.db.clone(),
            self.gateway.clone(),
            self.governor.clone(),
            self.event_tx.clone(),
        );
        let orchestrator_shutdown = shutdown_tx.subscribe();
        let mut orchestrator_handle =
            tokio::spawn(async move { orchestrator.run(orchestrator_shutdown).await });

        // Handle Ctrl+C for graceful shutdown
        let shutdown_tx_clone = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            let _ = shutdown_tx_clone.send(());
        });

        // Main event loop: config reloads and engine lifecycle
        let mut event_rx = self.event_tx.subscribe();
        let mut shutdown_rx = shutdown_tx.subscribe();

        let result = loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutting down...");
                    break orchestrator_handle
                        .await
                        .context("Orchestrator task panicked")?;
                }
                // A ledger corruption error halts the loop early; it is
                // fatal and surfaced as the process exit error
                finished = &mut orchestrator_handle => {
                    break finished.context("Orchestrator task panicked")?;
                }
                event = event_rx.recv() => {
                    match event {
                        Ok(EngineEvent::ConfigChanged(e)) => {
                            info!(path = ?e.path, "Reloading configuration");
                            self.reload_config().await;
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Event bus lagged by {} messages", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            error!("Event bus closed");
                            break orchestrator_handle
                                .await
                                .context("Orchestrator task panicked")?;
                        }
                    }
                }
            }
        };

        watcher_handle.abort();
        if let Some(handle) = control_handle {
            handle.abort();
        }

        result.context("Orchestrator halted")?;
        info!("Poolwarden stopped");
        Ok(())
    }

    /// Re-read the config file and apply the new safety limits. An
    /// invalid file leaves the previous limits active.
    async fn reload_config(&self) {
        match Self::load_config(&self.config_path) {
            Ok(new_config) => {
                self.gateway.set_dry_run(new_config.chain.dry_run);
                self.governor.update_config(new_config.safety).await;
            }
            Err(e) => {
                error!(error = %e, "Config reload failed, keeping previous limits");
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let log_format = std::env::var("LOG_FORMAT")
        .map(|f| match f.as_str() {
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Pretty,
        })
        .unwrap_or(LogFormat::Pretty);

    let log_level = std::env::var("LOG_LEVEL")
        .map(|l| match l.to_uppercase().as_str() {
            "DEBUG" => Level::DEBUG,
            "TRACE" => Level::TRACE,
            "WARN" => Level::WARN,
            "ERROR" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    init_logging(log_format, log_level);

    let cli = Cli::parse();
    match cli.command {
        Some(Command::History(cmd)) => cmd.run().await,
        Some(Command::Run) | None => {
            let app = App::new().await?;
            app.run().await
        }
    }
}

//! lxmirror Daemon - Background synchronization service
//!
//! Runs as a systemd user service and:
//! - loads the YAML configuration and `accounts.json`
//! - starts one scheduler per enabled pairing of every authorized account
//! - reloads accounts and reconciles schedulers on SIGHUP
//! - shuts down gracefully on SIGTERM/SIGINT, releasing every watcher
//!   suspension and flushing the activity log
//!
//! The configuration path defaults to `$XDG_CONFIG_HOME/lxmirror/config.yaml`
//! and can be overridden with `LXMIRROR_CONFIG`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use lxmirror_core::config::{Config, LoggingConfig};
use lxmirror_core::domain::Account;
use lxmirror_rclone::RcloneDriver;
use lxmirror_store::{AccountStore, ActivityLog};
use lxmirror_sync::{Orchestrator, SyncError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const CONFIG_ENV: &str = "LXMIRROR_CONFIG";

// ============================================================================
// DaemonService
// ============================================================================

/// Owns the orchestrator and the stores it reads from
struct DaemonService {
    accounts: AccountStore,
    activity: ActivityLog,
    orchestrator: Orchestrator,
    shutdown: CancellationToken,
}

impl DaemonService {
    /// Opens the stores and builds the orchestrator over the rclone driver
    async fn new(config: Config, shutdown: CancellationToken) -> Result<Self> {
        let data_dir = config.storage.data_dir.clone();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        let activity = ActivityLog::open(&data_dir)
            .await
            .context("Failed to open activity log")?;
        let accounts = AccountStore::new(config.storage.accounts_path());

        let driver = RcloneDriver::new(config.engine.clone())
            .with_filters(&config.filters)
            .with_activity(Arc::new(activity.clone()));
        match driver.version().await {
            Ok(version) => info!(%version, "Using rclone"),
            Err(e) => warn!(error = %e, "rclone is not runnable; passes will fail until it is installed"),
        }

        let orchestrator = Orchestrator::new(
            Arc::new(config),
            Arc::new(driver),
            Arc::new(activity.clone()),
        );

        Ok(Self {
            accounts,
            activity,
            orchestrator,
            shutdown,
        })
    }

    /// Starts every authorized account, then serves signals until shutdown
    async fn run(&self) -> Result<()> {
        let accounts = self
            .accounts
            .load()
            .await
            .context("Failed to load accounts")?;
        self.start_accounts(&accounts)?;

        if self.orchestrator.running() == 0 {
            warn!("No enabled pairings. Add one with 'lxmirror pairing add' and send SIGHUP.");
        }

        let mut reload = reload_signal()?;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                Some(()) = reload.recv() => {
                    info!("Received SIGHUP, reloading accounts");
                    if let Err(e) = self.reload().await {
                        error!(error = %format!("{e:#}"), "Reload failed, keeping current schedulers");
                    }
                }
            }
        }

        info!("Stopping schedulers");
        self.orchestrator.shutdown().await;
        if let Err(e) = self.activity.flush().await {
            warn!(error = %e, "Failed to flush activity log");
        }
        Ok(())
    }

    fn start_accounts(&self, accounts: &[Account]) -> Result<()> {
        for account in accounts {
            match self.orchestrator.start(account) {
                Ok(_) if account.is_paused() => {
                    info!(account = %account.display_name(), "Account is paused")
                }
                Ok(started) => {
                    info!(account = %account.display_name(), started, "Account scheduled")
                }
                Err(SyncError::NotAuthorized(_)) => warn!(
                    account = %account.display_name(),
                    auth = %account.auth_state(),
                    "Skipping account that cannot sync. Re-authorize it with rclone config."
                ),
                Err(e) => return Err(e).context("Failed to start account"),
            }
        }
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        let accounts = self
            .accounts
            .load()
            .await
            .context("Failed to load accounts")?;
        self.orchestrator
            .reconcile(&accounts)
            .await
            .context("Failed to reconcile schedulers")?;
        Ok(())
    }
}

// ============================================================================
// Signals
// ============================================================================

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

/// Forwards each SIGHUP as a unit message
fn reload_signal() -> Result<tokio::sync::mpsc::Receiver<()>> {
    let (tx, rx) = tokio::sync::mpsc::channel(1);

    #[cfg(unix)]
    {
        let mut hangup = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
            .context("Failed to install SIGHUP handler")?;
        tokio::spawn(async move {
            while hangup.recv().await.is_some() {
                // A reload is already queued if the channel is full
                let _ = tx.try_send(());
            }
        });
    }
    #[cfg(not(unix))]
    drop(tx);

    Ok(rx)
}

// ============================================================================
// Startup
// ============================================================================

fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path)
}

/// `RUST_LOG` wins over the configured level
fn init_tracing(logging: &LoggingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: &std::path::Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let config = Config::load(path)
        .with_context(|| format!("Failed to parse configuration {}", path.display()))?;
    let errors = config.validate();
    if !errors.is_empty() {
        let listing: Vec<String> = errors.iter().map(ToString::to_string).collect();
        anyhow::bail!(
            "Invalid configuration {}:\n  {}",
            path.display(),
            listing.join("\n  ")
        );
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = config_path();
    let config = load_config(&config_path)?;
    init_tracing(&config.logging);

    info!(config_path = %config_path.display(), "lxmirror daemon starting (lxmirrord)");

    let shutdown_token = CancellationToken::new();
    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let service = DaemonService::new(config, shutdown_token).await?;
    let result = service.run().await;

    match &result {
        Ok(()) => info!("lxmirror daemon shut down gracefully"),
        Err(e) => error!(error = %format!("{e:#}"), "lxmirror daemon exiting with error"),
    }

    result
}

// ============================================================================
// Tests
// ============================================================================

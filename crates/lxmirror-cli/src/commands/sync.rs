//! Sync command - Run one foreground pass per mirror pairing
//!
//! Provides the `lxmirror sync` CLI command which:
//! 1. Loads configuration and the selected account
//! 2. Creates the rclone driver and opens the activity log
//! 3. Runs one pass per enabled mirror pairing, with the same lock recovery
//!    and suspension handling as the daemon
//! 4. Prints each pass outcome and fails if any pass failed
//!
//! Ctrl+C cancels the pass in flight and stops the rest.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use lxmirror_core::domain::{Account, Pairing, PairingMode};
use lxmirror_rclone::RcloneDriver;
use lxmirror_store::ActivityLog;
use lxmirror_sync::{PassOutcome, SchedulerContext, SyncScheduler};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{account_store, load_accounts, load_config, require_account};
use crate::output::{get_formatter, OutputFormat};

#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Account id, display name or remote name
    #[arg(long)]
    pub account: String,

    /// Only sync this pairing (id, id prefix or local folder)
    #[arg(long)]
    pub pairing: Option<String>,
}

impl SyncCommand {
    pub async fn execute(&self, config_path: &Path, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);
        let config = load_config(config_path)?;
        let accounts = load_accounts(&account_store(&config)).await?;
        let account = require_account(&accounts, &self.account)?;

        if !account.can_sync() {
            anyhow::bail!(
                "Account '{}' is {}; re-authorize the remote with 'rclone config reconnect {}:'",
                account.display_name(),
                account.auth_state(),
                account.remote_name()
            );
        }
        ensure_not_paused(account)?;

        let pairings = self.selected_pairings(account)?;
        if pairings.is_empty() {
            formatter.info("No enabled mirror pairings to sync.");
            return Ok(());
        }

        tokio::fs::create_dir_all(&config.storage.data_dir)
            .await
            .context("Failed to create data directory")?;
        let activity = ActivityLog::open(&config.storage.data_dir)
            .await
            .context("Failed to open activity log")?;
        let driver = RcloneDriver::new(config.engine.clone()).with_filters(&config.filters);
        let ctx = SchedulerContext::new(
            Arc::new(config),
            Arc::new(driver),
            Arc::new(activity.clone()),
        )
        .without_watcher();

        let cancel = CancellationToken::new();
        let ctrl_c = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                ctrl_c.cancel();
            }
        });

        let mut results = Vec::new();
        for pairing in pairings {
            if cancel.is_cancelled() {
                break;
            }
            info!(pairing = %pairing.id(), local = %pairing.local_root().display(), "Syncing");
            if !format.is_json() {
                formatter.info(&format!(
                    "Syncing {} <-> {}",
                    pairing.local_root().display(),
                    pairing.remote_root()
                ));
            }
            let outcome = SyncScheduler::run_once(account.id(), pairing, &ctx, &cancel).await;
            if !format.is_json() {
                report(formatter.as_ref(), &outcome);
            }
            results.push((pairing, outcome));
        }

        if let Err(e) = activity.flush().await {
            formatter.warn(&format!("Failed to save activity log: {e}"));
        }

        if format.is_json() {
            let json: Vec<serde_json::Value> = results
                .iter()
                .map(|(p, outcome)| outcome_json(p, outcome))
                .collect();
            formatter.print_json(&serde_json::Value::Array(json));
        }

        let failed = results.iter().filter(|(_, o)| !o.is_success()).count();
        if failed > 0 {
            anyhow::bail!("{failed} of {} pass(es) did not succeed", results.len());
        }
        Ok(())
    }

    fn selected_pairings<'a>(&self, account: &'a Account) -> Result<Vec<&'a Pairing>> {
        match &self.pairing {
            Some(key) => {
                let id = super::pairing::resolve_pairing(account, key)?;
                let pairing = account
                    .pairing(id)
                    .with_context(|| format!("No pairing matches '{key}'"))?;
                if pairing.mode() != PairingMode::Mirror {
                    anyhow::bail!(
                        "{} is a stream pairing; it is served by the daemon's mount",
                        pairing.local_root().display()
                    );
                }
                Ok(vec![pairing])
            }
            None => Ok(account
                .enabled_pairings()
                .filter(|p| p.mode() == PairingMode::Mirror)
                .collect()),
        }
    }
}

fn ensure_not_paused(account: &Account) -> Result<()> {
    if account.is_paused() {
        anyhow::bail!(
            "Account '{}' is paused; resume it with 'lxmirror account resume {}'",
            account.display_name(),
            account.display_name()
        );
    }
    Ok(())
}

fn report(formatter: &dyn crate::output::OutputFormatter, outcome: &PassOutcome) {
    match outcome {
        PassOutcome::Success { actions } => {
            formatter.success(&format!("Done ({actions} file action(s))"))
        }
        PassOutcome::Partial(detail) => {
            formatter.warn(&format!("Partially synced, will retry: {detail}"))
        }
        PassOutcome::Fatal(detail) => formatter.error(&format!("Sync failed: {detail}")),
        PassOutcome::TimedOut => formatter.error("Sync timed out"),
        PassOutcome::Cancelled => formatter.warn("Cancelled"),
    }
}

fn outcome_json(pairing: &Pairing, outcome: &PassOutcome) -> serde_json::Value {
    let (status, detail, actions) = match outcome {
        PassOutcome::Success { actions } => ("success", None, Some(*actions)),
        PassOutcome::Partial(d) => ("partial", Some(d.as_str()), None),
        PassOutcome::Fatal(d) => ("fatal", Some(d.as_str()), None),
        PassOutcome::TimedOut => ("timed_out", None, None),
        PassOutcome::Cancelled => ("cancelled", None, None),
    };
    serde_json::json!({
        "pairing_id": pairing.id(),
        "local_root": pairing.local_root(),
        "remote_root": pairing.remote_root(),
        "status": status,
        "detail": detail,
        "actions": actions,
    })
}

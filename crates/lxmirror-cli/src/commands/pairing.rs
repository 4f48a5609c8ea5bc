//! Pairing command - Associate local folders with remote locations
//!
//! Remotes may be given fully qualified (`gdrive:Work/Docs`) or relative to
//! the account's remote (`Work/Docs`). Stream pairings without `--local`
//! mount under `engine.mount_base_dir`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;
use lxmirror_core::config::Config;
use lxmirror_core::domain::{Account, Pairing, PairingId, PairingMode};
use lxmirror_rclone::default_mount_point;

use super::{
    account_store, load_accounts, load_config, require_account, require_account_mut, RELOAD_HINT,
};
use crate::output::{get_formatter, table, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum PairingCommand {
    /// List pairings, optionally for one account
    List {
        /// Account id, display name or remote name
        account: Option<String>,
    },
    /// Pair a local folder with a remote location
    Add {
        /// Account id, display name or remote name
        account: String,
        /// Remote location, `remote:path` or a path under the account's remote
        #[arg(long)]
        remote: String,
        /// Local folder (required for mirror pairings)
        #[arg(long)]
        local: Option<PathBuf>,
        /// mirror or stream
        #[arg(long, default_value = "mirror")]
        mode: PairingMode,
    },
    /// Remove a pairing (local files are left untouched)
    Remove {
        account: String,
        /// Pairing id (or unique prefix) or local folder
        pairing: String,
    },
    /// Resume syncing a pairing
    Enable { account: String, pairing: String },
    /// Pause a pairing without removing it
    Disable { account: String, pairing: String },
}

impl PairingCommand {
    pub async fn execute(&self, config_path: &Path, format: OutputFormat) -> Result<()> {
        let config = load_config(config_path)?;
        let store = account_store(&config);
        let mut accounts = load_accounts(&store).await?;
        let formatter = get_formatter(format);

        match self {
            PairingCommand::List { account } => {
                let selected: Vec<&Account> = match account {
                    Some(key) => vec![require_account(&accounts, key)?],
                    None => accounts.iter().collect(),
                };
                if format.is_json() {
                    let value: Vec<serde_json::Value> = selected
                        .iter()
                        .flat_map(|a| {
                            a.pairings().iter().map(|p| {
                                serde_json::json!({
                                    "account": a.display_name(),
                                    "account_id": a.id(),
                                    "pairing": p,
                                })
                            })
                        })
                        .collect();
                    formatter.print_json(&serde_json::Value::Array(value));
                    return Ok(());
                }

                let mut rows = vec![vec![
                    "ACCOUNT".to_string(),
                    "MODE".to_string(),
                    "LOCAL".to_string(),
                    "REMOTE".to_string(),
                    "STATE".to_string(),
                    "ID".to_string(),
                ]];
                for a in &selected {
                    for p in a.pairings() {
                        rows.push(vec![
                            a.display_name().to_string(),
                            p.mode().to_string(),
                            p.local_root().display().to_string(),
                            p.remote_root().to_string(),
                            if p.is_enabled() { "enabled" } else { "disabled" }.to_string(),
                            p.id().to_string(),
                        ]);
                    }
                }
                if rows.len() == 1 {
                    formatter.info("No pairings.");
                } else {
                    for line in table(&rows) {
                        println!("{line}");
                    }
                }
            }
            PairingCommand::Add {
                account,
                remote,
                local,
                mode,
            } => {
                let target = require_account_mut(&mut accounts, account)?;
                let pairing = build_pairing(&config, target, remote, local.as_deref(), *mode)?;
                if pairing.mode() == PairingMode::Mirror {
                    tokio::fs::create_dir_all(pairing.local_root())
                        .await
                        .with_context(|| {
                            format!("Failed to create {}", pairing.local_root().display())
                        })?;
                }
                target.add_pairing(pairing.clone())?;
                store.save(&accounts).await?;

                if format.is_json() {
                    formatter.print_json(&serde_json::to_value(&pairing)?);
                } else {
                    formatter.success(&format!(
                        "Paired {} <-> {} ({})",
                        pairing.local_root().display(),
                        pairing.remote_root(),
                        pairing.mode()
                    ));
                    formatter.info(RELOAD_HINT);
                }
            }
            PairingCommand::Remove { account, pairing } => {
                let target = require_account_mut(&mut accounts, account)?;
                let id = resolve_pairing(target, pairing)?;
                let removed = target.remove_pairing(id)?;
                store.save(&accounts).await?;
                formatter.success(&format!(
                    "Removed pairing {} (local files kept)",
                    removed.local_root().display()
                ));
                formatter.info(RELOAD_HINT);
            }
            PairingCommand::Enable { account, pairing }
            | PairingCommand::Disable { account, pairing } => {
                let enable = matches!(self, PairingCommand::Enable { .. });
                let target = require_account_mut(&mut accounts, account)?;
                let id = resolve_pairing(target, pairing)?;
                let local = {
                    let p = target
                        .pairing_mut(id)
                        .with_context(|| format!("No pairing matches '{pairing}'"))?;
                    p.set_enabled(enable);
                    p.local_root().display().to_string()
                };
                store.save(&accounts).await?;
                formatter.success(&format!(
                    "{} {local}",
                    if enable { "Enabled" } else { "Disabled" }
                ));
                formatter.info(RELOAD_HINT);
            }
        }
        Ok(())
    }
}

/// Builds a validated pairing from user input
pub(crate) fn build_pairing(
    config: &Config,
    account: &Account,
    remote: &str,
    local: Option<&Path>,
    mode: PairingMode,
) -> Result<Pairing> {
    let remote = qualify_remote(account, remote);
    let local = match (local, mode) {
        (Some(path), _) => absolutize(path)?,
        (None, PairingMode::Stream) => {
            default_mount_point(&config.engine, account.display_name())
        }
        (None, PairingMode::Mirror) => anyhow::bail!("--local is required for mirror pairings"),
    };
    Ok(Pairing::new(mode, local, remote)?)
}

/// Prefixes the account's remote unless `remote` already names one
pub(crate) fn qualify_remote(account: &Account, remote: &str) -> String {
    match remote.split_once(':') {
        Some((name, _)) if !name.is_empty() => remote.to_string(),
        _ => format!(
            "{}:{}",
            account.remote_name(),
            remote.trim_start_matches(':').trim_start_matches('/')
        ),
    }
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()
            .context("Failed to resolve current directory")?
            .join(path))
    }
}

/// Finds a pairing by full id, id prefix (8+ characters) or local folder
pub(crate) fn resolve_pairing(account: &Account, key: &str) -> Result<PairingId> {
    let by_path = Path::new(key);
    let matches: Vec<PairingId> = account
        .pairings()
        .iter()
        .filter(|p| {
            let id = p.id().to_string();
            id == key || (key.len() >= 8 && id.starts_with(key)) || p.local_root() == by_path
        })
        .map(Pairing::id)
        .collect();
    match matches.as_slice() {
        [id] => Ok(*id),
        [] => anyhow::bail!("No pairing of '{}' matches '{key}'", account.display_name()),
        _ => anyhow::bail!("'{key}' matches several pairings; use the full id"),
    }
}

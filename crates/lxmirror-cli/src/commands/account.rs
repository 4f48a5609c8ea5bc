//! Account command - Manage rclone remotes known to lxmirror
//!
//! An account is an rclone remote that has already been configured with
//! `rclone config`. lxmirror never handles credentials itself; it only records
//! whether the remote is usable.

use std::path::Path;

use anyhow::{Context, Result};
use clap::{Subcommand, ValueEnum};
use lxmirror_core::domain::{Account, AuthState};
use lxmirror_store::{find_account, ActivityLog};
use tracing::info;

use super::{account_store, load_accounts, load_config, require_account_mut, RELOAD_HINT};
use crate::output::{get_formatter, table, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum AccountCommand {
    /// List configured accounts
    List,
    /// Register an rclone remote as an account
    Add {
        /// Display name
        name: String,
        /// rclone remote name (defaults to the display name)
        #[arg(long)]
        remote: Option<String>,
    },
    /// Remove an account with its pairings and activity history
    Remove {
        /// Account id, display name or remote name
        account: String,
    },
    /// Record the authorization state of an account's remote
    Auth {
        /// Account id, display name or remote name
        account: String,
        #[arg(value_enum)]
        state: AuthArg,
    },
    /// Stop syncing an account without changing its pairings
    Pause {
        /// Account id, display name or remote name
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        account: Option<String>,
        /// Pause every account
        #[arg(long)]
        all: bool,
    },
    /// Resume a paused account
    Resume {
        /// Account id, display name or remote name
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        account: Option<String>,
        /// Resume every account
        #[arg(long)]
        all: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum AuthArg {
    Authorized,
    Expired,
    Revoked,
}

impl From<AuthArg> for AuthState {
    fn from(arg: AuthArg) -> Self {
        match arg {
            AuthArg::Authorized => AuthState::Authorized,
            AuthArg::Expired => AuthState::Expired,
            AuthArg::Revoked => AuthState::Revoked,
        }
    }
}

impl AccountCommand {
    pub async fn execute(&self, config_path: &Path, format: OutputFormat) -> Result<()> {
        let config = load_config(config_path)?;
        let store = account_store(&config);
        let mut accounts = load_accounts(&store).await?;
        let formatter = get_formatter(format);

        match self {
            AccountCommand::List => {
                if format.is_json() {
                    formatter.print_json(&serde_json::to_value(&accounts)?);
                    return Ok(());
                }
                if accounts.is_empty() {
                    formatter.info("No accounts. Add one with 'lxmirror account add <name>'.");
                    return Ok(());
                }
                let mut rows = vec![vec![
                    "NAME".to_string(),
                    "REMOTE".to_string(),
                    "AUTH".to_string(),
                    "STATE".to_string(),
                    "PAIRINGS".to_string(),
                    "ID".to_string(),
                ]];
                rows.extend(accounts.iter().map(|a| {
                    vec![
                        a.display_name().to_string(),
                        a.remote_name().to_string(),
                        a.auth_state().to_string(),
                        if a.is_paused() { "paused" } else { "active" }.to_string(),
                        a.pairings().len().to_string(),
                        a.id().to_string(),
                    ]
                }));
                for line in table(&rows) {
                    println!("{line}");
                }
            }
            AccountCommand::Add { name, remote } => {
                let account = add_account(&mut accounts, name, remote.as_deref())?;
                store.save(&accounts).await?;
                info!(account = %account.id(), "Account added");
                if format.is_json() {
                    formatter.print_json(&serde_json::to_value(&account)?);
                } else {
                    formatter.success(&format!(
                        "Added account '{}' (remote '{}')",
                        account.display_name(),
                        account.remote_name()
                    ));
                }
            }
            AccountCommand::Remove { account } => {
                let removed = remove_account(&mut accounts, account)?;
                store.save(&accounts).await?;

                let activity = ActivityLog::open(&config.storage.data_dir)
                    .await
                    .context("Failed to open activity log")?;
                activity.remove_account(removed.id());
                activity.flush().await?;

                formatter.success(&format!(
                    "Removed account '{}' and {} pairing(s)",
                    removed.display_name(),
                    removed.pairings().len()
                ));
                formatter.info(RELOAD_HINT);
            }
            AccountCommand::Auth { account, state } => {
                let target = require_account_mut(&mut accounts, account)?;
                target.set_auth_state((*state).into());
                let summary = format!("{} is now {}", target.display_name(), target.auth_state());
                store.save(&accounts).await?;
                formatter.success(&summary);
                formatter.info(RELOAD_HINT);
            }
            AccountCommand::Pause { account, all } => {
                let changed = set_paused(&mut accounts, account.as_deref(), *all, true)?;
                store.save(&accounts).await?;
                info!(count = changed.len(), "Accounts paused");
                report_paused(formatter.as_ref(), format, &changed, "Paused");
            }
            AccountCommand::Resume { account, all } => {
                let changed = set_paused(&mut accounts, account.as_deref(), *all, false)?;
                store.save(&accounts).await?;
                info!(count = changed.len(), "Accounts resumed");
                report_paused(formatter.as_ref(), format, &changed, "Resumed");
            }
        }
        Ok(())
    }
}

fn report_paused(
    formatter: &dyn crate::output::OutputFormatter,
    format: OutputFormat,
    changed: &[String],
    verb: &str,
) {
    if format.is_json() {
        formatter.print_json(&serde_json::json!({
            "action": verb.to_lowercase(),
            "accounts": changed,
        }));
        return;
    }
    if changed.is_empty() {
        formatter.info("Nothing to change.");
        return;
    }
    for name in changed {
        formatter.success(&format!("{verb} '{name}'"));
    }
    formatter.info(RELOAD_HINT);
}

/// Sets the paused flag of one account, or of all with `all`
///
/// Returns the display names of the accounts whose flag actually changed.
/// Pairings keep their own enabled flags, so resuming restores exactly the
/// set that ran before the pause.
pub(crate) fn set_paused(
    accounts: &mut [Account],
    key: Option<&str>,
    all: bool,
    paused: bool,
) -> Result<Vec<String>> {
    let targets: Vec<&mut Account> = match (key, all) {
        (_, true) => accounts.iter_mut().collect(),
        (Some(key), false) => vec![require_account_mut(accounts, key)?],
        (None, false) => anyhow::bail!("Name an account or pass --all"),
    };
    let mut changed = Vec::new();
    for account in targets {
        if account.is_paused() != paused {
            account.set_paused(paused);
            changed.push(account.display_name().to_string());
        }
    }
    Ok(changed)
}

/// Appends a new account; display and remote names must be unused
pub(crate) fn add_account(
    accounts: &mut Vec<Account>,
    name: &str,
    remote: Option<&str>,
) -> Result<Account> {
    let remote = remote.unwrap_or(name).trim_end_matches(':');
    if name.trim().is_empty() || remote.is_empty() {
        anyhow::bail!("Account name and remote must not be empty");
    }
    if find_account(accounts, name).is_some() || find_account(accounts, remote).is_some() {
        anyhow::bail!("An account named '{name}' or using remote '{remote}' already exists");
    }
    let account = Account::new(name, remote);
    accounts.push(account.clone());
    Ok(account)
}

pub(crate) fn remove_account(accounts: &mut Vec<Account>, key: &str) -> Result<Account> {
    let index = accounts
        .iter()
        .position(|a| a.id().to_string() == key || a.display_name() == key || a.remote_name() == key)
        .with_context(|| format!("No account matches '{key}'"))?;
    Ok(accounts.remove(index))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_account_defaults_remote_to_name() {
        let mut accounts = Vec::new();
        let account = add_account(&mut accounts, "gdrive", None).unwrap();
        assert_eq!(account.remote_name(), "gdrive");
        assert_eq!(accounts.len(), 1);
    }

    #[test]
    fn test_add_account_strips_colon() {
        let mut accounts = Vec::new();
        let account = add_account(&mut accounts, "Work", Some("work-drive:")).unwrap();
        assert_eq!(account.remote_name(), "work-drive");
    }

    #[test]
    fn test_add_account_rejects_duplicates() {
        let mut accounts = Vec::new();
        add_account(&mut accounts, "Work", Some("gdrive")).unwrap();
        assert!(add_account(&mut accounts, "Work", Some("other")).is_err());
        assert!(add_account(&mut accounts, "Home", Some("gdrive")).is_err());
    }

    #[test]
    fn test_remove_account_by_remote() {
        let mut accounts = Vec::new();
        add_account(&mut accounts, "Work", Some("gdrive")).unwrap();
        add_account(&mut accounts, "Home", Some("dropbox")).unwrap();

        let removed = remove_account(&mut accounts, "dropbox").unwrap();
        assert_eq!(removed.display_name(), "Home");
        assert_eq!(accounts.len(), 1);
        assert!(remove_account(&mut accounts, "dropbox").is_err());
    }

    #[test]
    fn test_pause_and_resume_one_account() {
        let mut accounts = Vec::new();
        add_account(&mut accounts, "Work", Some("gdrive")).unwrap();
        add_account(&mut accounts, "Home", Some("dropbox")).unwrap();

        let changed = set_paused(&mut accounts, Some("gdrive"), false, true).unwrap();
        assert_eq!(changed, ["Work"]);
        assert!(accounts[0].is_paused());
        assert!(!accounts[1].is_paused());

        // Pausing again changes nothing
        assert!(set_paused(&mut accounts, Some("Work"), false, true)
            .unwrap()
            .is_empty());

        let changed = set_paused(&mut accounts, Some("Work"), false, false).unwrap();
        assert_eq!(changed, ["Work"]);
        assert!(!accounts[0].is_paused());
    }

    #[test]
    fn test_pause_all_reports_only_changed() {
        let mut accounts = Vec::new();
        add_account(&mut accounts, "Work", Some("gdrive")).unwrap();
        add_account(&mut accounts, "Home", Some("dropbox")).unwrap();
        accounts[1].set_paused(true);

        let changed = set_paused(&mut accounts, None, true, true).unwrap();
        assert_eq!(changed, ["Work"]);
        assert!(accounts.iter().all(Account::is_paused));

        let changed = set_paused(&mut accounts, None, true, false).unwrap();
        assert_eq!(changed, ["Work", "Home"]);
    }

    #[test]
    fn test_pause_requires_target() {
        let mut accounts = Vec::new();
        add_account(&mut accounts, "Work", Some("gdrive")).unwrap();
        assert!(set_paused(&mut accounts, None, false, true).is_err());
        assert!(set_paused(&mut accounts, Some("nope"), false, true).is_err());
    }

    #[tokio::test]
    async fn test_pause_survives_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = lxmirror_store::AccountStore::new(dir.path().join("accounts.json"));
        let mut accounts = Vec::new();
        add_account(&mut accounts, "Work", Some("gdrive")).unwrap();
        set_paused(&mut accounts, Some("Work"), false, true).unwrap();
        store.save(&accounts).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert!(loaded[0].is_paused());
    }

    #[test]
    fn test_auth_arg_maps_to_state() {
        assert_eq!(AuthState::from(AuthArg::Expired), AuthState::Expired);
        assert!(AuthState::from(AuthArg::Authorized).can_sync());
    }
}

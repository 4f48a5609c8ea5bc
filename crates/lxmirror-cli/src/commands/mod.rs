//! CLI subcommands

pub mod account;
pub mod activity;
pub mod completions;
pub mod config;
pub mod pairing;
pub mod stats;
pub mod sync;

use std::path::Path;

use anyhow::{Context, Result};
use lxmirror_core::config::Config;
use lxmirror_core::domain::Account;
use lxmirror_store::{find_account, find_account_mut, AccountStore};

/// Printed after any change the daemon only sees on reload
pub(crate) const RELOAD_HINT: &str =
    "Run 'systemctl --user reload lxmirrord' (or send SIGHUP) to apply to a running daemon";

/// Loads the configuration, falling back to defaults when the file is absent
pub(crate) fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    Config::load(path).with_context(|| format!("Failed to parse configuration {}", path.display()))
}

pub(crate) fn account_store(config: &Config) -> AccountStore {
    AccountStore::new(config.storage.accounts_path())
}

pub(crate) async fn load_accounts(store: &AccountStore) -> Result<Vec<Account>> {
    store
        .load()
        .await
        .with_context(|| format!("Failed to load accounts from {}", store.path().display()))
}

pub(crate) fn require_account<'a>(accounts: &'a [Account], key: &str) -> Result<&'a Account> {
    find_account(accounts, key).with_context(|| format!("No account matches '{key}'"))
}

pub(crate) fn require_account_mut<'a>(
    accounts: &'a mut [Account],
    key: &str,
) -> Result<&'a mut Account> {
    find_account_mut(accounts, key).with_context(|| format!("No account matches '{key}'"))
}

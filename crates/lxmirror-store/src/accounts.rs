//! Account store
//!
//! Accounts and their pairings live in a single pretty-printed JSON array,
//! `accounts.json`, rewritten atomically on every save.

use std::path::{Path, PathBuf};

use lxmirror_core::domain::Account;
use tracing::debug;

use crate::persist::write_atomic;
use crate::StoreError;

/// JSON file holding every configured account
#[derive(Debug, Clone)]
pub struct AccountStore {
    path: PathBuf,
}

impl AccountStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads all accounts; a missing file means no accounts yet
    pub async fn load(&self) -> Result<Vec<Account>, StoreError> {
        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No accounts file yet");
                return Ok(Vec::new());
            }
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };
        serde_json::from_slice(&content).map_err(|e| StoreError::serialization(&self.path, e))
    }

    /// Replaces the stored account list
    pub async fn save(&self, accounts: &[Account]) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(accounts)
            .map_err(|e| StoreError::serialization(&self.path, e))?;
        write_atomic(&self.path, &data).await?;
        debug!(path = %self.path.display(), count = accounts.len(), "Saved accounts");
        Ok(())
    }
}

/// Finds an account by id, display name or rclone remote name
pub fn find_account<'a>(accounts: &'a [Account], key: &str) -> Option<&'a Account> {
    accounts.iter().find(|a| matches_key(a, key))
}

/// Mutable variant of [`find_account`]
pub fn find_account_mut<'a>(accounts: &'a mut [Account], key: &str) -> Option<&'a mut Account> {
    accounts.iter_mut().find(|a| matches_key(a, key))
}

fn matches_key(account: &Account, key: &str) -> bool {
    account.id().to_string() == key || account.display_name() == key || account.remote_name() == key
}

//! Activity command - Show the per-account activity log

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use lxmirror_core::domain::{Account, ActivityKind, ActivityRecord, Outcome};
use lxmirror_store::ActivityLog;

use super::{account_store, load_accounts, load_config, require_account};
use crate::output::{get_formatter, table, OutputFormat};

#[derive(Debug, Args)]
pub struct ActivityCommand {
    /// Only show records of this account (id, display name or remote name)
    #[arg(long)]
    account: Option<String>,

    /// Maximum number of records to show, newest first
    #[arg(long, default_value_t = 50)]
    limit: usize,

    /// Only show records of this kind (upload, download, delete, rename, sync, ...)
    #[arg(long, value_parser = parse_kind)]
    kind: Option<ActivityKind>,
}

impl ActivityCommand {
    pub async fn execute(&self, config_path: &Path, format: OutputFormat) -> Result<()> {
        let config = load_config(config_path)?;
        let accounts = load_accounts(&account_store(&config)).await?;
        let account_id = match &self.account {
            Some(key) => Some(require_account(&accounts, key)?.id()),
            None => None,
        };

        let log = ActivityLog::open(&config.storage.data_dir)
            .await
            .context("Failed to open activity log")?;
        let records = select(log.query(account_id), self.kind, self.limit);

        let formatter = get_formatter(format);
        if format.is_json() {
            formatter.print_json(&serde_json::to_value(&records)?);
            return Ok(());
        }
        if records.is_empty() {
            formatter.info("No activity recorded.");
            return Ok(());
        }

        let mut rows = vec![vec![
            "TIME".to_string(),
            "ACCOUNT".to_string(),
            "KIND".to_string(),
            "PATH".to_string(),
            "RESULT".to_string(),
        ]];
        rows.extend(records.iter().map(|r| row(r, &accounts)));
        for line in table(&rows) {
            println!("{line}");
        }
        Ok(())
    }
}

fn parse_kind(s: &str) -> Result<ActivityKind, String> {
    serde_json::from_value(serde_json::Value::String(s.to_lowercase()))
        .map_err(|_| format!("unknown activity kind '{s}'"))
}

fn select(
    records: Vec<ActivityRecord>,
    kind: Option<ActivityKind>,
    limit: usize,
) -> Vec<ActivityRecord> {
    records
        .into_iter()
        .filter(|r| kind.map_or(true, |k| r.kind() == k))
        .take(limit)
        .collect()
}

fn row(record: &ActivityRecord, accounts: &[Account]) -> Vec<String> {
    let account = accounts
        .iter()
        .find(|a| a.id() == record.account_id())
        .map(|a| a.display_name().to_string())
        .unwrap_or_else(|| record.account_id().to_string());
    let path = match record.prior_path() {
        Some(prior) => format!("{prior} -> {}", record.path()),
        None => record.path().to_string(),
    };
    let result = match record.outcome() {
        Outcome::Success => "ok".to_string(),
        Outcome::Failure { message } => format!("failed: {message}"),
    };
    vec![
        record
            .timestamp()
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        account,
        record.kind().to_string(),
        path,
        result,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use lxmirror_core::domain::AccountId;

    #[test]
    fn test_parse_kind() {
        assert_eq!(parse_kind("rename").unwrap(), ActivityKind::Rename);
        assert_eq!(parse_kind("Lock_Recovered").unwrap(), ActivityKind::LockRecovered);
        assert!(parse_kind("teleport").is_err());
    }

    #[test]
    fn test_select_filters_then_limits() {
        let id = AccountId::new();
        let records = vec![
            ActivityRecord::new(id, ActivityKind::Upload, Outcome::Success).with_path("a"),
            ActivityRecord::new(id, ActivityKind::Sync, Outcome::Success),
            ActivityRecord::new(id, ActivityKind::Upload, Outcome::Success).with_path("b"),
            ActivityRecord::new(id, ActivityKind::Upload, Outcome::Success).with_path("c"),
        ];
        let picked = select(records, Some(ActivityKind::Upload), 2);
        let paths: Vec<&str> = picked.iter().map(ActivityRecord::path).collect();
        assert_eq!(paths, ["a", "b"]);
    }

    #[test]
    fn test_row_shows_rename_and_failure() {
        let account = Account::new("Work", "gdrive");
        let record = ActivityRecord::new(
            account.id(),
            ActivityKind::Rename,
            Outcome::failure("remote is gone"),
        )
        .with_prior_path("old.txt")
        .with_path("new.txt");

        let cells = row(&record, std::slice::from_ref(&account));
        assert_eq!(cells[1], "Work");
        assert_eq!(cells[2], "rename");
        assert_eq!(cells[3], "old.txt -> new.txt");
        assert_eq!(cells[4], "failed: remote is gone");
    }
}

//! Stats command - Show live transfer progress of a running rclone
//!
//! Queries `core/stats` on rclone's remote control. Mounts started by the
//! daemon answer when `engine.extra_args` carries `--rc`; so does a
//! standalone `rclone rcd`.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use lxmirror_rclone::stats::{human_bytes, human_eta};
use lxmirror_rclone::{RcloneDriver, TransferStats};

use super::load_config;
use crate::output::{get_formatter, table, OutputFormat, OutputFormatter};

#[derive(Debug, Args)]
pub struct StatsCommand {
    /// Remote control address (default: engine.rc_url)
    #[arg(long)]
    url: Option<String>,
}

impl StatsCommand {
    pub async fn execute(&self, config_path: &Path, format: OutputFormat) -> Result<()> {
        let config = load_config(config_path)?;
        let url = self.url.as_deref().unwrap_or(&config.engine.rc_url);
        let driver = RcloneDriver::new(config.engine.clone());
        let stats = driver
            .transfer_stats(url)
            .await
            .with_context(|| format!("No rclone remote control answered at {url}"))?;

        let formatter = get_formatter(format);
        if format.is_json() {
            formatter.print_json(&serde_json::to_value(&stats)?);
            return Ok(());
        }
        print_stats(formatter.as_ref(), &stats);
        Ok(())
    }
}

fn print_stats(formatter: &dyn OutputFormatter, stats: &TransferStats) {
    for line in summary(stats) {
        formatter.info(&line);
    }
    if stats.is_idle() {
        formatter.success("No transfers in progress");
        return;
    }
    let mut rows = vec![vec![
        "FILE".to_string(),
        "DONE".to_string(),
        "SIZE".to_string(),
        "SPEED".to_string(),
        "ETA".to_string(),
    ]];
    rows.extend(stats.transferring.iter().map(|t| {
        vec![
            t.name.clone(),
            format!("{}%", t.percentage),
            human_bytes(t.size as f64),
            format!("{}/s", human_bytes(t.speed)),
            t.eta.map_or_else(|| "-".to_string(), human_eta),
        ]
    }));
    formatter.info("");
    for line in table(&rows) {
        println!("{line}");
    }
}

fn summary(stats: &TransferStats) -> Vec<String> {
    let mut lines = vec![
        format!(
            "Transferred: {} / {} ({}%), {}/s, ETA {}",
            human_bytes(stats.bytes as f64),
            human_bytes(stats.total_bytes as f64),
            stats.percent_done(),
            human_bytes(stats.speed),
            stats.eta.map_or_else(|| "-".to_string(), human_eta),
        ),
        format!(
            "Files:       {} / {} transferred, {} checked, {} deleted, {} renamed",
            stats.transfers, stats.total_transfers, stats.checks, stats.deletes, stats.renames
        ),
    ];
    if stats.errors > 0 {
        lines.push(format!(
            "Errors:      {}{}",
            stats.errors,
            if stats.fatal_error { " (fatal)" } else { "" }
        ));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use lxmirror_rclone::TransferInfo;

    #[test]
    fn test_summary_lines() {
        let stats = TransferStats {
            bytes: 1_048_576,
            total_bytes: 4_194_304,
            transfers: 1,
            total_transfers: 4,
            speed: 524_288.0,
            eta: Some(6),
            transferring: vec![TransferInfo {
                name: "a.bin".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let lines = summary(&stats);
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "Transferred: 1.00 MiB / 4.00 MiB (25%), 512.00 KiB/s, ETA 00:00:06"
        );
        assert!(lines[1].contains("1 / 4 transferred"));
    }

    #[test]
    fn test_summary_reports_errors() {
        let stats = TransferStats {
            errors: 2,
            fatal_error: true,
            ..Default::default()
        };
        let lines = summary(&stats);
        assert_eq!(lines[2], "Errors:      2 (fatal)");
        assert!(lines[0].ends_with("ETA -"));
    }

    #[tokio::test]
    async fn test_unreachable_rclone_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "engine:\n  rclone_path: /nonexistent/lxmirror-test/rclone\n")
            .unwrap();
        let command = StatsCommand { url: None };
        assert!(command.execute(&path, OutputFormat::Json).await.is_err());
    }
}

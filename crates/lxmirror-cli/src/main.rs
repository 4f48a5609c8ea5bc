//! lxmirror CLI - Command-line interface for lxmirror
//!
//! Provides commands for:
//! - Managing accounts (rclone remotes) and their folder pairings
//! - Querying the activity log
//! - Inspecting and validating configuration
//! - Running a one-shot foreground sync pass
//! - Showing live transfer progress of a running rclone
//!
//! Account and pairing changes are written to `accounts.json`; a running
//! daemon picks them up on SIGHUP.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use lxmirror_core::config::Config;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{
    account::AccountCommand, activity::ActivityCommand, completions::CompletionsCommand,
    config::ConfigCommand, pairing::PairingCommand, stats::StatsCommand, sync::SyncCommand,
};
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(name = "lxmirror", version, about = "Cloud folder mirroring for Linux")]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file (default: $LXMIRROR_CONFIG, then the XDG path)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Manage accounts
    #[command(subcommand)]
    Account(AccountCommand),
    /// Manage folder pairings
    #[command(subcommand)]
    Pairing(PairingCommand),
    /// Show recent activity
    Activity(ActivityCommand),
    /// View and validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Run one sync pass in the foreground
    Sync(SyncCommand),
    /// Show live transfer progress
    Stats(StatsCommand),
    /// Generate shell completions
    Completions(CompletionsCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };
    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var_os("LXMIRROR_CONFIG").map(PathBuf::from))
        .unwrap_or_else(Config::default_path);

    match cli.command {
        Commands::Account(cmd) => cmd.execute(&config_path, format).await,
        Commands::Pairing(cmd) => cmd.execute(&config_path, format).await,
        Commands::Activity(cmd) => cmd.execute(&config_path, format).await,
        Commands::Config(cmd) => cmd.execute(&config_path, format).await,
        Commands::Sync(cmd) => cmd.execute(&config_path, format).await,
        Commands::Stats(cmd) => cmd.execute(&config_path, format).await,
        Commands::Completions(cmd) => cmd.execute(format).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_pairing_add() {
        let cli = Cli::try_parse_from([
            "lxmirror",
            "--json",
            "pairing",
            "add",
            "Work",
            "--remote",
            "gdrive:Docs",
            "--local",
            "/home/ana/Docs",
        ])
        .unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Pairing(PairingCommand::Add { .. })));
    }

    #[test]
    fn test_parse_account_pause() {
        let cli = Cli::try_parse_from(["lxmirror", "account", "pause", "--all"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Account(AccountCommand::Pause { account: None, all: true })
        ));

        let cli = Cli::try_parse_from(["lxmirror", "account", "resume", "Work"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Account(AccountCommand::Resume { all: false, .. })
        ));

        assert!(Cli::try_parse_from(["lxmirror", "account", "pause"]).is_err());
        assert!(Cli::try_parse_from(["lxmirror", "account", "pause", "Work", "--all"]).is_err());
    }

    #[test]
    fn test_sync_requires_account() {
        assert!(Cli::try_parse_from(["lxmirror", "sync"]).is_err());
    }
}

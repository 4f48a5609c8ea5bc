//! Shell completions command
//!
//! Usage: `lxmirror completions bash > ~/.local/share/bash-completion/completions/lxmirror`

use std::io::Write;

use anyhow::Result;
use clap::CommandFactory;
use clap_complete::Shell;

use crate::output::OutputFormat;

#[derive(Debug, clap::Args)]
pub struct CompletionsCommand {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsCommand {
    pub async fn execute(&self, _format: OutputFormat) -> Result<()> {
        self.write_to(&mut std::io::stdout())
    }

    fn write_to(&self, out: &mut dyn Write) -> Result<()> {
        let mut cmd = crate::Cli::command();
        clap_complete::generate(self.shell, &mut cmd, "lxmirror", out);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bash_completions_mention_subcommands() {
        let mut buf = Vec::new();
        CompletionsCommand { shell: Shell::Bash }
            .write_to(&mut buf)
            .unwrap();
        let script = String::from_utf8(buf).unwrap();
        assert!(script.contains("lxmirror"));
        assert!(script.contains("pairing"));
    }
}

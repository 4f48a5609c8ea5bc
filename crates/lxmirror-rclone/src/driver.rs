//! rclone process driver
//!
//! Every call spawns `rclone` with `kill_on_drop`, so a caller that drops the
//! future (timeout, shutdown) also stops the child. Stream-mode mounts are the
//! exception: the child outlives the call and is kept in a table keyed by
//! pairing until [`ITransferEngine::unmount`] or the driver is dropped. With
//! an activity sink attached, the mount's log is read for file events.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use lxmirror_core::config::{EngineConfig, FiltersConfig};
use lxmirror_core::domain::{
    AccountId, ActivityKind, ActivityRecord, Outcome, Pairing, PairingId, PairingMode,
};
use lxmirror_core::ports::{EngineOutcome, FileActionKind, IActivitySink, ITransferEngine, SyncReport};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tracing::{debug, info, trace, warn};

use crate::output::{classify, parse_mount_line, parse_output, BisyncOutput, MountEvent};
use crate::stats::TransferStats;
use crate::RcloneError;

const FUSERMOUNT: &str = "fusermount";

/// Exit status and combined log of one finished rclone run
#[derive(Debug)]
struct RunOutput {
    code: Option<i32>,
    text: String,
}

/// `--filter` rules for a `filters` section, includes first
///
/// rclone applies the first matching rule, so an include wins over any
/// exclude. Unknown presets contribute nothing.
pub fn filter_rules(filters: &FiltersConfig) -> Vec<String> {
    filters
        .include
        .iter()
        .map(|p| format!("+ {p}"))
        .chain(filters.excluded_patterns().iter().map(|p| format!("- {p}")))
        .collect()
}

/// [`ITransferEngine`] backed by the rclone binary
pub struct RcloneDriver {
    config: EngineConfig,
    filter_rules: Vec<String>,
    activity: Option<Arc<dyn IActivitySink>>,
    mounts: DashMap<PairingId, Child>,
}

impl RcloneDriver {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            filter_rules: Vec::new(),
            activity: None,
            mounts: DashMap::new(),
        }
    }

    /// Passes the include/exclude patterns to every bisync run
    pub fn with_filters(mut self, filters: &FiltersConfig) -> Self {
        self.filter_rules = filter_rules(filters);
        self
    }

    /// Reports mount file activity to `sink`
    pub fn with_activity(mut self, sink: Arc<dyn IActivitySink>) -> Self {
        self.activity = Some(sink);
        self
    }

    /// Path of the rclone binary in use
    pub fn program(&self) -> &Path {
        &self.config.rclone_path
    }

    /// Whether a mount child is tracked for the pairing
    pub fn is_mounted(&self, pairing: PairingId) -> bool {
        self.mounts.contains_key(&pairing)
    }

    /// Returns the first line of `rclone version`
    pub async fn version(&self) -> Result<String, RcloneError> {
        let out = self.run(vec!["version".into()]).await?;
        Ok(out.text.lines().next().unwrap_or_default().trim().to_string())
    }

    /// Queries `core/stats` on the remote control at `url`
    pub async fn transfer_stats(&self, url: &str) -> Result<TransferStats, RcloneError> {
        let args = ["rc", "core/stats", "--url", url];
        debug!(program = %self.config.rclone_path.display(), url, "Querying rclone stats");
        let output = Command::new(&self.config.rclone_path)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| RcloneError::Spawn {
                program: self.config.rclone_path.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("no reply")
                .trim()
                .to_string();
            return Err(RcloneError::RemoteControl {
                url: url.to_string(),
                detail,
            });
        }
        Ok(TransferStats::from_json(&String::from_utf8_lossy(&output.stdout))?)
    }

    pub(crate) fn bisync_args(&self, pairing: &Pairing, resync: bool) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "bisync".into(),
            pairing.local_root().as_os_str().to_owned(),
            pairing.remote_root().into(),
            "--verbose".into(),
            "--conflict-resolve".into(),
            self.config.conflict_resolve.clone().into(),
            "--resilient".into(),
            "--recover".into(),
            "--remove-empty-dirs".into(),
        ];
        if resync {
            args.push("--resync".into());
        }
        for rule in &self.filter_rules {
            args.push("--filter".into());
            args.push(rule.into());
        }
        args.extend(self.config.extra_args.iter().map(OsString::from));
        args
    }

    async fn run(&self, args: Vec<OsString>) -> Result<RunOutput, RcloneError> {
        debug!(program = %self.config.rclone_path.display(), ?args, "Running rclone");
        let output = Command::new(&self.config.rclone_path)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| RcloneError::Spawn {
                program: self.config.rclone_path.clone(),
                source,
            })?;

        let mut text = String::from_utf8_lossy(&output.stderr).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stdout));
        Ok(RunOutput {
            code: output.status.code(),
            text,
        })
    }

    async fn bisync(
        &self,
        pairing: &Pairing,
        resync: bool,
    ) -> Result<(Option<i32>, BisyncOutput), RcloneError> {
        let run = self.run(self.bisync_args(pairing, resync)).await?;
        let parsed = parse_output(&run.text, pairing);
        debug!(
            pairing = %pairing.id(),
            resync,
            code = ?run.code,
            actions = parsed.actions.len(),
            "bisync finished"
        );
        Ok((run.code, parsed))
    }

    fn require_mode(pairing: &Pairing, expected: PairingMode) -> Result<(), RcloneError> {
        if pairing.mode() == expected {
            Ok(())
        } else {
            Err(RcloneError::WrongMode {
                pairing: pairing.id(),
                actual: pairing.mode(),
                expected,
            })
        }
    }

    async fn fusermount(local_root: &Path) {
        let result = Command::new(FUSERMOUNT)
            .arg("-uz")
            .arg(local_root)
            .stdin(Stdio::null())
            .output()
            .await;
        match result {
            Ok(out) if out.status.success() => {
                debug!(path = %local_root.display(), "fusermount released mount point")
            }
            Ok(out) => debug!(
                path = %local_root.display(),
                stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                "fusermount reported nothing to unmount"
            ),
            Err(e) => debug!(error = %e, "fusermount unavailable"),
        }
    }
}

impl std::fmt::Debug for RcloneDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RcloneDriver")
            .field("program", &self.config.rclone_path)
            .field("filter_rules", &self.filter_rules.len())
            .field("activity", &self.activity.is_some())
            .field("mounts", &self.mounts.len())
            .finish()
    }
}

fn mount_record(account: AccountId, pairing: PairingId, event: MountEvent) -> ActivityRecord {
    let kind = match event.kind {
        FileActionKind::Upload => ActivityKind::Upload,
        FileActionKind::Download => ActivityKind::Download,
        FileActionKind::Delete => ActivityKind::Delete,
    };
    let outcome = match event.error {
        Some(message) => Outcome::failure(message),
        None => Outcome::Success,
    };
    ActivityRecord::new(account, kind, outcome)
        .with_pairing(pairing)
        .with_path(event.path)
}

/// Follows a mount's log until the process exits
async fn monitor_mount(
    account: AccountId,
    pairing: PairingId,
    stderr: ChildStderr,
    sink: Option<Arc<dyn IActivitySink>>,
) {
    let mut lines = BufReader::new(stderr).lines();
    let mut last = String::new();
    while let Ok(Some(line)) = lines.next_line().await {
        trace!(pairing = %pairing, "rclone mount: {line}");
        // rclone repeats a message for every FUSE call on the same file
        if line == last {
            continue;
        }
        if let (Some(sink), Some(event)) = (&sink, parse_mount_line(&line)) {
            debug!(pairing = %pairing, kind = ?event.kind, path = %event.path, "Mount activity");
            sink.record(mount_record(account, pairing, event));
        }
        last = line;
    }
    debug!(pairing = %pairing, "Mount log closed");
}

#[async_trait]
impl ITransferEngine for RcloneDriver {
    async fn sync(&self, pairing: &Pairing) -> anyhow::Result<SyncReport> {
        Self::require_mode(pairing, PairingMode::Mirror)?;

        let (mut code, mut output) = self.bisync(pairing, false).await?;
        if output.needs_resync {
            info!(pairing = %pairing.id(), "rclone requires a resync, re-running with --resync");
            (code, output) = self.bisync(pairing, true).await?;
        }

        let outcome = classify(code, &output);
        Ok(SyncReport::new(outcome).with_actions(output.actions))
    }

    async fn move_remote(
        &self,
        pairing: &Pairing,
        from: &Path,
        to: &Path,
    ) -> anyhow::Result<EngineOutcome> {
        let args = vec![
            "moveto".into(),
            pairing.remote_path_for(from).into(),
            pairing.remote_path_for(to).into(),
        ];
        let run = self.run(args).await?;
        Ok(classify(run.code, &parse_output(&run.text, pairing)))
    }

    async fn mount(&self, account: AccountId, pairing: &Pairing) -> anyhow::Result<EngineOutcome> {
        Self::require_mode(pairing, PairingMode::Stream)?;
        let id = pairing.id();

        if let Some(mut existing) = self.mounts.get_mut(&id) {
            if matches!(existing.try_wait(), Ok(None)) {
                debug!(pairing = %id, "Already mounted");
                return Ok(EngineOutcome::Success);
            }
        }
        self.mounts.remove(&id);

        let local_root = pairing.local_root();
        tokio::fs::create_dir_all(local_root)
            .await
            .map_err(|source| RcloneError::MountPoint {
                path: local_root.to_path_buf(),
                source,
            })?;

        let mut command = Command::new(&self.config.rclone_path);
        command
            .arg("mount")
            .arg(pairing.remote_root())
            .arg(local_root)
            .args(["--vfs-cache-mode", "full"]);
        if self.activity.is_some() {
            // File opens are only logged at debug level
            command.args(["--log-level", "DEBUG"]);
        }
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RcloneError::Spawn {
                program: self.config.rclone_path.clone(),
                source,
            })?;

        tokio::time::sleep(self.config.mount_ready()).await;

        let exited = child
            .try_wait()
            .map_err(|source| RcloneError::Process { pairing: id, source })?;
        if exited.is_some() {
            let output = child
                .wait_with_output()
                .await
                .map_err(|source| RcloneError::Process { pairing: id, source })?;
            let text = String::from_utf8_lossy(&output.stderr);
            let parsed = parse_output(&text, pairing);
            let outcome = match classify(output.status.code(), &parsed) {
                // The mount must stay up; a clean exit is still a failure
                EngineOutcome::Success => EngineOutcome::Fatal(
                    parsed
                        .last_error
                        .unwrap_or_else(|| "rclone mount exited immediately".to_string()),
                ),
                other => other,
            };
            warn!(pairing = %id, detail = outcome.detail().unwrap_or_default(), "Mount failed");
            return Ok(outcome);
        }

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(monitor_mount(account, id, stderr, self.activity.clone()));
        }
        info!(pairing = %id, path = %local_root.display(), "Mounted");
        self.mounts.insert(id, child);
        Ok(EngineOutcome::Success)
    }

    async fn unmount(&self, pairing: &Pairing) -> anyhow::Result<EngineOutcome> {
        let id = pairing.id();
        if let Some((_, mut child)) = self.mounts.remove(&id) {
            if let Err(e) = child.kill().await {
                debug!(pairing = %id, error = %e, "Mount process already gone");
            }
        }
        Self::fusermount(pairing.local_root()).await;
        info!(pairing = %id, "Unmounted");
        Ok(EngineOutcome::Success)
    }
}

/// Default mount point for a stream pairing under the configured base
pub fn default_mount_point(config: &EngineConfig, account_name: &str) -> PathBuf {
    let name: String = account_name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    config.mount_base_dir.join(name)
}

//! Configuration module for lxmirror.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.
//! Every section is optional in the file; missing sections and fields take
//! their defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for lxmirror.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub watcher: WatcherConfig,
    pub rename: RenameConfig,
    pub locks: LocksConfig,
    pub backoff: BackoffConfig,
    pub engine: EngineConfig,
    pub filters: FiltersConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// Scheduler timing and concurrency.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between periodic full passes per pairing.
    pub poll_interval: u64,
    /// Quiet period (ms) after the last significant change before a pass starts.
    pub debounce_ms: u64,
    /// Upper bound (seconds) on a single engine pass.
    pub pass_timeout: u64,
    /// Global cap on simultaneous engine invocations.
    pub max_concurrent_passes: usize,
    /// Seconds an in-flight pass may keep running after a stop request.
    pub stop_grace: u64,
}

/// Filesystem watcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Maximum raw events buffered per pairing before the overflow policy applies.
    pub buffer_capacity: usize,
    /// Milliseconds after the last suspension release during which events are still dropped.
    pub resume_grace_ms: u64,
    /// Extra file-name suffixes treated as temporary, on top of the built-in rules.
    pub ignore_suffixes: Vec<String>,
}

/// Content fingerprint used to correlate a delete with a later create.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintMode {
    /// File size plus modification time
    #[default]
    SizeMtime,
    /// SHA-256 of the content for files up to `hash_max_bytes`
    ContentHash,
}

/// Rename/move disambiguation windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenameConfig {
    /// Window (ms) in which a delete and a create are considered one move.
    pub correlation_window_ms: u64,
    /// Window (ms) during which child events under a moved directory are suppressed.
    pub directory_window_ms: u64,
    pub fingerprint: FingerprintMode,
    /// Files larger than this are fingerprinted by size and mtime even in `content_hash` mode.
    pub hash_max_bytes: u64,
}

/// Lock artifact recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocksConfig {
    /// Directory where the engine writes its lock files.
    pub state_dir: PathBuf,
    /// Lock file extension, without the dot.
    pub extension: String,
    /// Seconds after which a lock without a verifiable owner is considered stale.
    pub stale_after: u64,
}

/// Retry backoff after failed passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_secs: u64,
    pub max_secs: u64,
    /// Consecutive fatal outcomes after which a pairing is blocked.
    pub retry_ceiling: u32,
}

/// External transfer engine (rclone) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Path to the rclone binary; looked up in `$PATH` when bare.
    pub rclone_path: PathBuf,
    /// Conflict policy passed to `bisync --conflict-resolve`.
    pub conflict_resolve: String,
    /// Extra arguments appended to every bisync invocation.
    pub extra_args: Vec<String>,
    /// Parent directory for stream-mode mount points created by the CLI.
    pub mount_base_dir: PathBuf,
    /// Milliseconds to wait for a mount process to settle before checking it.
    pub mount_ready_ms: u64,
    /// Remote-control address queried for live transfer statistics.
    pub rc_url: String,
}

/// Include/exclude patterns applied to watching and to every transfer.
///
/// Patterns are rclone-style globs relative to a pairing's root. A pattern
/// matches the trailing components of a path unless a leading `/` anchors it
/// at the root, so `*.log` matches log files at any depth. A trailing `/`
/// matches a directory and everything under it. `*` never crosses a `/`.
/// An `include` match overrides every exclude.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FiltersConfig {
    pub exclude: Vec<String>,
    pub include: Vec<String>,
    /// Names from [`FILTER_PRESETS`] whose patterns are added to `exclude`.
    pub presets: Vec<String>,
}

/// Where persistent state is kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Holds `accounts.json` and the per-account activity files.
    pub data_dir: PathBuf,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/lxmirror/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("lxmirror")
            .join("config.yaml")
    }

    /// Serialize back to YAML, e.g. for `config show`.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: 300,
            debounce_ms: 2000,
            pass_timeout: 3600,
            max_concurrent_passes: 2,
            stop_grace: 10,
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 4096,
            resume_grace_ms: 500,
            ignore_suffixes: Vec::new(),
        }
    }
}

impl Default for RenameConfig {
    fn default() -> Self {
        Self {
            correlation_window_ms: 2000,
            directory_window_ms: 5000,
            fingerprint: FingerprintMode::SizeMtime,
            hash_max_bytes: 8 * 1024 * 1024,
        }
    }
}

impl Default for LocksConfig {
    fn default() -> Self {
        Self {
            state_dir: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("~/.cache"))
                .join("rclone")
                .join("bisync"),
            extension: "lck".to_string(),
            stale_after: 300,
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_secs: 5,
            max_secs: 300,
            retry_ceiling: 5,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rclone_path: PathBuf::from("rclone"),
            conflict_resolve: "newer".to_string(),
            extra_args: Vec::new(),
            mount_base_dir: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("~"))
                .join("CloudDrives"),
            mount_ready_ms: 1500,
            rc_url: "http://127.0.0.1:5572/".to_string(),
        }
    }
}

impl Default for FiltersConfig {
    fn default() -> Self {
        Self {
            exclude: vec![
                ".DS_Store".to_string(),
                "Thumbs.db".to_string(),
                "desktop.ini".to_string(),
            ],
            include: Vec::new(),
            presets: vec!["system".to_string()],
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("~/.local/share"))
                .join("lxmirror"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Duration accessors
// ---------------------------------------------------------------------------

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn pass_timeout(&self) -> Duration {
        Duration::from_secs(self.pass_timeout)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace)
    }
}

impl WatcherConfig {
    pub fn resume_grace(&self) -> Duration {
        Duration::from_millis(self.resume_grace_ms)
    }
}

impl RenameConfig {
    pub fn correlation_window(&self) -> Duration {
        Duration::from_millis(self.correlation_window_ms)
    }

    pub fn directory_window(&self) -> Duration {
        Duration::from_millis(self.directory_window_ms)
    }
}

impl LocksConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after)
    }
}

impl BackoffConfig {
    /// Delay before retry number `attempt` (1-based): doubling, capped at `max_secs`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32);
        let secs = self.initial_secs.saturating_mul(1u64 << exp);
        Duration::from_secs(secs.min(self.max_secs))
    }
}

impl EngineConfig {
    pub fn mount_ready(&self) -> Duration {
        Duration::from_millis(self.mount_ready_ms)
    }
}

/// Named exclude pattern sets selectable through `filters.presets`.
pub const FILTER_PRESETS: &[(&str, &[&str])] = &[
    (
        "development",
        &[
            "node_modules/",
            "__pycache__/",
            ".venv/",
            "venv/",
            "*.pyc",
            ".git/",
            ".idea/",
            ".vscode/",
            "*.log",
            ".env",
            ".DS_Store",
        ],
    ),
    ("office", &["~$*", "*.tmp", ".~lock.*", "~*.tmp"]),
    ("media", &[".thumbnails/", "*.part", "*.crdownload", "*.download"]),
    (
        "system",
        &[
            ".DS_Store",
            "Thumbs.db",
            "desktop.ini",
            ".Trash-*/",
            "$RECYCLE.BIN/",
            "*.lnk",
        ],
    ),
    ("backup", &["*.bak", "*.backup", "*~", "*.swp", "*.swo"]),
    ("large_files", &["*.iso", "*.dmg", "*.vdi", "*.vmdk", "*.ova"]),
];

/// Patterns of a named preset.
pub fn filter_preset(name: &str) -> Option<&'static [&'static str]> {
    FILTER_PRESETS
        .iter()
        .find(|(preset, _)| *preset == name)
        .map(|(_, patterns)| *patterns)
}

impl FiltersConfig {
    /// `exclude` followed by the patterns of every known preset, without duplicates.
    ///
    /// Unknown preset names contribute nothing; [`Config::validate`] reports them.
    pub fn excluded_patterns(&self) -> Vec<String> {
        let mut patterns: Vec<String> = Vec::new();
        let presets = self
            .presets
            .iter()
            .filter_map(|name| filter_preset(name))
            .flat_map(|patterns| patterns.iter().map(|p| p.to_string()));
        for pattern in self.exclude.iter().cloned().chain(presets) {
            if !patterns.contains(&pattern) {
                patterns.push(pattern);
            }
        }
        patterns
    }
}

impl StorageConfig {
    pub fn accounts_path(&self) -> PathBuf {
        self.data_dir.join("accounts.json")
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.poll_interval"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid values for `engine.conflict_resolve` (rclone bisync policies).
const VALID_CONFLICT_POLICIES: &[&str] =
    &["none", "newer", "older", "larger", "smaller", "path1", "path2"];

fn positive(errors: &mut Vec<ValidationError>, field: &str, value: u64) {
    if value == 0 {
        errors.push(ValidationError {
            field: field.into(),
            message: "must be greater than 0".into(),
        });
    }
}

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- sync ---
        positive(&mut errors, "sync.poll_interval", self.sync.poll_interval);
        positive(&mut errors, "sync.debounce_ms", self.sync.debounce_ms);
        positive(&mut errors, "sync.pass_timeout", self.sync.pass_timeout);
        positive(
            &mut errors,
            "sync.max_concurrent_passes",
            self.sync.max_concurrent_passes as u64,
        );

        // --- watcher ---
        positive(
            &mut errors,
            "watcher.buffer_capacity",
            self.watcher.buffer_capacity as u64,
        );
        for suffix in &self.watcher.ignore_suffixes {
            if suffix.is_empty() {
                errors.push(ValidationError {
                    field: "watcher.ignore_suffixes".into(),
                    message: "empty suffix would match every file".into(),
                });
            }
        }

        // --- rename ---
        positive(
            &mut errors,
            "rename.correlation_window_ms",
            self.rename.correlation_window_ms,
        );
        if self.rename.directory_window_ms < self.rename.correlation_window_ms {
            errors.push(ValidationError {
                field: "rename.directory_window_ms".into(),
                message: format!(
                    "directory_window_ms ({}) must not be shorter than correlation_window_ms ({})",
                    self.rename.directory_window_ms, self.rename.correlation_window_ms
                ),
            });
        }

        // --- locks ---
        positive(&mut errors, "locks.stale_after", self.locks.stale_after);
        if self.locks.extension.is_empty() || self.locks.extension.starts_with('.') {
            errors.push(ValidationError {
                field: "locks.extension".into(),
                message: "must be a non-empty extension without a leading dot".into(),
            });
        }

        // --- backoff ---
        positive(&mut errors, "backoff.initial_secs", self.backoff.initial_secs);
        positive(&mut errors, "backoff.retry_ceiling", self.backoff.retry_ceiling as u64);
        if self.backoff.initial_secs > self.backoff.max_secs {
            errors.push(ValidationError {
                field: "backoff.initial_secs".into(),
                message: format!(
                    "initial_secs ({}) must not exceed max_secs ({})",
                    self.backoff.initial_secs, self.backoff.max_secs
                ),
            });
        }

        // --- engine ---
        if !VALID_CONFLICT_POLICIES.contains(&self.engine.conflict_resolve.as_str()) {
            errors.push(ValidationError {
                field: "engine.conflict_resolve".into(),
                message: format!(
                    "invalid policy '{}'; valid options: {}",
                    self.engine.conflict_resolve,
                    VALID_CONFLICT_POLICIES.join(", ")
                ),
            });
        }
        if self.engine.rclone_path.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "engine.rclone_path".into(),
                message: "must not be empty".into(),
            });
        }
        if !self.engine.rc_url.starts_with("http://") && !self.engine.rc_url.starts_with("https://") {
            errors.push(ValidationError {
                field: "engine.rc_url".into(),
                message: format!("'{}' is not an http(s) URL", self.engine.rc_url),
            });
        }

        // --- filters ---
        for (field, patterns) in [
            ("filters.exclude", &self.filters.exclude),
            ("filters.include", &self.filters.include),
        ] {
            for pattern in patterns {
                let body = pattern.trim_start_matches('/').trim_end_matches('/');
                if body.is_empty() {
                    errors.push(ValidationError {
                        field: field.into(),
                        message: format!("pattern '{pattern}' matches nothing useful"),
                    });
                } else if let Err(e) = glob::Pattern::new(body) {
                    errors.push(ValidationError {
                        field: field.into(),
                        message: format!("invalid pattern '{pattern}': {e}"),
                    });
                }
            }
        }
        for name in &self.filters.presets {
            if filter_preset(name).is_none() {
                let known: Vec<&str> = FILTER_PRESETS.iter().map(|(n, _)| *n).collect();
                errors.push(ValidationError {
                    field: "filters.presets".into(),
                    message: format!("unknown preset '{name}'; valid options: {}", known.join(", ")),
                });
            }
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust
/// use lxmirror_core::config::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .sync_poll_interval(60)
///     .sync_debounce_ms(500)
///     .logging_level("debug")
///     .build();
/// assert_eq!(config.sync.poll_interval, 60);
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- sync ---

    pub fn sync_poll_interval(mut self, seconds: u64) -> Self {
        self.config.sync.poll_interval = seconds;
        self
    }

    pub fn sync_debounce_ms(mut self, ms: u64) -> Self {
        self.config.sync.debounce_ms = ms;
        self
    }

    pub fn sync_pass_timeout(mut self, seconds: u64) -> Self {
        self.config.sync.pass_timeout = seconds;
        self
    }

    pub fn sync_max_concurrent_passes(mut self, n: usize) -> Self {
        self.config.sync.max_concurrent_passes = n;
        self
    }

    pub fn sync_stop_grace(mut self, seconds: u64) -> Self {
        self.config.sync.stop_grace = seconds;
        self
    }

    // --- watcher ---

    pub fn watcher_buffer_capacity(mut self, n: usize) -> Self {
        self.config.watcher.buffer_capacity = n;
        self
    }

    pub fn watcher_resume_grace_ms(mut self, ms: u64) -> Self {
        self.config.watcher.resume_grace_ms = ms;
        self
    }

    pub fn watcher_ignore_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.config.watcher.ignore_suffixes.push(suffix.into());
        self
    }

    // --- rename ---

    pub fn rename_correlation_window_ms(mut self, ms: u64) -> Self {
        self.config.rename.correlation_window_ms = ms;
        self
    }

    pub fn rename_directory_window_ms(mut self, ms: u64) -> Self {
        self.config.rename.directory_window_ms = ms;
        self
    }

    pub fn rename_fingerprint(mut self, mode: FingerprintMode) -> Self {
        self.config.rename.fingerprint = mode;
        self
    }

    // --- locks ---

    pub fn locks_state_dir(mut self, dir: PathBuf) -> Self {
        self.config.locks.state_dir = dir;
        self
    }

    pub fn locks_stale_after(mut self, seconds: u64) -> Self {
        self.config.locks.stale_after = seconds;
        self
    }

    // --- backoff ---

    pub fn backoff_initial_secs(mut self, seconds: u64) -> Self {
        self.config.backoff.initial_secs = seconds;
        self
    }

    pub fn backoff_max_secs(mut self, seconds: u64) -> Self {
        self.config.backoff.max_secs = seconds;
        self
    }

    pub fn backoff_retry_ceiling(mut self, n: u32) -> Self {
        self.config.backoff.retry_ceiling = n;
        self
    }

    // --- engine ---

    pub fn engine_rclone_path(mut self, path: PathBuf) -> Self {
        self.config.engine.rclone_path = path;
        self
    }

    pub fn engine_conflict_resolve(mut self, policy: impl Into<String>) -> Self {
        self.config.engine.conflict_resolve = policy.into();
        self
    }

    pub fn engine_mount_ready_ms(mut self, ms: u64) -> Self {
        self.config.engine.mount_ready_ms = ms;
        self
    }

    // --- filters ---

    pub fn filters_exclude(mut self, pattern: impl Into<String>) -> Self {
        self.config.filters.exclude.push(pattern.into());
        self
    }

    pub fn filters_include(mut self, pattern: impl Into<String>) -> Self {
        self.config.filters.include.push(pattern.into());
        self
    }

    pub fn filters_preset(mut self, name: impl Into<String>) -> Self {
        self.config.filters.presets.push(name.into());
        self
    }

    // --- storage ---

    pub fn storage_data_dir(mut self, dir: PathBuf) -> Self {
        self.config.storage.data_dir = dir;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_json(mut self, json: bool) -> Self {
        self.config.logging.json = json;
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    // -- Defaults --

    #[test]
    fn default_config_has_sensible_values() {
        let cfg = Config::default();
        assert_eq!(cfg.sync.poll_interval, 300);
        assert_eq!(cfg.sync.debounce_ms, 2000);
        assert_eq!(cfg.sync.max_concurrent_passes, 2);
        assert_eq!(cfg.watcher.buffer_capacity, 4096);
        assert_eq!(cfg.rename.correlation_window_ms, 2000);
        assert_eq!(cfg.rename.directory_window_ms, 5000);
        assert_eq!(cfg.rename.fingerprint, FingerprintMode::SizeMtime);
        assert_eq!(cfg.locks.extension, "lck");
        assert_eq!(cfg.locks.stale_after, 300);
        assert!(cfg.locks.state_dir.ends_with("rclone/bisync"));
        assert_eq!(cfg.backoff.retry_ceiling, 5);
        assert_eq!(cfg.engine.conflict_resolve, "newer");
        assert_eq!(cfg.engine.mount_ready_ms, 1500);
        assert!(cfg.storage.accounts_path().ends_with("lxmirror/accounts.json"));
        assert_eq!(cfg.logging.level, "info");
        assert!(!cfg.logging.json);
    }

    #[test]
    fn default_config_passes_validation() {
        let errors = Config::default().validate();
        assert!(errors.is_empty(), "unexpected validation errors: {errors:?}");
    }

    // -- Loading --

    #[test]
    fn load_from_yaml_file() {
        let yaml = r#"
sync:
  poll_interval: 60
  debounce_ms: 500
  max_concurrent_passes: 4
rename:
  correlation_window_ms: 1000
  fingerprint: content_hash
locks:
  state_dir: /tmp/bisync
  stale_after: 120
engine:
  conflict_resolve: path1
  extra_args: ["--fast-list"]
logging:
  level: debug
  json: true
"#;
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(yaml.as_bytes()).unwrap();
        tmp.flush().unwrap();

        let cfg = Config::load(tmp.path()).expect("load config");
        assert_eq!(cfg.sync.poll_interval, 60);
        assert_eq!(cfg.sync.debounce_ms, 500);
        assert_eq!(cfg.sync.max_concurrent_passes, 4);
        // Unlisted fields keep their defaults
        assert_eq!(cfg.sync.pass_timeout, 3600);
        assert_eq!(cfg.rename.correlation_window_ms, 1000);
        assert_eq!(cfg.rename.fingerprint, FingerprintMode::ContentHash);
        assert_eq!(cfg.locks.state_dir, PathBuf::from("/tmp/bisync"));
        assert_eq!(cfg.locks.stale_after, 120);
        assert_eq!(cfg.engine.conflict_resolve, "path1");
        assert_eq!(cfg.engine.extra_args, vec!["--fast-list".to_string()]);
        assert_eq!(cfg.logging.level, "debug");
        assert!(cfg.logging.json);
        assert_eq!(cfg.watcher.buffer_capacity, 4096);
    }

    #[test]
    fn load_or_default_returns_default_on_missing_file() {
        let cfg = Config::load_or_default(Path::new("/nonexistent/config.yaml"));
        assert_eq!(cfg.sync.poll_interval, 300);
    }

    #[test]
    fn load_returns_error_on_invalid_yaml() {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(b"not: [valid: yaml: {{{").unwrap();
        tmp.flush().unwrap();

        assert!(Config::load(tmp.path()).is_err());
    }

    #[test]
    fn yaml_roundtrip_through_to_yaml() {
        let cfg = ConfigBuilder::new().sync_poll_interval(42).build();
        let yaml = cfg.to_yaml().unwrap();
        let back: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.sync.poll_interval, 42);
    }

    // -- Validation --

    #[test]
    fn validate_catches_zero_values() {
        let cfg = ConfigBuilder::new()
            .sync_poll_interval(0)
            .sync_debounce_ms(0)
            .sync_max_concurrent_passes(0)
            .watcher_buffer_capacity(0)
            .locks_stale_after(0)
            .build();
        let fields: Vec<String> = cfg.validate().into_iter().map(|e| e.field).collect();
        assert!(fields.contains(&"sync.poll_interval".to_string()));
        assert!(fields.contains(&"sync.debounce_ms".to_string()));
        assert!(fields.contains(&"sync.max_concurrent_passes".to_string()));
        assert!(fields.contains(&"watcher.buffer_capacity".to_string()));
        assert!(fields.contains(&"locks.stale_after".to_string()));
    }

    #[test]
    fn validate_catches_inverted_backoff() {
        let errors = ConfigBuilder::new()
            .backoff_initial_secs(600)
            .backoff_max_secs(60)
            .build()
            .validate();
        assert!(errors.iter().any(|e| e.field == "backoff.initial_secs"));
    }

    #[test]
    fn validate_catches_short_directory_window() {
        let errors = ConfigBuilder::new()
            .rename_correlation_window_ms(3000)
            .rename_directory_window_ms(1000)
            .build()
            .validate();
        assert!(errors.iter().any(|e| e.field == "rename.directory_window_ms"));
    }

    #[test]
    fn validate_catches_unknown_policy_and_level() {
        let errors = ConfigBuilder::new()
            .engine_conflict_resolve("newest")
            .logging_level("verbose")
            .build()
            .validate();
        assert!(errors.iter().any(|e| e.field == "engine.conflict_resolve"));
        assert!(errors.iter().any(|e| e.field == "logging.level"));
    }

    #[test]
    fn validate_catches_empty_ignore_suffix() {
        let errors = ConfigBuilder::new().watcher_ignore_suffix("").build().validate();
        assert!(errors.iter().any(|e| e.field == "watcher.ignore_suffixes"));
    }

    #[test]
    fn validate_catches_bad_rc_url() {
        let mut cfg = Config::default();
        cfg.engine.rc_url = "localhost:5572".into();
        assert!(cfg.validate().iter().any(|e| e.field == "engine.rc_url"));
    }

    #[test]
    fn validate_catches_bad_filters() {
        let errors = ConfigBuilder::new()
            .filters_exclude("[unclosed")
            .filters_include("/")
            .filters_preset("photos")
            .build()
            .validate();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"filters.exclude"));
        assert!(fields.contains(&"filters.include"));
        assert!(fields.contains(&"filters.presets"));
    }

    #[test]
    fn excluded_patterns_merge_presets_without_duplicates() {
        let filters = FiltersConfig {
            exclude: vec!["*.log".into(), "Thumbs.db".into()],
            include: Vec::new(),
            presets: vec!["system".into(), "unknown".into()],
        };
        let patterns = filters.excluded_patterns();
        assert_eq!(&patterns[..2], ["*.log", "Thumbs.db"]);
        assert!(patterns.contains(&"$RECYCLE.BIN/".to_string()));
        assert_eq!(patterns.iter().filter(|p| *p == "Thumbs.db").count(), 1);
    }

    #[test]
    fn filters_section_parses_from_yaml() {
        let yaml = "filters:\n  exclude: ['*.iso']\n  include: ['keep.iso']\n  presets: [development]\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.filters.exclude, vec!["*.iso"]);
        assert_eq!(cfg.filters.include, vec!["keep.iso"]);
        assert!(cfg.filters.excluded_patterns().contains(&"node_modules/".to_string()));
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn build_validated_reports_errors() {
        assert!(ConfigBuilder::new().build_validated().is_ok());
        let errs = ConfigBuilder::new()
            .sync_pass_timeout(0)
            .build_validated()
            .unwrap_err();
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].to_string(), "sync.pass_timeout: must be greater than 0");
    }

    // -- Durations --

    #[test]
    fn backoff_doubles_and_caps() {
        let backoff = BackoffConfig {
            initial_secs: 5,
            max_secs: 60,
            retry_ceiling: 5,
        };
        assert_eq!(backoff.delay_for(1), Duration::from_secs(5));
        assert_eq!(backoff.delay_for(2), Duration::from_secs(10));
        assert_eq!(backoff.delay_for(4), Duration::from_secs(40));
        assert_eq!(backoff.delay_for(5), Duration::from_secs(60));
        assert_eq!(backoff.delay_for(100), Duration::from_secs(60));
    }

    #[test]
    fn duration_accessors() {
        let cfg = Config::default();
        assert_eq!(cfg.sync.debounce(), Duration::from_millis(2000));
        assert_eq!(cfg.rename.directory_window(), Duration::from_secs(5));
        assert_eq!(cfg.locks.stale_after(), Duration::from_secs(300));
    }
}

//! Temporary-file and pattern filter
//!
//! Classifies paths as transient work-in-progress state (editor swap files,
//! partial downloads, transfer-engine scratch files) so they never reach the
//! disambiguator. Every temporary-file rule is anchored to the file name:
//! suffix, prefix or exact match, never a substring match, and never applied
//! to directories.
//!
//! On top of that the configured `filters` patterns drop events for paths the
//! transfer engine is told to skip, so excluded churn never triggers a pass.

use std::path::{Component, Path, PathBuf};

use glob::{MatchOptions, Pattern};
use lxmirror_core::config::{FiltersConfig, WatcherConfig};
use lxmirror_core::domain::{ChangeEvent, ChangeKind};
use tracing::{trace, warn};

/// Built-in suffix rules
const DEFAULT_SUFFIXES: &[&str] = &[
    ".partial",
    ".tmp",
    ".swp",
    ".swo",
    ".swx",
    "~",
    ".crdownload",
    ".part",
    ".rclone",
];

/// LibreOffice lock files and Emacs auto-save links
const DEFAULT_PREFIXES: &[&str] = &[".~lock.", ".#"];

/// Vim's write-permission test file
const DEFAULT_EXACT: &[&str] = &["4913"];

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

// ============================================================================
// PathPattern
// ============================================================================

/// One compiled include/exclude pattern
#[derive(Debug, Clone)]
struct PathPattern {
    glob: Pattern,
    /// Trailing `/`: matches directories and everything below them
    dir_only: bool,
    /// Leading `/`: matched against the whole relative path, otherwise
    /// against its trailing components
    anchored: bool,
}

impl PathPattern {
    fn compile(raw: &str) -> Option<Self> {
        let dir_only = raw.ends_with('/');
        let anchored = raw.starts_with('/');
        let body = raw.trim_matches('/');
        if body.is_empty() {
            return None;
        }
        match Pattern::new(body) {
            Ok(glob) => Some(Self {
                glob,
                dir_only,
                anchored,
            }),
            Err(e) => {
                warn!(pattern = raw, error = %e, "Skipping invalid filter pattern");
                None
            }
        }
    }

    fn matches(&self, components: &[&str], is_dir: bool) -> bool {
        let Some((_, parents)) = components.split_last() else {
            return false;
        };
        if self.dir_only {
            // Every directory on the way down, plus the path itself if it is one
            let dirs = if is_dir { components.len() } else { parents.len() };
            return (1..=dirs).any(|n| self.matches_prefix(&components[..n]));
        }
        if is_dir {
            return false;
        }
        self.matches_prefix(components)
    }

    fn matches_prefix(&self, components: &[&str]) -> bool {
        if self.anchored {
            return self.glob.matches_with(&components.join("/"), MATCH_OPTIONS);
        }
        (0..components.len())
            .any(|start| self.glob.matches_with(&components[start..].join("/"), MATCH_OPTIONS))
    }
}

/// Temporary-file rules plus the configured include/exclude patterns
#[derive(Debug, Clone)]
pub struct TempFileFilter {
    suffixes: Vec<String>,
    prefixes: Vec<String>,
    exact: Vec<String>,
    exclude: Vec<PathPattern>,
    include: Vec<PathPattern>,
    /// Patterns are matched relative to this directory
    root: Option<PathBuf>,
}

impl Default for TempFileFilter {
    fn default() -> Self {
        Self {
            suffixes: DEFAULT_SUFFIXES.iter().map(|s| s.to_string()).collect(),
            prefixes: DEFAULT_PREFIXES.iter().map(|s| s.to_string()).collect(),
            exact: DEFAULT_EXACT.iter().map(|s| s.to_string()).collect(),
            exclude: Vec::new(),
            include: Vec::new(),
            root: None,
        }
    }
}

impl TempFileFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in rules plus `watcher.ignore_suffixes`
    pub fn from_config(config: &WatcherConfig) -> Self {
        let mut filter = Self::default();
        for suffix in &config.ignore_suffixes {
            filter = filter.with_suffix(suffix);
        }
        filter
    }

    /// Adds the `filters` section's patterns, presets included
    pub fn with_filters(mut self, filters: &FiltersConfig) -> Self {
        self.exclude
            .extend(filters.excluded_patterns().iter().filter_map(|p| PathPattern::compile(p)));
        self.include
            .extend(filters.include.iter().filter_map(|p| PathPattern::compile(p)));
        self
    }

    /// Matches patterns relative to `root` instead of the full path
    pub fn rooted(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Adds a suffix rule; empty suffixes are ignored
    pub fn with_suffix(mut self, suffix: &str) -> Self {
        let suffix = suffix.to_lowercase();
        if !suffix.is_empty() && !self.suffixes.contains(&suffix) {
            self.suffixes.push(suffix);
        }
        self
    }

    /// Returns true if the file name marks transient state
    pub fn is_temporary(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        let name = name.to_lowercase();
        self.exact.iter().any(|e| name == *e)
            || self.prefixes.iter().any(|p| name.starts_with(p.as_str()))
            || self
                .suffixes
                .iter()
                .any(|s| name.len() > s.len() && name.ends_with(s.as_str()))
    }

    /// Returns true if the patterns exclude `path` and no include rescues it
    pub fn is_excluded(&self, path: &Path, is_dir: bool) -> bool {
        if self.exclude.is_empty() {
            return false;
        }
        let relative = match &self.root {
            Some(root) => path.strip_prefix(root).unwrap_or(path),
            None => path,
        };
        let components: Vec<&str> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(name) => name.to_str(),
                _ => None,
            })
            .collect();
        self.exclude.iter().any(|p| p.matches(&components, is_dir))
            && !self.include.iter().any(|p| p.matches(&components, is_dir))
    }

    fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        (!is_dir && self.is_temporary(path)) || self.is_excluded(path, is_dir)
    }

    /// Filters a change event, rewriting moves that cross the ignored/real boundary
    ///
    /// - events on temporary files and excluded paths are dropped
    /// - ignored → real moves (save-by-rename) become `Created` of the destination
    /// - real → ignored moves become `Deleted` of the source
    /// - temporary-file rules never drop directory events
    pub fn apply(&self, event: ChangeEvent) -> Option<ChangeEvent> {
        let is_dir = event.is_dir;
        match &event.kind {
            ChangeKind::Moved { from } => {
                match (self.is_ignored(from, is_dir), self.is_ignored(&event.path, is_dir)) {
                    (false, false) => Some(event),
                    (true, true) => None,
                    (true, false) => {
                        trace!(path = %event.path.display(), "Move out of an ignored path treated as create");
                        Some(ChangeEvent::created(event.path, is_dir, event.at))
                    }
                    (false, true) => Some(ChangeEvent::deleted(from.clone(), is_dir, event.at)),
                }
            }
            _ if self.is_ignored(&event.path, is_dir) => {
                trace!(path = %event.path.display(), "Ignoring filtered path");
                None
            }
            _ => Some(event),
        }
    }
}

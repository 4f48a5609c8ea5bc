//! Content fingerprints for delete+create correlation
//!
//! A delete event carries no metadata, so the watcher keeps a
//! [`FingerprintIndex`] of every known file, seeded by a scan when the watch
//! starts and updated as events arrive. A deleted path's last known
//! fingerprint is compared against the fingerprint of a newly created file.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use lxmirror_core::config::{FingerprintMode, RenameConfig};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Identity of a file's content, as far as correlation is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fingerprint {
    /// Size and modification time
    Meta { size: u64, mtime: SystemTime },
    /// Size and SHA-256 of the content
    Content { size: u64, digest: [u8; 32] },
}

impl Fingerprint {
    pub fn size(&self) -> u64 {
        match self {
            Fingerprint::Meta { size, .. } | Fingerprint::Content { size, .. } => *size,
        }
    }

    /// Empty files all look alike and are never correlated
    pub fn is_distinctive(&self) -> bool {
        self.size() > 0
    }
}

/// Computes fingerprints according to the configured mode
#[derive(Debug, Clone)]
pub struct Fingerprinter {
    mode: FingerprintMode,
    hash_max_bytes: u64,
}

impl Fingerprinter {
    pub fn new(mode: FingerprintMode, hash_max_bytes: u64) -> Self {
        Self {
            mode,
            hash_max_bytes,
        }
    }

    pub fn from_config(config: &RenameConfig) -> Self {
        Self::new(config.fingerprint, config.hash_max_bytes)
    }

    /// Fingerprints a regular file; `None` for directories and unreadable paths
    pub fn compute(&self, path: &Path) -> Option<Fingerprint> {
        let meta = std::fs::metadata(path).ok()?;
        if !meta.is_file() {
            return None;
        }
        let size = meta.len();
        if self.mode == FingerprintMode::ContentHash && size <= self.hash_max_bytes {
            match hash_file(path) {
                Ok(digest) => return Some(Fingerprint::Content { size, digest }),
                Err(e) => debug!(path = %path.display(), error = %e, "Hash failed, using metadata"),
            }
        }
        let mtime = meta.modified().ok()?;
        Some(Fingerprint::Meta { size, mtime })
    }
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::from_config(&RenameConfig::default())
    }
}

fn hash_file(path: &Path) -> io::Result<[u8; 32]> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().into())
}

/// Last known fingerprint of every file under a watched root
#[derive(Debug, Default)]
pub struct FingerprintIndex {
    files: HashMap<PathBuf, Fingerprint>,
    dirs: HashSet<PathBuf>,
}

impl FingerprintIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an index by walking `root` recursively
    ///
    /// Unreadable subdirectories are skipped with a warning.
    pub fn scan(root: &Path, fingerprinter: &Fingerprinter) -> Self {
        let mut index = Self::new();
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "Skipping unreadable directory");
                    continue;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                match entry.file_type() {
                    Ok(ft) if ft.is_dir() => {
                        index.dirs.insert(path.clone());
                        stack.push(path);
                    }
                    Ok(ft) if ft.is_file() => {
                        if let Some(fp) = fingerprinter.compute(&path) {
                            index.files.insert(path, fp);
                        }
                    }
                    _ => {}
                }
            }
        }
        debug!(
            root = %root.display(),
            files = index.files.len(),
            dirs = index.dirs.len(),
            "Fingerprint index seeded"
        );
        index
    }

    pub fn get(&self, path: &Path) -> Option<Fingerprint> {
        self.files.get(path).copied()
    }

    pub fn insert(&mut self, path: PathBuf, fingerprint: Fingerprint) {
        self.files.insert(path, fingerprint);
    }

    pub fn insert_dir(&mut self, path: PathBuf) {
        self.dirs.insert(path);
    }

    pub fn is_dir(&self, path: &Path) -> bool {
        self.dirs.contains(path)
    }

    /// Forgets a file, or a directory and everything beneath it
    ///
    /// Returns the file's last fingerprint.
    pub fn remove(&mut self, path: &Path) -> Option<Fingerprint> {
        if self.dirs.remove(path) {
            self.files.retain(|p, _| !p.starts_with(path));
            self.dirs.retain(|p| !p.starts_with(path));
            return None;
        }
        self.files.remove(path)
    }

    /// Re-keys a file or a whole directory subtree after a move
    ///
    /// Returns the moved file's fingerprint.
    pub fn rename(&mut self, from: &Path, to: &Path) -> Option<Fingerprint> {
        if self.dirs.remove(from) {
            self.dirs.insert(to.to_path_buf());
            let moved_dirs: Vec<PathBuf> = self
                .dirs
                .iter()
                .filter(|p| p.starts_with(from))
                .cloned()
                .collect();
            for old in moved_dirs {
                self.dirs.remove(&old);
                if let Ok(rel) = old.strip_prefix(from) {
                    self.dirs.insert(to.join(rel));
                }
            }
            let moved_files: Vec<PathBuf> = self
                .files
                .keys()
                .filter(|p| p.starts_with(from))
                .cloned()
                .collect();
            for old in moved_files {
                if let (Some(fp), Ok(rel)) = (self.files.remove(&old), old.strip_prefix(from)) {
                    self.files.insert(to.join(rel), fp);
                }
            }
            return None;
        }
        let fp = self.files.remove(from)?;
        self.files.insert(to.to_path_buf(), fp);
        Some(fp)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

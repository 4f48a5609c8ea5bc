//! Account and Pairing domain entities
//!
//! An [`Account`] is one remote credential set (an rclone remote). It owns
//! any number of [`Pairing`]s, each associating a local folder with a remote
//! location in either mirror or stream mode.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    errors::DomainError,
    newtypes::{AccountId, PairingId},
};

/// Authorization state of an account's remote credentials
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    /// Credentials are present and usable
    #[default]
    Authorized,
    /// OAuth token expired; the user has to re-authorize
    Expired,
    /// Access was revoked remotely
    Revoked,
}

impl AuthState {
    /// Returns true if schedulers may run for this account
    pub fn can_sync(&self) -> bool {
        matches!(self, AuthState::Authorized)
    }
}

impl std::fmt::Display for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthState::Authorized => write!(f, "authorized"),
            AuthState::Expired => write!(f, "expired"),
            AuthState::Revoked => write!(f, "revoked"),
        }
    }
}

/// How a pairing's local folder relates to its remote location
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingMode {
    /// Continuous two-way sync with a full local copy
    #[default]
    Mirror,
    /// On-demand virtual view mounted at the local root
    Stream,
}

impl std::fmt::Display for PairingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PairingMode::Mirror => write!(f, "mirror"),
            PairingMode::Stream => write!(f, "stream"),
        }
    }
}

impl std::str::FromStr for PairingMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mirror" => Ok(PairingMode::Mirror),
            "stream" => Ok(PairingMode::Stream),
            other => Err(DomainError::ValidationFailed(format!(
                "unknown pairing mode '{other}'; expected mirror or stream"
            ))),
        }
    }
}

/// One local-root ↔ remote-root association under an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pairing {
    id: PairingId,
    mode: PairingMode,
    /// Absolute local root
    local_root: PathBuf,
    /// rclone remote spec, `remote:path`
    remote_root: String,
    enabled: bool,
}

impl Pairing {
    /// Creates a new enabled pairing after validating both roots
    ///
    /// # Errors
    /// - `DomainError::InvalidPath` if `local_root` is not absolute
    /// - `DomainError::InvalidRemotePath` if `remote_root` lacks a `remote:` prefix
    pub fn new(
        mode: PairingMode,
        local_root: impl Into<PathBuf>,
        remote_root: impl Into<String>,
    ) -> Result<Self, DomainError> {
        Self::with_id(PairingId::new(), mode, local_root, remote_root)
    }

    /// Creates a pairing with a specific ID (for reconstitution from storage)
    pub fn with_id(
        id: PairingId,
        mode: PairingMode,
        local_root: impl Into<PathBuf>,
        remote_root: impl Into<String>,
    ) -> Result<Self, DomainError> {
        let local_root = local_root.into();
        let remote_root = remote_root.into();

        if !local_root.is_absolute() {
            return Err(DomainError::InvalidPath(local_root.display().to_string()));
        }
        match remote_root.split_once(':') {
            Some((remote, _)) if !remote.is_empty() => {}
            _ => return Err(DomainError::InvalidRemotePath(remote_root)),
        }

        Ok(Self {
            id,
            mode,
            local_root,
            remote_root,
            enabled: true,
        })
    }

    pub fn id(&self) -> PairingId {
        self.id
    }

    pub fn mode(&self) -> PairingMode {
        self.mode
    }

    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    pub fn remote_root(&self) -> &str {
        &self.remote_root
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn set_mode(&mut self, mode: PairingMode) {
        self.mode = mode;
    }

    /// Joins a root-relative path onto the remote root
    ///
    /// Produces `remote:base/rel` without doubled separators.
    pub fn remote_path_for(&self, relative: &Path) -> String {
        let rel = relative.to_string_lossy().replace('\\', "/");
        let rel = rel.trim_start_matches('/');
        if self.remote_root.ends_with(':') || self.remote_root.ends_with('/') {
            format!("{}{}", self.remote_root, rel)
        } else {
            format!("{}/{}", self.remote_root, rel)
        }
    }

    /// Strips the local root from an absolute path
    ///
    /// Returns `None` for paths outside the pairing.
    pub fn relative_path<'a>(&self, absolute: &'a Path) -> Option<&'a Path> {
        absolute.strip_prefix(&self.local_root).ok()
    }
}

/// A remote credential set with its pairings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    id: AccountId,
    display_name: String,
    /// Name of the rclone remote backing this account
    remote_name: String,
    #[serde(default)]
    auth_state: AuthState,
    #[serde(default)]
    pairings: Vec<Pairing>,
    /// Paused by the user; pairings keep their own enabled flags
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    paused: bool,
    created_at: DateTime<Utc>,
}

impl Account {
    /// Creates a new authorized account without pairings
    pub fn new(display_name: impl Into<String>, remote_name: impl Into<String>) -> Self {
        Self {
            id: AccountId::new(),
            display_name: display_name.into(),
            remote_name: remote_name.into(),
            auth_state: AuthState::Authorized,
            pairings: Vec::new(),
            paused: false,
            created_at: Utc::now(),
        }
    }

    // --- Getters ---

    pub fn id(&self) -> AccountId {
        self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn remote_name(&self) -> &str {
        &self.remote_name
    }

    pub fn auth_state(&self) -> &AuthState {
        &self.auth_state
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn pairings(&self) -> &[Pairing] {
        &self.pairings
    }

    /// Iterates pairings that should have a running scheduler
    pub fn enabled_pairings(&self) -> impl Iterator<Item = &Pairing> {
        self.pairings.iter().filter(|p| p.is_enabled())
    }

    pub fn pairing(&self, id: PairingId) -> Option<&Pairing> {
        self.pairings.iter().find(|p| p.id() == id)
    }

    pub fn pairing_mut(&mut self, id: PairingId) -> Option<&mut Pairing> {
        self.pairings.iter_mut().find(|p| p.id() == id)
    }

    /// Returns true if any pairing is enabled
    pub fn is_enabled(&self) -> bool {
        self.pairings.iter().any(Pairing::is_enabled)
    }

    pub fn can_sync(&self) -> bool {
        self.auth_state.can_sync()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Returns true if schedulers should run: authorized and not paused
    pub fn is_active(&self) -> bool {
        self.can_sync() && !self.paused
    }

    // --- Mutations ---

    pub fn set_auth_state(&mut self, state: AuthState) {
        self.auth_state = state;
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// Adds a pairing to the account
    ///
    /// # Errors
    /// Returns `DomainError::DuplicatePairing` if the id is already present or
    /// another pairing already uses the same local root.
    pub fn add_pairing(&mut self, pairing: Pairing) -> Result<(), DomainError> {
        if self
            .pairings
            .iter()
            .any(|p| p.id() == pairing.id() || p.local_root() == pairing.local_root())
        {
            return Err(DomainError::DuplicatePairing(
                pairing.local_root().display().to_string(),
            ));
        }
        self.pairings.push(pairing);
        Ok(())
    }

    /// Removes and returns a pairing
    pub fn remove_pairing(&mut self, id: PairingId) -> Result<Pairing, DomainError> {
        let index = self
            .pairings
            .iter()
            .position(|p| p.id() == id)
            .ok_or_else(|| DomainError::PairingNotFound(id.to_string()))?;
        Ok(self.pairings.remove(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mirror(local: &str) -> Pairing {
        Pairing::new(PairingMode::Mirror, local, "gdrive:Documents").unwrap()
    }

    mod pairing_tests {
        use super::*;

        #[test]
        fn test_new_pairing_is_enabled() {
            let pairing = mirror("/home/user/Docs");
            assert!(pairing.is_enabled());
            assert_eq!(pairing.mode(), PairingMode::Mirror);
            assert_eq!(pairing.remote_root(), "gdrive:Documents");
        }

        #[test]
        fn test_rejects_relative_local_root() {
            let err = Pairing::new(PairingMode::Mirror, "Docs", "gdrive:").unwrap_err();
            assert!(matches!(err, DomainError::InvalidPath(_)));
        }

        #[test]
        fn test_rejects_remote_without_prefix() {
            let err = Pairing::new(PairingMode::Mirror, "/d", "Documents").unwrap_err();
            assert!(matches!(err, DomainError::InvalidRemotePath(_)));

            let err = Pairing::new(PairingMode::Mirror, "/d", ":Documents").unwrap_err();
            assert!(matches!(err, DomainError::InvalidRemotePath(_)));
        }

        #[test]
        fn test_remote_path_for() {
            let pairing = mirror("/home/user/Docs");
            assert_eq!(
                pairing.remote_path_for(Path::new("a/report.docx")),
                "gdrive:Documents/a/report.docx"
            );

            let root = Pairing::new(PairingMode::Mirror, "/d", "gdrive:").unwrap();
            assert_eq!(root.remote_path_for(Path::new("x.txt")), "gdrive:x.txt");
        }

        #[test]
        fn test_relative_path() {
            let pairing = mirror("/home/user/Docs");
            assert_eq!(
                pairing.relative_path(Path::new("/home/user/Docs/a/b.txt")),
                Some(Path::new("a/b.txt"))
            );
            assert_eq!(pairing.relative_path(Path::new("/etc/passwd")), None);
        }

        #[test]
        fn test_mode_parse_and_display() {
            assert_eq!("stream".parse::<PairingMode>().unwrap(), PairingMode::Stream);
            assert!("mount".parse::<PairingMode>().is_err());
            assert_eq!(PairingMode::Mirror.to_string(), "mirror");
        }
    }

    mod account_tests {
        use super::*;

        #[test]
        fn test_new_account() {
            let account = Account::new("Work Drive", "gdrive");
            assert_eq!(account.display_name(), "Work Drive");
            assert_eq!(account.remote_name(), "gdrive");
            assert!(account.can_sync());
            assert!(account.pairings().is_empty());
            assert!(!account.is_enabled());
        }

        #[test]
        fn test_add_and_remove_pairing() {
            let mut account = Account::new("Work", "gdrive");
            let pairing = mirror("/home/user/Docs");
            let id = pairing.id();
            account.add_pairing(pairing).unwrap();
            assert!(account.pairing(id).is_some());
            assert!(account.is_enabled());

            let removed = account.remove_pairing(id).unwrap();
            assert_eq!(removed.id(), id);
            assert!(account.remove_pairing(id).is_err());
        }

        #[test]
        fn test_duplicate_local_root_rejected() {
            let mut account = Account::new("Work", "gdrive");
            account.add_pairing(mirror("/home/user/Docs")).unwrap();
            let err = account.add_pairing(mirror("/home/user/Docs")).unwrap_err();
            assert!(matches!(err, DomainError::DuplicatePairing(_)));
        }

        #[test]
        fn test_enabled_pairings_filters_disabled() {
            let mut account = Account::new("Work", "gdrive");
            let mut disabled = mirror("/a");
            disabled.set_enabled(false);
            account.add_pairing(disabled).unwrap();
            account.add_pairing(mirror("/b")).unwrap();
            assert_eq!(account.enabled_pairings().count(), 1);
        }

        #[test]
        fn test_auth_state_gates_sync() {
            let mut account = Account::new("Work", "gdrive");
            account.set_auth_state(AuthState::Expired);
            assert!(!account.can_sync());
            assert_eq!(account.auth_state().to_string(), "expired");
        }

        #[test]
        fn test_pause_keeps_pairing_flags() {
            let mut account = Account::new("Work", "gdrive");
            account.add_pairing(mirror("/a")).unwrap();
            account.set_paused(true);
            assert!(account.is_paused());
            assert!(account.can_sync());
            assert!(!account.is_active());
            assert_eq!(account.enabled_pairings().count(), 1);

            account.set_paused(false);
            assert!(account.is_active());
        }

        #[test]
        fn test_paused_flag_defaults_when_absent() {
            let account = Account::new("Work", "gdrive");
            let json = serde_json::to_string(&account).unwrap();
            assert!(!json.contains("paused"));
            let back: Account = serde_json::from_str(&json).unwrap();
            assert!(!back.is_paused());

            let mut paused = account.clone();
            paused.set_paused(true);
            let json = serde_json::to_string(&paused).unwrap();
            let back: Account = serde_json::from_str(&json).unwrap();
            assert!(back.is_paused());
        }

        #[test]
        fn test_serialization_roundtrip() {
            let mut account = Account::new("Work", "gdrive");
            account.add_pairing(mirror("/home/user/Docs")).unwrap();
            let json = serde_json::to_string(&account).unwrap();
            let back: Account = serde_json::from_str(&json).unwrap();
            assert_eq!(account, back);
        }
    }
}

//! Domain error types
//!
//! This module defines error types specific to domain operations,
//! including validation failures and malformed identifiers.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid local path (must be absolute)
    #[error("Invalid local path: {0}")]
    InvalidPath(String),

    /// Invalid remote path (expected `remote:path`)
    #[error("Invalid remote path: {0}")]
    InvalidRemotePath(String),

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// A pairing with this id already exists on the account
    #[error("Duplicate pairing: {0}")]
    DuplicatePairing(String),

    /// The referenced pairing does not exist on the account
    #[error("Pairing not found: {0}")]
    PairingNotFound(String),

    /// ID parsing error
    #[error("Invalid ID format: {0}")]
    InvalidId(String),
}

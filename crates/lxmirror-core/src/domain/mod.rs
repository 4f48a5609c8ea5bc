//! Domain entities
//!
//! This module contains the core domain types for lxmirror:
//! - Newtypes for type-safe identifiers
//! - Accounts and their pairings
//! - Logical filesystem change events
//! - Activity records shown by the GUI
//! - Domain-specific error types

pub mod account;
pub mod activity;
pub mod change;
pub mod errors;
pub mod newtypes;

// Re-export commonly used types
pub use account::{Account, AuthState, Pairing, PairingMode};
pub use activity::{ActivityKind, ActivityRecord, Outcome};
pub use change::{ChangeEvent, ChangeKind};
pub use errors::DomainError;
pub use newtypes::*;

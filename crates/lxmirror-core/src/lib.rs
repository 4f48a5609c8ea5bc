//! lxmirror Core - Domain types and ports for the synchronization core
//!
//! This crate contains:
//! - **Domain entities** - `Account`, `Pairing`, `ChangeEvent`, `ActivityRecord`
//! - **Port definitions** - `ITransferEngine`, the boundary to the external transfer engine,
//!   and `IActivitySink`, where schedulers report what they did
//! - **Configuration** - typed YAML configuration with validation and a builder
//!
//! # Architecture
//!
//! The domain module is pure data with no I/O. Ports define trait interfaces
//! that adapter crates (such as `lxmirror-rclone`) implement, and that the
//! scheduler in `lxmirror-sync` drives.

pub mod config;
pub mod domain;
pub mod ports;

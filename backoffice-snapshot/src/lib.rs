//! Backoffice Snapshot
//!
//! Full logical snapshots of the back-office database plus uploaded files,
//! packed into a single zip archive, catalogued, and restorable in one
//! all-or-nothing transaction.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod state;
pub mod utils;

#[cfg(test)]
mod testutil;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{BackupError, Result};
pub use models::archive::{ArchiveKind, ArchiveRecord, ArchiveStatus};
pub use services::packager::CreateArchiveRequest;
pub use services::restore::{RestorePhase, RestoreReport};
pub use state::{ArchiveDownload, SnapshotEngine};

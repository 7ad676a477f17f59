//! Retention: drops registry entries (and their files) older than the
//! configured number of days.

use crate::config::AppConfig;
use crate::db::connection::DbPool;
use crate::error::Result;
use crate::models::archive::{self, ArchiveRecord};
use crate::models::audit_log::{self, AuditCategory, Severity};
use crate::utils::time;
use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::Path;

#[derive(Debug, Default, Clone, Serialize)]
pub struct PruneReport {
    pub removed: Vec<i64>,
    /// Entries kept because their file could not be removed.
    pub failed: Vec<i64>,
}

/// Removes the archive file, then the registry row. If the file cannot be
/// removed the row stays, so the registry never forgets a file that exists.
pub fn remove_archive(conn: &Connection, record: &ArchiveRecord) -> Result<()> {
    if let Some(path) = record.storage_path.as_deref().filter(|p| !p.is_empty()) {
        match fs::remove_file(Path::new(path)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(archive_id = record.id, path, "Archive file already gone");
            }
            Err(e) => return Err(e.into()),
        }
    }
    archive::delete(conn, record.id)?;
    Ok(())
}

pub fn prune(pool: &DbPool, config: &AppConfig, now: DateTime<Utc>) -> Result<PruneReport> {
    let mut report = PruneReport::default();
    if config.retention_days <= 0 {
        tracing::debug!("Retention disabled");
        return Ok(report);
    }

    let cutoff = time::to_rfc3339(&(now - Duration::days(config.retention_days)));
    let conn = pool.get()?;
    for record in archive::find_created_before(&conn, &cutoff)? {
        match remove_archive(&conn, &record) {
            Ok(()) => report.removed.push(record.id),
            Err(e) => {
                tracing::warn!(archive_id = record.id, error = %e, "Failed to prune archive");
                report.failed.push(record.id);
            }
        }
    }

    if !report.removed.is_empty() {
        tracing::info!(removed = report.removed.len(), cutoff = %cutoff, "Pruned old archives");
        audit_log::append_or_warn(
            &conn,
            AuditCategory::Action,
            Severity::Info,
            &format!(
                "Removed {} backups older than {} days",
                report.removed.len(),
                config.retention_days
            ),
            None,
        );
    }
    Ok(report)
}

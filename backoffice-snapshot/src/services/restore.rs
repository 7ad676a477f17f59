//! Restore Orchestrator.
//!
//! `Idle -> Extracting -> Clearing -> Reloading -> Relinking -> Committed`,
//! with any non-terminal phase able to fall to `Failed`. Clearing, reloading
//! and relinking share one IMMEDIATE transaction: a failure anywhere leaves
//! the tables exactly as they were before the call. Payloads are staged
//! beside the upload root and swapped in just before the commit; a failed
//! commit swaps the previous files back.

use crate::config::AppConfig;
use crate::db::bulk;
use crate::db::connection::DbPool;
use crate::error::{BackupError, Result};
use crate::models::archive::{self, ArchiveStatus};
use crate::models::audit_log::{self, AuditCategory, Severity};
use crate::models::family::{self, TableSpec};
use crate::models::file_meta;
use crate::services::manifest::ArchiveManifest;
use crate::services::packager::PAYLOAD_DIR;
use crate::services::payload::{self, FileRef, PayloadSwap};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use zip::ZipArchive;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestorePhase {
    Idle,
    Extracting,
    Clearing,
    Reloading,
    Relinking,
    Committed,
    Failed,
}

impl RestorePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestorePhase::Idle => "idle",
            RestorePhase::Extracting => "extracting",
            RestorePhase::Clearing => "clearing",
            RestorePhase::Reloading => "reloading",
            RestorePhase::Relinking => "relinking",
            RestorePhase::Committed => "committed",
            RestorePhase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RestorePhase::Committed | RestorePhase::Failed)
    }
}

impl fmt::Display for RestorePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RestoreReport {
    pub archive_id: i64,
    /// Rows inserted per `data/<name>.json`.
    pub restored: BTreeMap<String, usize>,
    /// Rows dropped because a required reference pointed at nothing.
    pub skipped_rows: usize,
    pub payloads_relinked: usize,
    pub payloads_missing: usize,
}

struct RestoreRun {
    archive_id: i64,
    phase: RestorePhase,
}

impl RestoreRun {
    fn new(archive_id: i64) -> Self {
        Self { archive_id, phase: RestorePhase::Idle }
    }

    fn advance(&mut self, next: RestorePhase) {
        debug_assert!(!self.phase.is_terminal(), "restore already finished");
        tracing::debug!(archive_id = self.archive_id, from = %self.phase, to = %next, "Restore phase");
        self.phase = next;
    }
}

enum PreparedRow {
    Insert { id: i64, values: Vec<SqlValue> },
    Skip(String),
}

/// Replaces the snapshot tables with the contents of archive `archive_id`.
pub fn restore(
    pool: &DbPool,
    config: &AppConfig,
    archive_id: i64,
    requested_by: Option<i64>,
) -> Result<RestoreReport> {
    let mut conn = pool.get()?;
    let mut run = RestoreRun::new(archive_id);
    tracing::warn!(archive_id, "Starting restore, current data will be replaced");

    match run_restore(&mut conn, config, archive_id, requested_by, &mut run) {
        Ok(report) => {
            tracing::info!(
                archive_id,
                skipped_rows = report.skipped_rows,
                payloads_relinked = report.payloads_relinked,
                payloads_missing = report.payloads_missing,
                "Restore committed"
            );
            Ok(report)
        }
        Err(e) => {
            let phase = run.phase;
            run.advance(RestorePhase::Failed);
            tracing::error!(archive_id, phase = %phase, error = %e, "Restore failed, no changes applied");
            audit_log::append_or_warn(
                &conn,
                AuditCategory::Error,
                Severity::Error,
                &format!("Failed to restore backup {}: {}", archive_id, e),
                requested_by,
            );
            Err(match phase {
                RestorePhase::Idle => e,
                phase => BackupError::RestoreFailed { phase, source: Box::new(e) },
            })
        }
    }
}

fn run_restore(
    conn: &mut Connection,
    config: &AppConfig,
    archive_id: i64,
    requested_by: Option<i64>,
    run: &mut RestoreRun,
) -> Result<RestoreReport> {
    let record = archive::find_by_id(conn, archive_id)?.ok_or(BackupError::NotFound(archive_id))?;
    if record.status != ArchiveStatus::Succeeded {
        return Err(BackupError::NotRestorable(archive_id));
    }
    let archive_path = PathBuf::from(record.storage_path.as_deref().unwrap_or_default());
    if !archive_path.is_file() {
        return Err(BackupError::ArchiveMissing(archive_path));
    }

    run.advance(RestorePhase::Extracting);
    let workdir = tempfile::Builder::new().prefix("snapshot-restore-").tempdir()?;
    let root = workdir.path();
    extract_archive(&archive_path, root)?;
    if !root.join("data").is_dir() {
        return Err(BackupError::MalformedArchive("archive has no data/ directory".into()));
    }
    let manifest = ArchiveManifest::read(root)?;
    if let Some(manifest) = &manifest {
        tracing::debug!(created_at = %manifest.created_at, kind = %manifest.kind, "Archive manifest");
    }
    let staged_names = manifest.and_then(|m| m.payload_paths);

    // Dropping `tx` on any early return rolls everything back.
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    run.advance(RestorePhase::Clearing);
    for spec in family::clear_order() {
        let removed = bulk::delete_all(&tx, spec)?;
        tracing::debug!(table = spec.table, removed, "Cleared table");
    }

    run.advance(RestorePhase::Reloading);
    let mut report = RestoreReport { archive_id, ..Default::default() };
    let mut loaded: HashMap<&'static str, HashSet<i64>> = HashMap::new();
    let mut restored_files = Vec::new();

    for spec in family::reload_order() {
        let rows = read_exported_rows(root, spec)?;
        let mut ids = HashSet::with_capacity(rows.len());
        for row in &rows {
            match prepare_row(spec, row, &loaded)? {
                PreparedRow::Insert { id, values } => {
                    bulk::insert_row(&tx, spec, &values)?;
                    ids.insert(id);
                }
                PreparedRow::Skip(reason) => {
                    tracing::warn!(table = spec.table, "Skipping row: {}", reason);
                    report.skipped_rows += 1;
                }
            }
        }
        if spec.table == "arquivos" {
            restored_files = rows
                .iter()
                .filter_map(|row| row.as_object().and_then(FileRef::from_row))
                .filter(|file| ids.contains(&file.id))
                .collect();
        }
        report.restored.insert(spec.export_name.to_string(), ids.len());
        loaded.insert(spec.table, ids);
    }

    run.advance(RestorePhase::Relinking);
    let mut swap = PayloadSwap::new(&config.uploads_dir)?;
    let (relinked, missing) = relink_payloads(
        &tx,
        &root.join(PAYLOAD_DIR),
        &mut swap,
        &restored_files,
        staged_names.as_ref(),
    )?;
    report.payloads_relinked = relinked;
    report.payloads_missing = missing;

    swap.apply()?;
    let finished = audit_log::append(
        &tx,
        AuditCategory::Action,
        Severity::Warning,
        &format!("Backup {} restored successfully", record.name),
        requested_by,
    )
    .map_err(BackupError::from)
    .and_then(|_| tx.commit().map_err(BackupError::from));
    if let Err(e) = finished {
        swap.revert();
        return Err(e);
    }
    run.advance(RestorePhase::Committed);
    Ok(report)
}

/// Extracts every traversal-safe entry of `archive` under `dest`.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<usize> {
    let mut zip = ZipArchive::new(BufReader::new(File::open(archive)?))?;

    let mut extracted = 0;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            tracing::warn!(entry = entry.name(), "Skipping archive entry outside the archive root");
            continue;
        };
        let out = dest.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = File::create(&out)?;
        io::copy(&mut entry, &mut writer)?;
        extracted += 1;
    }
    Ok(extracted)
}

fn read_exported_rows(root: &Path, spec: &TableSpec) -> Result<Vec<Value>> {
    let path = root.join(spec.archive_path());
    if !path.is_file() {
        tracing::warn!(table = spec.table, "{} missing from archive, restoring as empty", spec.archive_path());
        return Ok(Vec::new());
    }
    serde_json::from_slice(&fs::read(&path)?)
        .map_err(|e| BackupError::MalformedArchive(format!("{}: {}", spec.archive_path(), e)))
}

/// Turns one exported row into insert values. Dangling optional references
/// become NULL; a dangling required reference skips the row.
fn prepare_row(
    spec: &TableSpec,
    row: &Value,
    loaded: &HashMap<&'static str, HashSet<i64>>,
) -> Result<PreparedRow> {
    let malformed = |detail: String| BackupError::MalformedArchive(format!("{}: {}", spec.export_name, detail));
    let obj = row.as_object().ok_or_else(|| malformed("row is not an object".into()))?;

    let mut values = Vec::with_capacity(spec.columns.len());
    for column in spec.columns {
        let raw = obj.get(column.name).unwrap_or(&Value::Null);
        let mut value = bulk::json_to_sql(column, raw)
            .map_err(|e| malformed(format!("{}: {}", column.name, e)))?;

        let dangling = match (column.references, &value) {
            (Some(fk), Some(SqlValue::Integer(target)))
                if !loaded.get(fk.table).is_some_and(|ids| ids.contains(target)) =>
            {
                Some((fk.table, *target))
            }
            _ => None,
        };
        if let Some((target_table, target_id)) = dangling {
            if !column.nullable {
                return Ok(PreparedRow::Skip(format!(
                    "{} references missing {} {}",
                    column.name, target_table, target_id
                )));
            }
            tracing::debug!(table = spec.table, column = column.name, target_id, "Nulling dangling reference");
            value = None;
        }

        match value {
            Some(v) => values.push(v),
            None if column.nullable => values.push(SqlValue::Null),
            None => return Err(malformed(format!("{} must not be null", column.name))),
        }
    }

    match values.first() {
        Some(SqlValue::Integer(id)) => Ok(PreparedRow::Insert { id: *id, values }),
        _ => Err(malformed("row has no integer id".into())),
    }
}

/// Where a file row's payload sits under `arquivos/`. With a name map only
/// its (traversal-safe) entries count; without one the owner and basename
/// decide.
fn staged_name(file: &FileRef, staged_names: Option<&BTreeMap<i64, String>>) -> Option<String> {
    let Some(names) = staged_names else {
        return file.key().map(|key| key.relative_name());
    };
    let name = names.get(&file.id)?;
    if !payload::is_safe_relative(name) {
        tracing::warn!(file_id = file.id, name = %name, "Ignoring unsafe payload name in manifest");
        return None;
    }
    Some(name.clone())
}

/// Stages payloads for the swap into the live upload root and points the
/// rows at their final location. Rows without a staged payload keep their
/// exported path.
fn relink_payloads(
    conn: &Connection,
    staged_root: &Path,
    swap: &mut PayloadSwap,
    files: &[FileRef],
    staged_names: Option<&BTreeMap<i64, String>>,
) -> Result<(usize, usize)> {
    let mut relinked = 0;
    let mut missing = 0;
    let mut scheduled: HashMap<String, PathBuf> = HashMap::new();
    for file in files {
        let Some(name) = staged_name(file, staged_names) else {
            missing += 1;
            continue;
        };

        let dest = match scheduled.get(&name) {
            Some(dest) => dest.clone(),
            None => {
                let staged = staged_root.join(&name);
                if !staged.is_file() {
                    missing += 1;
                    continue;
                }
                let dest = swap
                    .stage(&staged, Path::new(&name))
                    .map_err(|source| BackupError::PayloadCopy { path: staged.clone(), source })?;
                scheduled.insert(name, dest.clone());
                dest
            }
        };
        file_meta::update_storage_path(conn, file.id, &dest.to_string_lossy())?;
        relinked += 1;
    }
    Ok((relinked, missing))
}

//! Archive Packager: export, collect payloads, zip, register.

use crate::config::AppConfig;
use crate::db::connection::DbPool;
use crate::error::{BackupError, Result};
use crate::models::archive::{self, ArchiveKind, ArchiveRecord, ArchiveStatus, NewArchiveRecord};
use crate::models::audit_log::{self, AuditCategory, Severity};
use crate::services::exporter;
use crate::services::manifest::{ArchiveManifest, FORMAT_VERSION};
use crate::services::payload::{self, CollectReport, FileRef};
use crate::utils::time;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Directory of staged payloads inside an archive.
pub const PAYLOAD_DIR: &str = "arquivos";

const NAME_MIN_CHARS: usize = 3;
const NAME_MAX_CHARS: usize = 255;

#[derive(Debug, Clone)]
pub struct CreateArchiveRequest {
    pub name: String,
    pub description: Option<String>,
    pub kind: ArchiveKind,
    pub include_payloads: bool,
    pub requested_by: Option<i64>,
}

struct BuiltArchive {
    path: PathBuf,
    size: u64,
}

pub fn create_archive(pool: &DbPool, config: &AppConfig, req: &CreateArchiveRequest) -> Result<ArchiveRecord> {
    let name = validate_name(&req.name)?;
    let started = Utc::now();
    let created_at = time::to_rfc3339(&started);
    let description = req.description.as_deref().map(str::trim).filter(|d| !d.is_empty());

    let mut conn = pool.get()?;
    tracing::info!(name = %name, kind = %req.kind, include_payloads = req.include_payloads, "Creating archive");

    let built = match build_archive(&mut conn, config, req, &name, &started) {
        Ok(built) => built,
        Err(e) => {
            tracing::error!(name = %name, error = %e, "Archive creation failed");
            let failed = NewArchiveRecord {
                name: &name,
                description,
                storage_path: None,
                size_bytes: 0,
                kind: req.kind,
                status: ArchiveStatus::Failed,
                created_at: &created_at,
                created_by: req.requested_by,
            };
            if let Err(record_err) = archive::record(&conn, &failed) {
                tracing::warn!(error = %record_err, "Failed to record failed archive attempt");
            }
            audit_log::append_or_warn(
                &conn,
                AuditCategory::Error,
                Severity::Error,
                &format!("Failed to create backup {}: {}", name, e),
                req.requested_by,
            );
            return Err(e);
        }
    };

    let storage_path = built.path.to_string_lossy().to_string();
    let recorded = record_success(&mut conn, &name, description, &storage_path, &built, req, &created_at);
    match recorded {
        Ok(record) => {
            tracing::info!(
                archive_id = record.id,
                path = %storage_path,
                size_bytes = built.size,
                "Archive created"
            );
            Ok(record)
        }
        Err(e) => {
            // An unregistered archive is unusable; do not leave it behind.
            remove_or_warn(&built.path);
            Err(e)
        }
    }
}

fn record_success(
    conn: &mut Connection,
    name: &str,
    description: Option<&str>,
    storage_path: &str,
    built: &BuiltArchive,
    req: &CreateArchiveRequest,
    created_at: &str,
) -> Result<ArchiveRecord> {
    let tx = conn.transaction()?;
    let record = archive::record(
        &tx,
        &NewArchiveRecord {
            name,
            description,
            storage_path: Some(storage_path),
            size_bytes: built.size as i64,
            kind: req.kind,
            status: ArchiveStatus::Succeeded,
            created_at,
            created_by: req.requested_by,
        },
    )?;
    audit_log::append(
        &tx,
        AuditCategory::Action,
        Severity::Info,
        &format!("Backup {} created successfully", name),
        req.requested_by,
    )?;
    tx.commit()?;
    Ok(record)
}

fn build_archive(
    conn: &mut Connection,
    config: &AppConfig,
    req: &CreateArchiveRequest,
    name: &str,
    started: &DateTime<Utc>,
) -> Result<BuiltArchive> {
    fs::create_dir_all(&config.backups_dir)?;
    let staging = tempfile::Builder::new().prefix("snapshot-staging-").tempdir()?;

    // One read transaction so every family comes from the same instant.
    let sets = {
        let tx = conn.transaction()?;
        let sets = exporter::export_all(&tx)?;
        tx.commit()?;
        sets
    };
    let tables = exporter::write_sets(&sets, staging.path())?;

    let collected = if req.include_payloads {
        let files: Vec<FileRef> = sets
            .iter()
            .filter_map(|set| set.table("arquivos"))
            .flat_map(|table| table.rows.iter().filter_map(FileRef::from_row))
            .collect();
        payload::collect(&files, &staging.path().join(PAYLOAD_DIR))?
    } else {
        CollectReport::default()
    };
    let payloads = collected.copied;

    ArchiveManifest {
        format_version: FORMAT_VERSION,
        created_at: time::to_rfc3339(started),
        kind: req.kind,
        include_payloads: req.include_payloads,
        tables,
        payloads,
        payload_paths: Some(collected.staged),
    }
    .write(staging.path())?;

    let final_path = unique_archive_path(&config.backups_dir, &archive_file_stem(name, started));
    let file_name = final_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let partial = config
        .backups_dir
        .join(format!(".{}.{}.partial", file_name, Uuid::new_v4().simple()));

    let entries = match pack_directory(staging.path(), &partial)
        .and_then(|entries| fs::rename(&partial, &final_path).map(|_| entries).map_err(Into::into))
    {
        Ok(entries) => entries,
        Err(e) => {
            remove_or_warn(&partial);
            return Err(e);
        }
    };

    let size = fs::metadata(&final_path)?.len();
    if size == 0 {
        remove_or_warn(&final_path);
        return Err(BackupError::Internal(anyhow::anyhow!("archive {} is empty", final_path.display())));
    }
    tracing::debug!(entries, payloads, "Archive packed");
    Ok(BuiltArchive { path: final_path, size })
}

/// Cleanup after a failed build. A file that was never written is fine.
fn remove_or_warn(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove leftover archive file"),
    }
}

fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644)
}

/// Zips every file under `root` in file-name order, with entry names
/// relative to `root`. Returns the number of entries written.
pub fn pack_directory(root: &Path, dest: &Path) -> Result<usize> {
    let file = File::create(dest)?;
    let mut zip = ZipWriter::new(BufWriter::new(file));

    let mut entries = 0;
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| BackupError::Internal(e.into()))?;
        zip.start_file(archive_entry_name(relative), entry_options())?;
        let mut input = File::open(entry.path())?;
        io::copy(&mut input, &mut zip)?;
        entries += 1;
    }

    let mut writer = zip.finish()?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(entries)
}

/// Forward-slash entry name, independent of the host separator.
fn archive_entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

pub fn validate_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    let chars = trimmed.chars().count();
    if !(NAME_MIN_CHARS..=NAME_MAX_CHARS).contains(&chars) {
        return Err(BackupError::InvalidRequest(format!(
            "Archive name must be between {} and {} characters",
            NAME_MIN_CHARS, NAME_MAX_CHARS
        )));
    }
    Ok(trimmed.to_string())
}

/// Replaces anything but alphanumerics, `-` and `_` with `_`, so the result
/// is always a single path component.
pub fn sanitize_file_stem(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// `<name>_<YYYYmmdd_HHMMSS>`, sanitized.
pub fn archive_file_stem(name: &str, at: &DateTime<Utc>) -> String {
    format!("{}_{}", sanitize_file_stem(name), at.format("%Y%m%d_%H%M%S"))
}

fn unique_archive_path(dir: &Path, stem: &str) -> PathBuf {
    let candidate = dir.join(format!("{}.zip", stem));
    if !candidate.exists() {
        return candidate;
    }
    let suffix = Uuid::new_v4().simple().to_string();
    dir.join(format!("{}_{}.zip", stem, &suffix[..8]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{zip_entry_names, TestEnv};
    use chrono::TimeZone;

    #[test]
    fn test_name_validation() {
        assert!(validate_name("  ab ").is_err());
        assert!(validate_name(&"x".repeat(256)).is_err());
        assert_eq!(validate_name("  nightly ").unwrap(), "nightly");
    }

    #[test]
    fn test_file_stem_is_sanitized() {
        let at = Utc.with_ymd_and_hms(2024, 5, 17, 8, 9, 10).unwrap();
        assert_eq!(archive_file_stem("fim de mês", &at), "fim_de_mês_20240517_080910");
        assert_eq!(archive_file_stem("../etc/passwd", &at), "___etc_passwd_20240517_080910");
    }

    #[test]
    fn test_archive_layout_with_payloads() -> anyhow::Result<()> {
        let env = TestEnv::new()?;
        let seeded = env.seed_basic()?;

        let record = create_archive(&env.engine.db, &env.engine.config, &env.request("nightly", true))?;
        assert_eq!(record.status, ArchiveStatus::Succeeded);
        assert!(record.size_bytes > 0);

        let path = PathBuf::from(record.storage_path.as_deref().unwrap());
        assert!(path.starts_with(&env.engine.config.backups_dir));
        let names = zip_entry_names(&path)?;
        assert!(names.contains(&"data/usuarios.json".to_string()));
        assert!(names.contains(&"data/tarefas.json".to_string()));
        assert!(names.contains(&"manifest.json".to_string()));

        let payloads: Vec<_> = names.iter().filter(|n| n.starts_with("arquivos/")).cloned().collect();
        let owner = seeded.user_ids[0];
        let mut expected: Vec<_> = seeded
            .payload_basenames
            .iter()
            .map(|b| format!("arquivos/user_{}/{}", owner, b))
            .collect();
        expected.sort();
        assert_eq!(payloads, expected);

        // entries come out in walk order
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        Ok(())
    }

    #[test]
    fn test_partial_without_payloads() -> anyhow::Result<()> {
        let env = TestEnv::new()?;
        env.seed_basic()?;
        let mut req = env.request("metadata only", false);
        req.kind = ArchiveKind::Partial;

        let record = create_archive(&env.engine.db, &env.engine.config, &req)?;
        assert_eq!(record.kind, ArchiveKind::Partial);
        let names = zip_entry_names(Path::new(record.storage_path.as_deref().unwrap()))?;
        assert!(names.iter().all(|n| !n.starts_with("arquivos/")));
        // every family is still exported
        assert!(names.contains(&"data/arquivos.json".to_string()));
        assert!(names.contains(&"data/configuracoes.json".to_string()));
        Ok(())
    }

    #[test]
    fn test_missing_source_file_still_succeeds() -> anyhow::Result<()> {
        let env = TestEnv::new()?;
        let seeded = env.seed_basic()?;
        fs::remove_file(&seeded.payload_paths[0])?;

        let record = create_archive(&env.engine.db, &env.engine.config, &env.request("partial loss", true))?;
        assert_eq!(record.status, ArchiveStatus::Succeeded);

        let path = PathBuf::from(record.storage_path.unwrap());
        let names = zip_entry_names(&path)?;
        let payloads: Vec<_> = names.iter().filter(|n| n.starts_with("arquivos/")).collect();
        assert_eq!(payloads.len(), seeded.payload_paths.len() - 1);

        let rows: Vec<serde_json::Value> =
            serde_json::from_slice(&crate::testutil::zip_entry(&path, "data/arquivos.json")?)?;
        assert_eq!(rows.len(), seeded.file_ids.len());
        Ok(())
    }

    #[test]
    fn test_export_failure_records_failed_attempt() -> anyhow::Result<()> {
        let env = TestEnv::new()?;
        env.seed_basic()?;
        env.engine.db.get()?.execute_batch("DROP TABLE comentarios_tarefas")?;

        let err = create_archive(&env.engine.db, &env.engine.config, &env.request("broken", true)).unwrap_err();
        assert!(matches!(err, BackupError::Export { .. }));

        let conn = env.engine.db.get()?;
        let records = archive::find_all(&conn)?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, ArchiveStatus::Failed);
        assert!(records[0].storage_path.is_none());

        // nothing usable (or partial) is left in the backup directory
        let leftovers: Vec<_> = fs::read_dir(&env.engine.config.backups_dir)?.collect();
        assert!(leftovers.is_empty());

        let audit = audit_log::find_recent(&conn, 1)?;
        assert_eq!(audit[0].category, "error");
        Ok(())
    }

    #[test]
    fn test_invalid_name_records_nothing() -> anyhow::Result<()> {
        let env = TestEnv::new()?;
        let err = create_archive(&env.engine.db, &env.engine.config, &env.request("x", true)).unwrap_err();
        assert!(matches!(err, BackupError::InvalidRequest(_)));
        assert!(archive::find_all(&*env.engine.db.get()?)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_cleanup_tolerates_missing_and_removes_present() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let leftover = temp.path().join(".nightly.zip.partial");
        fs::write(&leftover, b"half")?;
        remove_or_warn(&leftover);
        assert!(!leftover.exists());
        // second call hits NotFound and stays quiet
        remove_or_warn(&leftover);

        // a directory in the way is reported, not removed
        let blocker = temp.path().join("blocked.zip");
        fs::create_dir_all(blocker.join("inner"))?;
        remove_or_warn(&blocker);
        assert!(blocker.is_dir());
        Ok(())
    }

    #[test]
    fn test_same_second_names_do_not_collide() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let first = unique_archive_path(temp.path(), "nightly_20240101_000000");
        fs::write(&first, b"zip")?;
        let second = unique_archive_path(temp.path(), "nightly_20240101_000000");
        assert_ne!(first, second);
        Ok(())
    }
}

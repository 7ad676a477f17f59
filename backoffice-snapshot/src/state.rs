use crate::config::AppConfig;
use crate::db::connection::{create_pool, DbPool};
use crate::db::migrate::migrate;
use crate::error::{BackupError, Result};
use crate::models::archive::{self, ArchiveRecord, ArchiveStatus};
use crate::models::audit_log::{self, AuditCategory, AuditEntry, Severity};
use crate::services::packager::{self, CreateArchiveRequest};
use crate::services::restore::{self, RestoreReport};
use crate::services::retention::{self, PruneReport};
use crate::utils::time;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};

/// Entry point for every snapshot operation.
///
/// Backups take the maintenance lock shared and a restore takes it
/// exclusively, so a restore never overlaps a backup or another restore.
/// Contention is reported as [`BackupError::Busy`] rather than waited out.
pub struct SnapshotEngine {
    pub db: DbPool,
    pub config: AppConfig,
    maintenance: RwLock<()>,
}

/// A finished archive ready to hand to a client.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveDownload {
    pub path: PathBuf,
    pub download_name: String,
}

impl SnapshotEngine {
    pub fn new(db: DbPool, config: AppConfig) -> Self {
        Self { db, config, maintenance: RwLock::new(()) }
    }

    /// Creates the instance directories, opens the pool and migrates.
    pub fn open(config: AppConfig) -> anyhow::Result<Self> {
        config.ensure_dirs()?;
        let db = create_pool(&config.db_path, config.db_pool_size)?;
        migrate(&db)?;
        Ok(Self::new(db, config))
    }

    fn shared(&self) -> Result<RwLockReadGuard<'_, ()>> {
        match self.maintenance.try_read() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => Err(BackupError::Busy),
        }
    }

    fn exclusive(&self) -> Result<RwLockWriteGuard<'_, ()>> {
        match self.maintenance.try_write() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => Err(BackupError::Busy),
        }
    }

    pub fn create_archive(&self, req: &CreateArchiveRequest) -> Result<ArchiveRecord> {
        let _guard = self.shared()?;
        packager::create_archive(&self.db, &self.config, req)
    }

    pub fn restore(&self, archive_id: i64, requested_by: Option<i64>) -> Result<RestoreReport> {
        let _guard = self.exclusive()?;
        restore::restore(&self.db, &self.config, archive_id, requested_by)
    }

    pub fn list_archives(&self) -> Result<Vec<ArchiveRecord>> {
        let conn = self.db.get()?;
        Ok(archive::find_all(&conn)?)
    }

    pub fn get_archive(&self, archive_id: i64) -> Result<ArchiveRecord> {
        let conn = self.db.get()?;
        archive::find_by_id(&conn, archive_id)?.ok_or(BackupError::NotFound(archive_id))
    }

    /// Deletes the archive file, then its registry entry.
    pub fn delete_archive(&self, archive_id: i64, requested_by: Option<i64>) -> Result<()> {
        let _guard = self.shared()?;
        let conn = self.db.get()?;
        let record = archive::find_by_id(&conn, archive_id)?.ok_or(BackupError::NotFound(archive_id))?;

        if let Err(e) = retention::remove_archive(&conn, &record) {
            tracing::error!(archive_id, error = %e, "Failed to delete archive");
            audit_log::append_or_warn(
                &conn,
                AuditCategory::Error,
                Severity::Error,
                &format!("Failed to delete backup {}: {}", record.name, e),
                requested_by,
            );
            return Err(e);
        }

        tracing::info!(archive_id, name = %record.name, "Archive deleted");
        audit_log::append_or_warn(
            &conn,
            AuditCategory::Action,
            Severity::Info,
            &format!("Backup {} deleted", record.name),
            requested_by,
        );
        Ok(())
    }

    /// Resolves a succeeded archive to its file and a client-facing name.
    pub fn download_archive(&self, archive_id: i64, requested_by: Option<i64>) -> Result<ArchiveDownload> {
        let record = self.get_archive(archive_id)?;
        if record.status != ArchiveStatus::Succeeded {
            return Err(BackupError::NotRestorable(archive_id));
        }
        let path = PathBuf::from(record.storage_path.as_deref().unwrap_or_default());
        if !path.is_file() {
            return Err(BackupError::ArchiveMissing(path));
        }

        let stamp = time::parse_timestamp(&record.created_at).unwrap_or_else(Utc::now);
        // record names are free text; the download name must stay one path component
        let download_name = format!("{}.zip", packager::archive_file_stem(&record.name, &stamp));

        let conn = self.db.get()?;
        audit_log::append_or_warn(
            &conn,
            AuditCategory::Action,
            Severity::Info,
            &format!("Backup {} downloaded", record.name),
            requested_by,
        );
        Ok(ArchiveDownload { path, download_name })
    }

    pub fn prune(&self, now: DateTime<Utc>) -> Result<PruneReport> {
        let _guard = self.shared()?;
        retention::prune(&self.db, &self.config, now)
    }

    pub fn recent_audit(&self, limit: i64) -> Result<Vec<AuditEntry>> {
        let conn = self.db.get()?;
        Ok(audit_log::find_recent(&conn, limit)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::setting;
    use crate::testutil::TestEnv;

    #[test]
    fn test_backup_then_restore_through_engine() -> anyhow::Result<()> {
        let env = TestEnv::new()?;
        env.seed_basic()?;
        let engine = &env.engine;

        let record = engine.create_archive(&env.request("semanal", true))?;
        setting::set(&*engine.db.get()?, "smtp.host", "changed.example.org", "string", "email")?;

        let report = engine.restore(record.id, Some(1))?;
        assert_eq!(report.restored["configuracoes"], 1);
        let conn = engine.db.get()?;
        assert_eq!(setting::get(&conn, "smtp.host")?.as_deref(), Some("mail.serra.edu.br"));
        assert_eq!(setting::get_all(&conn)?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_restore_is_refused_while_backup_runs() -> anyhow::Result<()> {
        let env = TestEnv::new()?;
        env.seed_basic()?;
        let record = env.engine.create_archive(&env.request("semanal", false))?;

        let backup_running = env.engine.maintenance.read().unwrap();
        assert!(matches!(env.engine.restore(record.id, None), Err(BackupError::Busy)));
        // concurrent backups are fine
        assert!(env.engine.create_archive(&env.request("paralelo", false)).is_ok());
        drop(backup_running);

        let restore_running = env.engine.maintenance.write().unwrap();
        assert!(matches!(
            env.engine.create_archive(&env.request("durante", false)),
            Err(BackupError::Busy)
        ));
        drop(restore_running);
        Ok(())
    }

    #[test]
    fn test_failed_archive_is_not_restorable() -> anyhow::Result<()> {
        let env = TestEnv::new()?;
        env.seed_basic()?;
        env.engine.db.get()?.execute_batch("DROP TABLE arquivos_tarefas")?;
        assert!(env.engine.create_archive(&env.request("quebrado", true)).is_err());

        let failed = env.engine.list_archives()?.remove(0);
        assert_eq!(failed.status, ArchiveStatus::Failed);
        assert!(matches!(
            env.engine.restore(failed.id, None),
            Err(BackupError::NotRestorable(id)) if id == failed.id
        ));
        assert!(matches!(
            env.engine.download_archive(failed.id, None),
            Err(BackupError::NotRestorable(_))
        ));
        Ok(())
    }

    #[test]
    fn test_delete_removes_file_then_row() -> anyhow::Result<()> {
        let env = TestEnv::new()?;
        env.seed_basic()?;
        let record = env.engine.create_archive(&env.request("descartavel", false))?;
        let path = PathBuf::from(record.storage_path.clone().unwrap());
        assert!(path.exists());

        env.engine.delete_archive(record.id, Some(1))?;
        assert!(!path.exists());
        assert!(matches!(env.engine.get_archive(record.id), Err(BackupError::NotFound(_))));
        assert!(matches!(env.engine.delete_archive(record.id, None), Err(BackupError::NotFound(_))));

        let audit = env.engine.recent_audit(1)?;
        assert_eq!(audit[0].message, "Backup descartavel deleted");
        Ok(())
    }

    #[test]
    fn test_download_name_and_audit() -> anyhow::Result<()> {
        let env = TestEnv::new()?;
        env.seed_basic()?;
        let record = env.engine.create_archive(&env.request("mensal", false))?;

        let download = env.engine.download_archive(record.id, Some(1))?;
        assert_eq!(download.path, PathBuf::from(record.storage_path.as_deref().unwrap()));
        let stamp = time::parse_timestamp(&record.created_at).unwrap();
        assert_eq!(download.download_name, format!("mensal_{}.zip", stamp.format("%Y%m%d_%H%M%S")));
        assert_eq!(env.engine.recent_audit(1)?[0].actor_id, Some(1));

        std::fs::remove_file(&download.path)?;
        assert!(matches!(
            env.engine.download_archive(record.id, None),
            Err(BackupError::ArchiveMissing(_))
        ));
        Ok(())
    }

    #[test]
    fn test_download_name_cannot_escape_target_dir() -> anyhow::Result<()> {
        let env = TestEnv::new()?;
        env.seed_basic()?;
        let record = env.engine.create_archive(&env.request("../../../tmp/evil", false))?;
        assert_eq!(record.name, "../../../tmp/evil");

        let download = env.engine.download_archive(record.id, None)?;
        let name = download.download_name.as_str();
        assert!(!name.contains('/') && !name.contains('\\'));
        assert!(name.starts_with("_________tmp_evil_"));
        assert!(name.ends_with(".zip"));

        let target = tempfile::TempDir::new()?;
        let dest = target.path().join(name);
        assert_eq!(dest.parent(), Some(target.path()));
        assert_eq!(std::path::Path::new(name).components().count(), 1);
        Ok(())
    }

    #[test]
    fn test_open_creates_layout() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let config = AppConfig::for_instance_dir(&temp.path().join("fresh"));
        let engine = SnapshotEngine::open(config)?;
        assert!(engine.config.backups_dir.is_dir());
        assert!(engine.config.db_path.exists());
        assert!(engine.list_archives()?.is_empty());
        Ok(())
    }
}

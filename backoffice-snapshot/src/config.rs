use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub instance_dir: PathBuf,
    pub db_path: PathBuf,
    pub uploads_dir: PathBuf,
    pub backups_dir: PathBuf,
    pub retention_days: i64,
    pub db_pool_size: u32,
    pub log_level: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let instance_dir = PathBuf::from(
            std::env::var("INSTANCE_DIR").unwrap_or_else(|_| "instance".into()),
        );
        let mut config = Self::for_instance_dir(&instance_dir);

        if let Ok(path) = std::env::var("DATABASE_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("UPLOAD_FOLDER") {
            config.uploads_dir = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("BACKUP_DIR") {
            config.backups_dir = PathBuf::from(path);
        }
        config.retention_days = std::env::var("BACKUP_RETENTION_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(config.retention_days);
        config.db_pool_size = std::env::var("DB_POOL_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(config.db_pool_size);
        config.log_level = std::env::var("LOG_LEVEL").unwrap_or(config.log_level);

        config
    }

    /// Default layout rooted at `instance_dir`, ignoring the environment.
    pub fn for_instance_dir(instance_dir: &Path) -> Self {
        Self {
            instance_dir: instance_dir.to_path_buf(),
            db_path: instance_dir.join("serra_consultoria.db"),
            uploads_dir: instance_dir.join("uploads"),
            backups_dir: instance_dir.join("backups"),
            retention_days: 30,
            db_pool_size: 4,
            log_level: "info".into(),
        }
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.instance_dir)?;
        std::fs::create_dir_all(&self.uploads_dir)?;
        std::fs::create_dir_all(&self.backups_dir)?;
        if let Some(parent) = self.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

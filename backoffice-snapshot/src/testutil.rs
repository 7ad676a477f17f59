//! Shared fixtures for unit tests: a migrated database in a temp directory
//! and a small, fully linked back-office dataset.

use crate::config::AppConfig;
use crate::db::bulk::{self, ExportedRow};
use crate::db::connection::{create_pool, DbPool};
use crate::db::migrate::migrate;
use crate::models::archive::{self, ArchiveKind, ArchiveRecord, ArchiveStatus, NewArchiveRecord};
use crate::models::family;
use crate::models::file_meta::{self, CreateFileData};
use crate::models::identity::{self, CreateUserData, User};
use crate::models::setting;
use crate::models::task::{self, CreateTaskData};
use crate::services::packager::CreateArchiveRequest;
use crate::state::SnapshotEngine;
use crate::utils::time;
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

pub struct TestEnv {
    _temp: TempDir,
    pub engine: SnapshotEngine,
}

pub struct Seeded {
    pub user_ids: Vec<i64>,
    pub task_ids: Vec<i64>,
    pub file_ids: Vec<i64>,
    pub payload_paths: Vec<PathBuf>,
    pub payload_basenames: Vec<String>,
}

impl TestEnv {
    pub fn new() -> anyhow::Result<Self> {
        let temp = TempDir::new()?;
        let config = AppConfig::for_instance_dir(&temp.path().join("instance"));
        config.ensure_dirs()?;
        let db = create_pool(&config.db_path, 2)?;
        migrate(&db)?;
        Ok(Self { _temp: temp, engine: SnapshotEngine::new(db, config) })
    }

    pub fn request(&self, name: &str, include_payloads: bool) -> CreateArchiveRequest {
        CreateArchiveRequest {
            name: name.to_string(),
            description: Some("test archive".into()),
            kind: ArchiveKind::Full,
            include_payloads,
            requested_by: Some(1),
        }
    }

    pub fn create_user(&self, conn: &Connection, email: &str, username: &str) -> anyhow::Result<User> {
        identity::create_user(
            conn,
            &CreateUserData {
                full_name: username,
                email,
                username,
                password_hash: "pbkdf2:sha256$abc",
                salt: "s4lt",
                user_type: "consultor",
                status: "ativo",
            },
        )
    }

    /// Three users, a profile, two uploaded files under the upload root,
    /// five tasks with subtasks, a comment, an attachment and a setting.
    pub fn seed_basic(&self) -> anyhow::Result<Seeded> {
        let conn = self.engine.db.get()?;

        let admin = identity::create_user(
            &conn,
            &CreateUserData {
                full_name: "Ana Admin",
                email: "ana@serra.edu.br",
                username: "ana",
                password_hash: "pbkdf2:sha256$ana",
                salt: "a1",
                user_type: "admin",
                status: "ativo",
            },
        )?;
        identity::record_login(&conn, admin.id)?;
        let consultant = self.create_user(&conn, "bruno@serra.edu.br", "bruno")?;
        let manager = identity::create_user(
            &conn,
            &CreateUserData {
                full_name: "Carla Gestora",
                email: "carla@serra.edu.br",
                username: "carla",
                password_hash: "pbkdf2:sha256$carla",
                salt: "c3",
                user_type: "gestor",
                status: "pendente",
            },
        )?;
        let user_ids = vec![admin.id, consultant.id, manager.id];

        identity::create_profile(
            &conn,
            admin.id,
            Some("Coordenadora"),
            Some(&serde_json::json!({ "tema": "escuro" })),
        )?;
        setting::set(&conn, "smtp.host", "mail.serra.edu.br", "string", "email")?;

        let owner_dir = self.engine.config.uploads_dir.join(format!("user_{}", admin.id));
        fs::create_dir_all(&owner_dir)?;
        let mut file_ids = Vec::new();
        let mut payload_paths = Vec::new();
        let mut payload_basenames = Vec::new();
        for (basename, body) in [("plano_aula_1a2b.pdf", &b"%PDF-1.4 plano"[..]), ("notas_3c4d.txt", &b"notas"[..])] {
            let path = owner_dir.join(basename);
            fs::write(&path, body)?;
            let ext = basename.rsplit('.').next().unwrap_or_default();
            let stored = file_meta::create(
                &conn,
                &CreateFileData {
                    name: basename,
                    mime_type: if ext == "pdf" { "application/pdf" } else { "text/plain" },
                    extension: ext,
                    size: body.len() as i64,
                    storage_path: &path.to_string_lossy(),
                    owner_id: admin.id,
                },
            )?;
            file_ids.push(stored.id);
            payload_paths.push(path);
            payload_basenames.push(basename.to_string());
        }

        let classifications = ["urgencia", "importancia", "rotina", "pausa", "rotina"];
        let mut task_ids = Vec::new();
        for (i, classification) in classifications.iter().enumerate() {
            let created = task::create_task(
                &conn,
                &CreateTaskData {
                    title: &format!("Tarefa {}", i + 1),
                    description: (i % 2 == 0).then_some("Revisar material"),
                    classification: *classification,
                    priority: "media",
                    due_at: Some("2024-06-30T18:00:00+00:00"),
                    owner_id: admin.id,
                    assignee_id: Some(user_ids[i % user_ids.len()]),
                },
            )?;
            task_ids.push(created.id);
        }
        task::complete_task(&conn, task_ids[0])?;
        task::create_subtask(&conn, task_ids[0], "Separar apostilas")?;
        task::create_subtask(&conn, task_ids[1], "Agendar reunião")?;
        task::create_subtask(&conn, task_ids[1], "Enviar ata")?;
        task::create_comment(&conn, task_ids[1], consultant.id, "Reunião confirmada")?;
        task::attach_file(&conn, task_ids[0], file_ids[0])?;
        task::attach_file(&conn, task_ids[1], file_ids[1])?;

        Ok(Seeded { user_ids, task_ids, file_ids, payload_paths, payload_basenames })
    }

    /// Registers another environment's archive file in this registry.
    pub fn register_archive(&self, source: &ArchiveRecord) -> anyhow::Result<ArchiveRecord> {
        let path = source
            .storage_path
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("archive {} has no file", source.id))?;
        self.register_path(Path::new(path), &source.name)
    }

    pub fn register_path(&self, path: &Path, name: &str) -> anyhow::Result<ArchiveRecord> {
        let conn = self.engine.db.get()?;
        archive::record(
            &conn,
            &NewArchiveRecord {
                name,
                description: None,
                storage_path: Some(&path.to_string_lossy()),
                size_bytes: fs::metadata(path)?.len() as i64,
                kind: ArchiveKind::Full,
                status: ArchiveStatus::Succeeded,
                created_at: &time::now_rfc3339(),
                created_by: None,
            },
        )
    }
}

/// Exported form of every snapshot table, keyed by table name.
pub fn snapshot_tables(pool: &DbPool) -> anyhow::Result<BTreeMap<String, Vec<ExportedRow>>> {
    let conn = pool.get()?;
    family::reload_order()
        .map(|spec| Ok((spec.table.to_string(), bulk::read_all(&conn, spec)?)))
        .collect()
}

pub fn zip_entry_names(path: &Path) -> anyhow::Result<Vec<String>> {
    let mut zip = ZipArchive::new(File::open(path)?)?;
    let mut names = Vec::with_capacity(zip.len());
    for i in 0..zip.len() {
        names.push(zip.by_index(i)?.name().to_string());
    }
    Ok(names)
}

pub fn zip_entry(path: &Path, name: &str) -> anyhow::Result<Vec<u8>> {
    let mut zip = ZipArchive::new(File::open(path)?)?;
    let mut entry = zip.by_name(name)?;
    let mut buf = Vec::new();
    entry.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Copies `src` to `dest`, swapping in new contents for the named entries.
pub fn rewrite_zip(src: &Path, dest: &Path, replacements: &[(&str, Vec<u8>)]) -> anyhow::Result<()> {
    let mut input = ZipArchive::new(File::open(src)?)?;
    let mut output = ZipWriter::new(File::create(dest)?);
    for i in 0..input.len() {
        let mut entry = input.by_index(i)?;
        let name = entry.name().to_string();
        let body = match replacements.iter().find(|(n, _)| *n == name) {
            Some((_, body)) => body.clone(),
            None => {
                let mut buf = Vec::new();
                entry.read_to_end(&mut buf)?;
                buf
            }
        };
        output.start_file(name, SimpleFileOptions::default())?;
        output.write_all(&body)?;
    }
    output.finish()?;
    Ok(())
}

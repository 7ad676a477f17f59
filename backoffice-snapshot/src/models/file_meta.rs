use crate::utils::time;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

/// Metadata of an uploaded file. The bytes live under the upload root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFile {
    pub id: i64,
    pub name: String,
    pub mime_type: String,
    pub extension: String,
    pub size: i64,
    pub storage_path: String,
    pub content_hash: Option<String>,
    pub description: Option<String>,
    pub owner_id: i64,
    pub public: bool,
    pub uploaded_at: String,
    pub updated_at: String,
}

pub struct CreateFileData<'a> {
    pub name: &'a str,
    pub mime_type: &'a str,
    pub extension: &'a str,
    pub size: i64,
    pub storage_path: &'a str,
    pub owner_id: i64,
}

fn row_to_file(row: &Row) -> rusqlite::Result<StoredFile> {
    Ok(StoredFile {
        id: row.get("id")?,
        name: row.get("nome")?,
        mime_type: row.get("tipo")?,
        extension: row.get("extensao")?,
        size: row.get("tamanho")?,
        storage_path: row.get("caminho")?,
        content_hash: row.get("hash_conteudo")?,
        description: row.get("descricao")?,
        owner_id: row.get("usuario_id")?,
        public: row.get("publico")?,
        uploaded_at: row.get("data_upload")?,
        updated_at: row.get("data_atualizacao")?,
    })
}

pub fn find_all(conn: &Connection) -> anyhow::Result<Vec<StoredFile>> {
    let mut stmt = conn.prepare("SELECT * FROM arquivos ORDER BY id")?;
    let rows = stmt.query_map([], row_to_file)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn find_by_id(conn: &Connection, id: i64) -> anyhow::Result<Option<StoredFile>> {
    let mut stmt = conn.prepare("SELECT * FROM arquivos WHERE id = ?")?;
    let mut rows = stmt.query_map(params![id], row_to_file)?;
    Ok(rows.next().transpose()?)
}

pub fn create(conn: &Connection, data: &CreateFileData) -> anyhow::Result<StoredFile> {
    let now = time::now_rfc3339();
    conn.execute(
        "INSERT INTO arquivos (nome, tipo, extensao, tamanho, caminho, usuario_id, data_upload, data_atualizacao)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            data.name,
            data.mime_type,
            data.extension,
            data.size,
            data.storage_path,
            data.owner_id,
            now,
            now,
        ],
    )?;
    let id = conn.last_insert_rowid();
    find_by_id(conn, id)?.ok_or_else(|| anyhow::anyhow!("Failed to retrieve created file"))
}

/// Points a file row at a new physical location. Leaves `data_atualizacao`
/// alone so a restored row keeps its exported timestamps.
pub fn update_storage_path(conn: &Connection, id: i64, storage_path: &str) -> anyhow::Result<bool> {
    let changes = conn.execute(
        "UPDATE arquivos SET caminho = ? WHERE id = ?",
        params![storage_path, id],
    )?;
    Ok(changes > 0)
}

use crate::utils::time;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

// ── User ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub full_name: String,
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub salt: String,
    pub user_type: String,
    pub status: String,
    pub last_login: Option<String>,
    pub login_attempts: i64,
    pub created_at: String,
    pub updated_at: String,
}

pub struct CreateUserData<'a> {
    pub full_name: &'a str,
    pub email: &'a str,
    pub username: &'a str,
    pub password_hash: &'a str,
    pub salt: &'a str,
    pub user_type: &'a str,
    pub status: &'a str,
}

fn row_to_user(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get("id")?,
        full_name: row.get("nome_completo")?,
        email: row.get("email")?,
        username: row.get("username")?,
        password_hash: row.get("senha_hash")?,
        salt: row.get("salt")?,
        user_type: row.get("tipo")?,
        status: row.get("status")?,
        last_login: row.get("ultimo_login")?,
        login_attempts: row.get("tentativas_login")?,
        created_at: row.get("data_criacao")?,
        updated_at: row.get("data_atualizacao")?,
    })
}

pub fn find_all_users(conn: &Connection) -> anyhow::Result<Vec<User>> {
    let mut stmt = conn.prepare("SELECT * FROM usuarios ORDER BY id")?;
    let rows = stmt.query_map([], row_to_user)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn find_user_by_id(conn: &Connection, id: i64) -> anyhow::Result<Option<User>> {
    let mut stmt = conn.prepare("SELECT * FROM usuarios WHERE id = ?")?;
    let mut rows = stmt.query_map(params![id], row_to_user)?;
    Ok(rows.next().transpose()?)
}

pub fn create_user(conn: &Connection, data: &CreateUserData) -> anyhow::Result<User> {
    let now = time::now_rfc3339();
    conn.execute(
        "INSERT INTO usuarios (nome_completo, email, username, senha_hash, salt, tipo, status, data_criacao, data_atualizacao)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            data.full_name,
            data.email,
            data.username,
            data.password_hash,
            data.salt,
            data.user_type,
            data.status,
            now,
            now,
        ],
    )?;
    let id = conn.last_insert_rowid();
    find_user_by_id(conn, id)?.ok_or_else(|| anyhow::anyhow!("Failed to retrieve created user"))
}

pub fn record_login(conn: &Connection, id: i64) -> anyhow::Result<()> {
    let now = time::now_rfc3339();
    conn.execute(
        "UPDATE usuarios SET ultimo_login = ?1, tentativas_login = 0, data_atualizacao = ?1 WHERE id = ?2",
        params![now, id],
    )?;
    Ok(())
}

// ── Profile ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: i64,
    pub user_id: i64,
    pub phone: Option<String>,
    pub position: Option<String>,
    pub department: Option<String>,
    pub bio: Option<String>,
    pub preferences: Option<String>,
    pub updated_at: String,
}

fn row_to_profile(row: &Row) -> rusqlite::Result<Profile> {
    Ok(Profile {
        id: row.get("id")?,
        user_id: row.get("usuario_id")?,
        phone: row.get("telefone")?,
        position: row.get("cargo")?,
        department: row.get("departamento")?,
        bio: row.get("bio")?,
        preferences: row.get("preferencias")?,
        updated_at: row.get("data_atualizacao")?,
    })
}

pub fn find_all_profiles(conn: &Connection) -> anyhow::Result<Vec<Profile>> {
    let mut stmt = conn.prepare("SELECT * FROM perfis_usuarios ORDER BY id")?;
    let rows = stmt.query_map([], row_to_profile)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn create_profile(
    conn: &Connection,
    user_id: i64,
    position: Option<&str>,
    preferences: Option<&serde_json::Value>,
) -> anyhow::Result<Profile> {
    let preferences = preferences.map(serde_json::to_string).transpose()?;
    conn.execute(
        "INSERT INTO perfis_usuarios (usuario_id, cargo, preferencias, data_atualizacao) VALUES (?1, ?2, ?3, ?4)",
        params![user_id, position, preferences, time::now_rfc3339()],
    )?;
    let id = conn.last_insert_rowid();
    let mut stmt = conn.prepare("SELECT * FROM perfis_usuarios WHERE id = ?")?;
    let mut rows = stmt.query_map(params![id], row_to_profile)?;
    rows.next()
        .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created profile"))?
        .map_err(Into::into)
}

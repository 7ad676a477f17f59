//! Archive Registry: the durable catalog of backup attempts.
//!
//! Rows are written once, after the attempt has finished, and are never
//! updated. Removing the archive file is the caller's job and happens before
//! the row is deleted.

use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveKind {
    Full,
    Partial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveStatus {
    Succeeded,
    Failed,
    InProgress,
}

impl ArchiveKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveKind::Full => "full",
            ArchiveKind::Partial => "partial",
        }
    }
}

impl ArchiveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveStatus::Succeeded => "succeeded",
            ArchiveStatus::Failed => "failed",
            ArchiveStatus::InProgress => "in_progress",
        }
    }
}

impl FromStr for ArchiveKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(ArchiveKind::Full),
            "partial" => Ok(ArchiveKind::Partial),
            other => Err(anyhow::anyhow!("unknown archive kind '{}'", other)),
        }
    }
}

impl FromStr for ArchiveStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "succeeded" => Ok(ArchiveStatus::Succeeded),
            "failed" => Ok(ArchiveStatus::Failed),
            "in_progress" => Ok(ArchiveStatus::InProgress),
            other => Err(anyhow::anyhow!("unknown archive status '{}'", other)),
        }
    }
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl fmt::Display for ArchiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    /// `None` for failed attempts: there is no usable archive.
    pub storage_path: Option<String>,
    pub size_bytes: i64,
    pub kind: ArchiveKind,
    pub status: ArchiveStatus,
    pub created_at: String,
    pub created_by: Option<i64>,
}

pub struct NewArchiveRecord<'a> {
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub storage_path: Option<&'a str>,
    pub size_bytes: i64,
    pub kind: ArchiveKind,
    pub status: ArchiveStatus,
    pub created_at: &'a str,
    pub created_by: Option<i64>,
}

fn parse_column<T: FromStr<Err = anyhow::Error>>(row: &Row, idx: &str) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: anyhow::Error| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            e.into(),
        )
    })
}

fn row_to_record(row: &Row) -> rusqlite::Result<ArchiveRecord> {
    Ok(ArchiveRecord {
        id: row.get("id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        storage_path: row.get("storage_path")?,
        size_bytes: row.get("size_bytes")?,
        kind: parse_column(row, "kind")?,
        status: parse_column(row, "status")?,
        created_at: row.get("created_at")?,
        created_by: row.get("created_by")?,
    })
}

pub fn record(conn: &Connection, data: &NewArchiveRecord) -> anyhow::Result<ArchiveRecord> {
    conn.execute(
        "INSERT INTO archives (name, description, storage_path, size_bytes, kind, status, created_at, created_by)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            data.name,
            data.description,
            data.storage_path,
            data.size_bytes,
            data.kind.as_str(),
            data.status.as_str(),
            data.created_at,
            data.created_by,
        ],
    )?;
    let id = conn.last_insert_rowid();
    find_by_id(conn, id)?.ok_or_else(|| anyhow::anyhow!("Failed to retrieve recorded archive"))
}

/// Newest first.
pub fn find_all(conn: &Connection) -> anyhow::Result<Vec<ArchiveRecord>> {
    let mut stmt = conn.prepare("SELECT * FROM archives ORDER BY created_at DESC, id DESC")?;
    let rows = stmt.query_map([], row_to_record)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn find_by_id(conn: &Connection, id: i64) -> anyhow::Result<Option<ArchiveRecord>> {
    let mut stmt = conn.prepare("SELECT * FROM archives WHERE id = ?")?;
    let mut rows = stmt.query_map(params![id], row_to_record)?;
    Ok(rows.next().transpose()?)
}

pub fn find_by_status(conn: &Connection, status: ArchiveStatus) -> anyhow::Result<Vec<ArchiveRecord>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM archives WHERE status = ? ORDER BY created_at DESC, id DESC",
    )?;
    let rows = stmt.query_map(params![status.as_str()], row_to_record)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn find_created_before(conn: &Connection, cutoff: &str) -> anyhow::Result<Vec<ArchiveRecord>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM archives WHERE created_at < ? ORDER BY created_at ASC, id ASC",
    )?;
    let rows = stmt.query_map(params![cutoff], row_to_record)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Removes the catalog row only.
pub fn delete(conn: &Connection, id: i64) -> anyhow::Result<bool> {
    let changes = conn.execute("DELETE FROM archives WHERE id = ?", params![id])?;
    Ok(changes > 0)
}

//! Append-only audit trail of administrative actions.

use crate::utils::time;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Access,
    Action,
    Error,
    Security,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl AuditCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditCategory::Access => "access",
            AuditCategory::Action => "action",
            AuditCategory::Error => "error",
            AuditCategory::Security => "security",
        }
    }
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub category: String,
    pub severity: String,
    pub message: String,
    pub actor_id: Option<i64>,
    pub created_at: String,
}

fn row_to_entry(row: &Row) -> rusqlite::Result<AuditEntry> {
    Ok(AuditEntry {
        id: row.get("id")?,
        category: row.get("category")?,
        severity: row.get("severity")?,
        message: row.get("message")?,
        actor_id: row.get("actor_id")?,
        created_at: row.get("created_at")?,
    })
}

pub fn append(
    conn: &Connection,
    category: AuditCategory,
    severity: Severity,
    message: &str,
    actor_id: Option<i64>,
) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO audit_log (category, severity, message, actor_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![category.as_str(), severity.as_str(), message, actor_id, time::now_rfc3339()],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Like [`append`], but a failure to write is only logged. Used on error
/// paths where the original failure must win.
pub fn append_or_warn(
    conn: &Connection,
    category: AuditCategory,
    severity: Severity,
    message: &str,
    actor_id: Option<i64>,
) {
    if let Err(e) = append(conn, category, severity, message, actor_id) {
        tracing::warn!(error = %e, "Failed to write audit entry: {}", message);
    }
}

pub fn find_recent(conn: &Connection, limit: i64) -> anyhow::Result<Vec<AuditEntry>> {
    let mut stmt = conn.prepare("SELECT * FROM audit_log ORDER BY id DESC LIMIT ?")?;
    let rows = stmt.query_map(params![limit], row_to_entry)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestEnv;

    #[test]
    fn test_append_and_read_back() -> anyhow::Result<()> {
        let env = TestEnv::new()?;
        let conn = env.engine.db.get()?;
        append(&conn, AuditCategory::Action, Severity::Info, "first", Some(3))?;
        append(&conn, AuditCategory::Error, Severity::Error, "second", None)?;

        let entries = find_recent(&conn, 10)?;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "second");
        assert_eq!(entries[0].category, "error");
        assert_eq!(entries[1].actor_id, Some(3));
        Ok(())
    }
}

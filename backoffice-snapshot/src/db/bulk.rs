//! Whole-table operations driven by a [`TableSpec`]: read every row as a flat
//! JSON mapping, delete every row, insert one row with its original id.

use crate::models::family::{ColumnKind, ColumnSpec, TableSpec};
use crate::utils::time;
use anyhow::{anyhow, bail};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde_json::{Map, Value};

pub type ExportedRow = Map<String, Value>;

pub fn read_all(conn: &Connection, spec: &TableSpec) -> anyhow::Result<Vec<ExportedRow>> {
    let sql = format!("SELECT {} FROM {} ORDER BY id", spec.column_list(), spec.table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut mapped = Map::with_capacity(spec.columns.len());
        for (idx, column) in spec.columns.iter().enumerate() {
            let value = sql_to_json(column, row.get_ref(idx)?)
                .map_err(|e| anyhow!("{}.{}: {}", spec.table, column.name, e))?;
            mapped.insert(column.name.to_string(), value);
        }
        out.push(mapped);
    }
    Ok(out)
}

pub fn delete_all(conn: &Connection, spec: &TableSpec) -> anyhow::Result<usize> {
    Ok(conn.execute(&format!("DELETE FROM {}", spec.table), [])?)
}

pub fn insert_row(conn: &Connection, spec: &TableSpec, values: &[SqlValue]) -> anyhow::Result<()> {
    let placeholders: Vec<String> = (1..=spec.columns.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        spec.table,
        spec.column_list(),
        placeholders.join(", ")
    );
    conn.prepare_cached(&sql)?.execute(params_from_iter(values.iter()))?;
    Ok(())
}

pub fn count(conn: &Connection, spec: &TableSpec) -> anyhow::Result<i64> {
    Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {}", spec.table), [], |row| row.get(0))?)
}

fn sql_to_json(column: &ColumnSpec, value: ValueRef<'_>) -> anyhow::Result<Value> {
    let value = match (column.kind, value) {
        (_, ValueRef::Null) => Value::Null,
        (ColumnKind::Integer, ValueRef::Integer(i)) => Value::from(i),
        (ColumnKind::Bool, ValueRef::Integer(i)) => Value::Bool(i != 0),
        (ColumnKind::Timestamp, ValueRef::Text(raw)) => {
            let raw = std::str::from_utf8(raw)?;
            let canonical = time::normalize(raw)
                .ok_or_else(|| anyhow!("unparseable timestamp '{}'", raw))?;
            Value::String(canonical)
        }
        (ColumnKind::Text | ColumnKind::Enum(_), ValueRef::Text(raw)) => {
            Value::String(std::str::from_utf8(raw)?.to_string())
        }
        (kind, other) => bail!("unexpected {:?} for {:?} column", other.data_type(), kind),
    };
    Ok(value)
}

/// Converts one exported value back into its storage form.
/// `Ok(None)` means JSON null.
pub fn json_to_sql(column: &ColumnSpec, value: &Value) -> anyhow::Result<Option<SqlValue>> {
    let converted = match (column.kind, value) {
        (_, Value::Null) => return Ok(None),
        (ColumnKind::Integer, Value::Number(n)) => {
            SqlValue::Integer(n.as_i64().ok_or_else(|| anyhow!("{} is not an integer", n))?)
        }
        (ColumnKind::Bool, Value::Bool(b)) => SqlValue::Integer(*b as i64),
        (ColumnKind::Bool, Value::Number(n)) => SqlValue::Integer((n.as_i64() != Some(0)) as i64),
        (ColumnKind::Timestamp, Value::String(s)) => SqlValue::Text(
            time::normalize(s).ok_or_else(|| anyhow!("unparseable timestamp '{}'", s))?,
        ),
        (ColumnKind::Enum(allowed), Value::String(s)) => {
            if !allowed.contains(&s.as_str()) {
                bail!("'{}' is not one of {:?}", s, allowed);
            }
            SqlValue::Text(s.clone())
        }
        (ColumnKind::Text, Value::String(s)) => SqlValue::Text(s.clone()),
        (kind, other) => bail!("unexpected JSON {} for {:?} column", other, kind),
    };
    Ok(Some(converted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::family::find_table;
    use serde_json::json;

    fn column(kind: ColumnKind) -> ColumnSpec {
        ColumnSpec { name: "c", kind, nullable: true, references: None }
    }

    #[test]
    fn test_enum_must_be_declared_label() {
        let status = column(ColumnKind::Enum(&["pendente", "concluida"]));
        assert!(json_to_sql(&status, &json!("concluida")).is_ok());
        assert!(json_to_sql(&status, &json!(2)).is_err());
        assert!(json_to_sql(&status, &json!("CONCLUIDA")).is_err());
    }

    #[test]
    fn test_bool_round_trips_through_integer() -> anyhow::Result<()> {
        let flag = column(ColumnKind::Bool);
        assert_eq!(json_to_sql(&flag, &json!(true))?, Some(SqlValue::Integer(1)));
        assert_eq!(sql_to_json(&flag, ValueRef::Integer(0))?, json!(false));
        Ok(())
    }

    #[test]
    fn test_null_passes_through() -> anyhow::Result<()> {
        let ts = column(ColumnKind::Timestamp);
        assert_eq!(json_to_sql(&ts, &Value::Null)?, None);
        assert_eq!(sql_to_json(&ts, ValueRef::Null)?, Value::Null);
        Ok(())
    }

    #[test]
    fn test_read_insert_delete() -> anyhow::Result<()> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE configuracoes (id INTEGER PRIMARY KEY, chave TEXT, valor TEXT, descricao TEXT,
               tipo TEXT, categoria TEXT, data_atualizacao TEXT)",
        )?;
        let spec = find_table("configuracoes").unwrap();
        insert_row(
            &conn,
            spec,
            &[
                SqlValue::Integer(42),
                SqlValue::Text("smtp.host".into()),
                SqlValue::Text("mail.example.org".into()),
                SqlValue::Null,
                SqlValue::Text("string".into()),
                SqlValue::Text("email".into()),
                SqlValue::Text("2024-01-02 03:04:05".into()),
            ],
        )?;

        let rows = read_all(&conn, spec)?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], json!(42));
        assert_eq!(rows[0]["descricao"], Value::Null);
        assert_eq!(rows[0]["data_atualizacao"], json!("2024-01-02T03:04:05+00:00"));

        assert_eq!(delete_all(&conn, spec)?, 1);
        assert_eq!(count(&conn, spec)?, 0);
        Ok(())
    }
}

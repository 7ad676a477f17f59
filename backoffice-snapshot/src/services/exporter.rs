//! Entity Exporters: full logical snapshot of one entity family.

use crate::db::bulk::{self, ExportedRow};
use crate::error::{BackupError, Result};
use crate::models::family::{EntityFamily, TableSpec, FAMILY_ORDER};
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Rows of one table, in id order.
#[derive(Debug)]
pub struct ExportedTable {
    pub spec: &'static TableSpec,
    pub rows: Vec<ExportedRow>,
}

/// Canonical serialized form of one entity family.
#[derive(Debug)]
pub struct ExportedEntitySet {
    pub family: EntityFamily,
    pub tables: Vec<ExportedTable>,
}

impl ExportedEntitySet {
    pub fn table(&self, table: &str) -> Option<&ExportedTable> {
        self.tables.iter().find(|t| t.spec.table == table)
    }
}

/// Reads every row of every table in `family`. Any read failure aborts the
/// whole family; no partial set is returned.
pub fn export(conn: &Connection, family: EntityFamily) -> Result<ExportedEntitySet> {
    let tables = family
        .tables()
        .iter()
        .map(|spec| {
            let rows = bulk::read_all(conn, spec).map_err(|source| BackupError::Export {
                table: spec.table,
                source,
            })?;
            Ok(ExportedTable { spec, rows })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ExportedEntitySet { family, tables })
}

/// Exports every family in dependency order. Callers run this inside one
/// transaction so the families describe the same instant.
pub fn export_all(conn: &Connection) -> Result<Vec<ExportedEntitySet>> {
    FAMILY_ORDER.iter().map(|family| export(conn, *family)).collect()
}

/// Writes each table as `data/<export_name>.json` under `root`; returns the
/// row count per export name.
pub fn write_sets(sets: &[ExportedEntitySet], root: &Path) -> Result<BTreeMap<String, usize>> {
    let data_dir = root.join("data");
    fs::create_dir_all(&data_dir)?;

    let mut counts = BTreeMap::new();
    for set in sets {
        for table in &set.tables {
            let path = root.join(table.spec.archive_path());
            fs::write(&path, serde_json::to_vec_pretty(&table.rows)?)?;
            counts.insert(table.spec.export_name.to_string(), table.rows.len());
            tracing::debug!(
                family = %set.family,
                table = table.spec.table,
                rows = table.rows.len(),
                "Exported table"
            );
        }
    }
    Ok(counts)
}

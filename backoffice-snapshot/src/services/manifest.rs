//! `manifest.json` at the archive root.

use crate::error::{BackupError, Result};
use crate::models::archive::ArchiveKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveManifest {
    pub format_version: u32,
    pub created_at: String,
    pub kind: ArchiveKind,
    pub include_payloads: bool,
    /// Row count per `data/<name>.json`.
    pub tables: BTreeMap<String, usize>,
    pub payloads: usize,
    /// Staged name under `arquivos/` per file id. Absent from archives that
    /// predate it, whose payloads are found by owner and basename alone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_paths: Option<BTreeMap<i64, String>>,
}

impl ArchiveManifest {
    pub fn write(&self, root: &Path) -> Result<()> {
        std::fs::write(root.join(MANIFEST_FILE), serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    /// Reads the manifest of an extracted archive. Archives written before
    /// manifests existed have none, which is fine.
    pub fn read(root: &Path) -> Result<Option<Self>> {
        let path = root.join(MANIFEST_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        let manifest: Self = serde_json::from_slice(&std::fs::read(&path)?)
            .map_err(|e| BackupError::MalformedArchive(format!("{}: {}", MANIFEST_FILE, e)))?;
        if manifest.format_version > FORMAT_VERSION {
            return Err(BackupError::MalformedArchive(format!(
                "archive format {} is newer than supported format {}",
                manifest.format_version, FORMAT_VERSION
            )));
        }
        Ok(Some(manifest))
    }
}

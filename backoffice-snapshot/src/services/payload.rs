//! Payload Collector: copies uploaded file bytes into the staging layout
//! `user_<owner_id>/<basename>`, and back out again on restore.

use crate::db::bulk::ExportedRow;
use crate::error::{BackupError, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;

/// Composite key of a staged payload. Two file rows of the same owner whose
/// stored paths end in the same basename share a key; [`collect`] gives the
/// later one a file-id prefixed name instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PayloadKey {
    pub owner_id: i64,
    pub basename: String,
}

impl PayloadKey {
    pub fn new(owner_id: i64, basename: impl Into<String>) -> Self {
        Self { owner_id, basename: basename.into() }
    }

    /// Key for a stored path; `None` when the path has no usable final component.
    pub fn for_storage_path(owner_id: i64, storage_path: &str) -> Option<Self> {
        let basename = Path::new(storage_path).file_name()?.to_str()?;
        if basename.is_empty() || basename == "." || basename == ".." {
            return None;
        }
        Some(Self::new(owner_id, basename))
    }

    pub fn owner_dir(&self) -> String {
        format!("user_{}", self.owner_id)
    }

    /// Location relative to a payload root (`arquivos/` in the archive, or the
    /// live upload root).
    pub fn relative_path(&self) -> PathBuf {
        Path::new(&self.owner_dir()).join(&self.basename)
    }

    /// Forward-slash form of [`relative_path`](Self::relative_path), as
    /// recorded in the archive manifest.
    pub fn relative_name(&self) -> String {
        format!("{}/{}", self.owner_dir(), self.basename)
    }

    /// Name for a payload whose plain key is already taken.
    pub fn disambiguated(&self, file_id: i64, attempt: usize) -> String {
        match attempt {
            0 => format!("{}/{}_{}", self.owner_dir(), file_id, self.basename),
            n => format!("{}/{}-{}_{}", self.owner_dir(), file_id, n, self.basename),
        }
    }
}

/// True for a non-empty relative name made only of normal components.
pub fn is_safe_relative(name: &str) -> bool {
    !name.is_empty() && Path::new(name).components().all(|c| matches!(c, Component::Normal(_)))
}

/// The fields of an exported file-metadata row that payload handling needs.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRef {
    pub id: i64,
    pub owner_id: i64,
    pub storage_path: String,
}

impl FileRef {
    pub fn from_row(row: &ExportedRow) -> Option<Self> {
        Some(Self {
            id: row.get("id")?.as_i64()?,
            owner_id: row.get("usuario_id")?.as_i64()?,
            storage_path: row.get("caminho")?.as_str()?.to_string(),
        })
    }

    pub fn key(&self) -> Option<PayloadKey> {
        PayloadKey::for_storage_path(self.owner_id, &self.storage_path)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CollectReport {
    pub copied: usize,
    /// Rows whose source bytes were not on disk.
    pub missing: usize,
    /// Staged name per file id, relative to the destination root.
    pub staged: BTreeMap<i64, String>,
}

fn unique_name(key: &PayloadKey, file_id: i64, taken: &HashSet<String>) -> String {
    let plain = key.relative_name();
    if !taken.contains(&plain) {
        return plain;
    }
    (0..)
        .map(|attempt| key.disambiguated(file_id, attempt))
        .find(|name| !taken.contains(name))
        .unwrap_or(plain)
}

/// Copies every file that exists on disk into `destination_root`. A missing
/// source is skipped; any copy failure aborts the whole collection. Rows
/// sharing one stored path share one staged copy.
pub fn collect(files: &[FileRef], destination_root: &Path) -> Result<CollectReport> {
    fs::create_dir_all(destination_root)?;

    let mut report = CollectReport::default();
    let mut taken = HashSet::new();
    let mut by_source: HashMap<&str, String> = HashMap::new();
    for file in files {
        let source = Path::new(&file.storage_path);
        let key = match file.key() {
            Some(key) if !file.storage_path.trim().is_empty() && source.is_file() => key,
            _ => {
                tracing::debug!(file_id = file.id, path = %file.storage_path, "Payload source missing, skipping");
                report.missing += 1;
                continue;
            }
        };

        if let Some(name) = by_source.get(file.storage_path.as_str()) {
            report.staged.insert(file.id, name.clone());
            continue;
        }

        let name = unique_name(&key, file.id, &taken);
        if name != key.relative_name() {
            tracing::debug!(file_id = file.id, name = %name, "Payload name taken, staging under a prefixed name");
        }
        copy_preserving_mtime(source, &destination_root.join(&name)).map_err(|source_err| {
            BackupError::PayloadCopy { path: source.to_path_buf(), source: source_err }
        })?;
        taken.insert(name.clone());
        by_source.insert(&file.storage_path, name.clone());
        report.staged.insert(file.id, name);
        report.copied += 1;
    }

    if report.missing > 0 {
        tracing::warn!(missing = report.missing, "Some file payloads were not found on disk");
    }
    Ok(report)
}

/// Copies `src` over `dest` (creating parents) and carries the modification time.
pub fn copy_preserving_mtime(src: &Path, dest: &Path) -> io::Result<u64> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let bytes = fs::copy(src, dest)?;
    let modified = fs::metadata(src)?.modified()?;
    File::options().write(true).open(dest)?.set_modified(modified)?;
    Ok(bytes)
}

/// Restored payloads, copied next to the live upload root and moved into
/// place only by [`apply`](Self::apply). Whatever they replace is kept
/// aside until the swap is dropped, so [`revert`](Self::revert) can put it
/// back.
pub struct PayloadSwap {
    uploads_root: PathBuf,
    staging: TempDir,
    pending: Vec<PathBuf>,
    /// Relative path of each applied payload, and whether it displaced a file.
    applied: Vec<(PathBuf, bool)>,
}

impl PayloadSwap {
    pub fn new(uploads_root: &Path) -> Result<Self> {
        fs::create_dir_all(uploads_root)?;
        // same filesystem as the destinations, so every move is a rename
        let staging = tempfile::Builder::new().prefix(".restore-").tempdir_in(uploads_root)?;
        Ok(Self { uploads_root: uploads_root.to_path_buf(), staging, pending: Vec::new(), applied: Vec::new() })
    }

    fn incoming(&self, relative: &Path) -> PathBuf {
        self.staging.path().join("incoming").join(relative)
    }

    fn displaced(&self, relative: &Path) -> PathBuf {
        self.staging.path().join("displaced").join(relative)
    }

    /// Copies `src` into the staging area. Returns where it will live once applied.
    pub fn stage(&mut self, src: &Path, relative: &Path) -> io::Result<PathBuf> {
        copy_preserving_mtime(src, &self.incoming(relative))?;
        self.pending.push(relative.to_path_buf());
        Ok(self.uploads_root.join(relative))
    }

    /// Moves every staged payload into place. On failure the moves already
    /// made are undone before the error is returned.
    pub fn apply(&mut self) -> Result<usize> {
        for relative in std::mem::take(&mut self.pending) {
            if let Err(source) = self.apply_one(&relative) {
                self.revert();
                return Err(BackupError::PayloadCopy { path: self.uploads_root.join(&relative), source });
            }
        }
        Ok(self.applied.len())
    }

    fn apply_one(&mut self, relative: &Path) -> io::Result<()> {
        let dest = self.uploads_root.join(relative);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        let displaced = match fs::symlink_metadata(&dest) {
            Ok(meta) if meta.is_file() => {
                let aside = self.displaced(relative);
                if let Some(parent) = aside.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::rename(&dest, &aside)?;
                true
            }
            Ok(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} exists and is not a regular file", dest.display()),
                ))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(e),
        };

        if let Err(e) = fs::rename(self.incoming(relative), &dest) {
            if displaced {
                self.put_back(relative, true);
            }
            return Err(e);
        }
        self.applied.push((relative.to_path_buf(), displaced));
        Ok(())
    }

    /// Undoes every applied move, newest first. Failures are logged and skipped.
    pub fn revert(&mut self) {
        while let Some((relative, displaced)) = self.applied.pop() {
            self.put_back(&relative, displaced);
        }
    }

    fn put_back(&self, relative: &Path, displaced: bool) {
        let dest = self.uploads_root.join(relative);
        let result = if displaced {
            fs::rename(self.displaced(relative), &dest)
        } else {
            fs::remove_file(&dest)
        };
        if let Err(e) = result {
            tracing::warn!(path = %dest.display(), error = %e, "Failed to put back upload after aborted restore");
        }
    }
}

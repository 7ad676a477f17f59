use crate::services::restore::RestorePhase;
use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum BackupError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("archive {0} not found")]
    NotFound(i64),

    #[error("archive {0} did not complete successfully and cannot be restored")]
    NotRestorable(i64),

    #[error("archive file missing: {}", .0.display())]
    ArchiveMissing(PathBuf),

    #[error("another backup or restore is in progress")]
    Busy,

    #[error("failed to export {table}: {source}")]
    Export {
        table: &'static str,
        source: anyhow::Error,
    },

    #[error("failed to copy payload {}: {source}", .path.display())]
    PayloadCopy {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed archive: {0}")]
    MalformedArchive(String),

    #[error("restore failed while {phase}: {source}")]
    RestoreFailed {
        phase: RestorePhase,
        source: Box<BackupError>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Pool(#[from] r2d2::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, BackupError>;

impl BackupError {
    /// Message safe to show an operator. Storage-layer details are logged, not shown.
    pub fn user_message(&self) -> String {
        match self {
            BackupError::Database(_) | BackupError::Pool(_) | BackupError::Internal(_) => {
                tracing::error!("Internal error: {self:#}");
                "Internal error, see logs for details".into()
            }
            BackupError::RestoreFailed { phase, source } => {
                format!("Restore failed while {phase}: {}", source.user_message())
            }
            other => {
                let msg = other.to_string();
                let mut chars = msg.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => msg,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_hides_internal_details() {
        let err = BackupError::Internal(anyhow::anyhow!("no such table: usuarios"));
        assert_eq!(err.user_message(), "Internal error, see logs for details");
    }

    #[test]
    fn test_user_message_capitalizes() {
        assert_eq!(
            BackupError::NotFound(7).user_message(),
            "Archive 7 not found"
        );
    }

    #[test]
    fn test_restore_failure_names_phase() {
        let err = BackupError::RestoreFailed {
            phase: RestorePhase::Reloading,
            source: Box::new(BackupError::MalformedArchive("bad row".into())),
        };
        assert_eq!(
            err.user_message(),
            "Restore failed while reloading: Malformed archive: bad row"
        );
    }
}

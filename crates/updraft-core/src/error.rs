use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::archive::ArchiveError;

/// Every way an update or rollback can fail, with a stable machine-readable code.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("could not open the update package: {0}")]
    Archive(#[from] ArchiveError),

    #[error("update package signature rejected: {0}")]
    Signature(String),

    #[error("invalid update package structure: missing {}", .missing.join(", "))]
    PackageStructure { missing: Vec<String> },

    #[error("invalid {file}: {reason}")]
    ManifestParse { file: String, reason: String },

    #[error("{0}")]
    VersionIncompatible(String),

    #[error("Version {0} has already been applied")]
    DuplicateVersion(String),

    #[error("{}", describe_missing_sources(.paths))]
    FileNotFound { paths: Vec<PathBuf> },

    #[error("failed to run migrations: {0}")]
    Migration(String),

    #[error("failed to apply config files: {0}")]
    Config(String),

    #[error("failed to create backup: {0}")]
    Backup(String),

    #[error("backup not found: {0}")]
    BackupNotFound(String),

    #[error("failed to restore {}: {cause}", .path.display())]
    Restore { path: PathBuf, cause: String },

    #[error("failed to write update history: {0}")]
    History(String),

    #[error("{0}")]
    Io(String),
}

impl UpdateError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Archive(_) => "archive_error",
            Self::Signature(_) => "signature_error",
            Self::PackageStructure { .. } => "package_structure_error",
            Self::ManifestParse { .. } => "manifest_parse_error",
            Self::VersionIncompatible(_) => "version_incompatible",
            Self::DuplicateVersion(_) => "duplicate_version",
            Self::FileNotFound { .. } => "file_not_found",
            Self::Migration(_) => "migration_error",
            Self::Config(_) => "config_error",
            Self::Backup(_) => "backup_error",
            Self::BackupNotFound(_) => "backup_not_found",
            Self::Restore { .. } => "restore_error",
            Self::History(_) => "history_error",
            Self::Io(_) => "io_error",
        }
    }

    /// Wraps an unexpected filesystem failure, keeping the whole context chain.
    pub fn io(err: anyhow::Error) -> Self {
        Self::Io(format!("{err:#}"))
    }

    pub(crate) fn manifest(file: &str, reason: impl Into<String>) -> Self {
        Self::ManifestParse {
            file: file.to_string(),
            reason: reason.into(),
        }
    }
}

fn describe_missing_sources(paths: &[PathBuf]) -> String {
    match paths {
        [single] => format!("Source file not found: {}", single.display()),
        _ => format!(
            "{} source files not found: {}",
            paths.len(),
            paths
                .iter()
                .map(|path| display_file_name(path))
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

fn display_file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

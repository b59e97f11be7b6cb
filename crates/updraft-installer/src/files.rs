use std::fs;
use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use updraft_core::{FileChange, FileManifest, PackageLayout, UpdateError};

use crate::fs_utils::{
    append_json_line, copy_file_creating_parents, current_unix_timestamp, generate_backup_id,
    remove_file_if_exists,
};
use crate::layout::InstallLayout;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileApplyReport {
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
    /// Deletions whose target was already absent.
    pub already_absent: Vec<PathBuf>,
    pub vendor: usize,
    pub vendor_backup: Option<PathBuf>,
}

/// One line of the vendor modification ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorLedgerEntry {
    pub timestamp: i64,
    pub version: String,
    pub backup_path: PathBuf,
    pub files: Vec<PathBuf>,
}

/// Applies additions, modifications, deletions and vendor changes in that order.
///
/// Missing sources do not stop the remaining changes; they are collected and reported as a
/// single `FileNotFound` error once everything else has been attempted.
pub fn apply_file_changes(
    layout: &InstallLayout,
    package: &PackageLayout,
    manifest: &FileManifest,
    target_version: &str,
) -> Result<FileApplyReport, UpdateError> {
    let mut report = FileApplyReport::default();
    if manifest.is_empty() {
        debug!(version = target_version, "file manifest lists no changes");
        return Ok(report);
    }
    let mut missing = Vec::new();

    for change in &manifest.added {
        if copy_change(layout, package, change, &mut missing)? {
            report.added += 1;
        }
    }
    for change in &manifest.modified {
        if copy_change(layout, package, change, &mut missing)? {
            report.modified += 1;
        }
    }

    for relative in &manifest.deleted {
        let target = layout.host_path(relative);
        match fs::symlink_metadata(&target) {
            Ok(metadata) if metadata.is_dir() => {
                warn!(path = %relative.display(), "refusing to delete a directory");
                report.already_absent.push(relative.clone());
            }
            Ok(_) => {
                let removed = remove_file_if_exists(&target)
                    .with_context(|| format!("failed to delete {}", target.display()))
                    .map_err(UpdateError::io)?;
                if removed {
                    report.deleted += 1;
                } else {
                    report.already_absent.push(relative.clone());
                }
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!(path = %relative.display(), "file scheduled for deletion does not exist");
                report.already_absent.push(relative.clone());
            }
            Err(err) => {
                return Err(UpdateError::io(anyhow::Error::new(err).context(format!(
                    "failed to inspect {}",
                    target.display()
                ))));
            }
        }
    }

    if manifest.has_vendor_changes() {
        let backup_path = backup_vendor_files(layout, &manifest.vendor, target_version)
            .map_err(UpdateError::io)?;
        for change in &manifest.vendor {
            if copy_change(layout, package, change, &mut missing)? {
                report.vendor += 1;
            }
        }
        report.vendor_backup = Some(backup_path);
    }

    if !missing.is_empty() {
        return Err(UpdateError::FileNotFound { paths: missing });
    }

    info!(
        added = report.added,
        modified = report.modified,
        deleted = report.deleted,
        vendor = report.vendor,
        "applied file changes"
    );
    Ok(report)
}

pub fn read_vendor_ledger(layout: &InstallLayout) -> Result<Vec<VendorLedgerEntry>> {
    let path = layout.vendor_ledger_path();
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()));
        }
    };

    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).with_context(|| {
                format!(
                    "invalid vendor ledger entry at {}:{}",
                    path.display(),
                    index + 1
                )
            })
        })
        .collect()
}

/// Returns `Ok(false)` when the source is absent from the package.
fn copy_change(
    layout: &InstallLayout,
    package: &PackageLayout,
    change: &FileChange,
    missing: &mut Vec<PathBuf>,
) -> Result<bool, UpdateError> {
    let source = package.payload_path(&change.source);
    if !source.is_file() {
        error!(source = %change.source.display(), "update source file not found");
        missing.push(change.source.clone());
        return Ok(false);
    }
    let destination = layout.host_path(&change.destination);
    copy_file_creating_parents(&source, &destination).map_err(UpdateError::io)?;
    Ok(true)
}

fn backup_vendor_files(
    layout: &InstallLayout,
    changes: &[FileChange],
    target_version: &str,
) -> Result<PathBuf> {
    let backup_path = layout
        .vendor_backups_dir()
        .join(generate_backup_id(Utc::now()));
    fs::create_dir_all(&backup_path)
        .with_context(|| format!("failed to create {}", backup_path.display()))?;

    let mut files = Vec::new();
    for change in changes {
        let current = layout.host_path(&change.destination);
        if current.is_file() {
            copy_file_creating_parents(&current, &backup_path.join(&change.destination))?;
        }
        files.push(change.destination.clone());
    }

    let entry = VendorLedgerEntry {
        timestamp: current_unix_timestamp(),
        version: target_version.to_string(),
        backup_path: backup_path.clone(),
        files,
    };
    let line = serde_json::to_string(&entry).context("failed to serialize vendor ledger entry")?;
    append_json_line(&layout.vendor_ledger_path(), &line)?;

    warn!(
        backup = %backup_path.display(),
        files = entry.files.len(),
        "update modifies vendor files; originals saved"
    );
    Ok(backup_path)
}

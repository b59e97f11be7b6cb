use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use updraft_core::{FileManifest, UpdateError, BACKUP_INFO_FILE};
use walkdir::WalkDir;

use crate::fs_utils::{
    copy_file_creating_parents, current_unix_timestamp, generate_backup_id, is_valid_backup_id,
};
use crate::layout::InstallLayout;

/// Contents of `backup-info.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupInfo {
    pub timestamp: i64,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_to: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<BackupKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupKind {
    #[serde(rename = "safety_backup_before_rollback")]
    SafetyBeforeRollback,
}

impl BackupKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SafetyBeforeRollback => "safety_backup_before_rollback",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    pub id: String,
    pub info: BackupInfo,
}

/// Copies every currently existing file the manifest will modify or delete, then writes
/// `backup-info.json` last so a partially written backup is never considered present.
/// Returns the new backup id.
pub fn create_backup(
    layout: &InstallLayout,
    files: &FileManifest,
    current_version: &str,
    target_version: &str,
) -> Result<String, UpdateError> {
    let backup_id = generate_backup_id(Utc::now());
    let backup_dir = layout.backup_dir(&backup_id);
    if backup_dir.exists() {
        return Err(UpdateError::Backup(format!(
            "backup {backup_id} already exists"
        )));
    }

    let result = copy_protected_files(layout, &backup_dir, files).and_then(|copied| {
        write_backup_info(
            &backup_dir,
            &BackupInfo {
                timestamp: current_unix_timestamp(),
                version: current_version.to_string(),
                updated_to: Some(target_version.to_string()),
                rollback_to: None,
                kind: None,
            },
        )?;
        Ok(copied)
    });

    match result {
        Ok(copied) => {
            info!(
                backup_id = %backup_id,
                files = copied,
                from_version = current_version,
                to_version = target_version,
                "created backup"
            );
            Ok(backup_id)
        }
        Err(err) => {
            if let Err(cleanup_err) = fs::remove_dir_all(&backup_dir) {
                if cleanup_err.kind() != io::ErrorKind::NotFound {
                    warn!(
                        backup_id = %backup_id,
                        error = %cleanup_err,
                        "failed to remove partial backup"
                    );
                }
            }
            Err(UpdateError::Backup(format!("{err:#}")))
        }
    }
}

/// Records the installation's state before a rollback. Only metadata is written.
pub fn create_safety_backup(
    layout: &InstallLayout,
    backup_id: &str,
    current_version: &str,
    rollback_to: &str,
) -> Result<(), UpdateError> {
    if !is_valid_backup_id(backup_id) {
        return Err(UpdateError::Backup(format!("invalid backup id '{backup_id}'")));
    }
    let backup_dir = layout.backup_dir(backup_id);
    write_backup_info(
        &backup_dir,
        &BackupInfo {
            timestamp: current_unix_timestamp(),
            version: current_version.to_string(),
            updated_to: None,
            rollback_to: Some(rollback_to.to_string()),
            kind: Some(BackupKind::SafetyBeforeRollback),
        },
    )
    .map_err(|err| UpdateError::Backup(format!("{err:#}")))?;
    info!(backup_id, rollback_to, "created safety backup");
    Ok(())
}

pub fn backup_exists(layout: &InstallLayout, backup_id: &str) -> bool {
    is_valid_backup_id(backup_id) && layout.backup_info_path(backup_id).is_file()
}

pub fn get_backup_info(layout: &InstallLayout, backup_id: &str) -> Result<BackupInfo, UpdateError> {
    if !backup_exists(layout, backup_id) {
        return Err(UpdateError::BackupNotFound(backup_id.to_string()));
    }
    let path = layout.backup_info_path(backup_id);
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))
        .map_err(UpdateError::io)?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))
        .map_err(UpdateError::io)
}

/// Copies every file of the backup over `destination_root`, recreating directories.
/// Returns the number of files restored.
pub fn restore_files(
    layout: &InstallLayout,
    backup_id: &str,
    destination_root: &Path,
) -> Result<usize, UpdateError> {
    if !backup_exists(layout, backup_id) {
        return Err(UpdateError::BackupNotFound(backup_id.to_string()));
    }
    let backup_dir = layout.backup_dir(backup_id);
    let mut restored = 0;

    for entry in WalkDir::new(&backup_dir)
        .min_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|err| UpdateError::Restore {
            path: err
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| backup_dir.clone()),
            cause: err.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(&backup_dir)
            .map_err(|err| UpdateError::Restore {
                path: entry.path().to_path_buf(),
                cause: err.to_string(),
            })?;
        if relative == Path::new(BACKUP_INFO_FILE) {
            continue;
        }

        let destination = destination_root.join(relative);
        copy_file_creating_parents(entry.path(), &destination).map_err(|err| {
            UpdateError::Restore {
                path: destination.clone(),
                cause: format!("{err:#}"),
            }
        })?;
        restored += 1;
    }

    info!(backup_id, files = restored, "restored backup");
    Ok(restored)
}

/// All backups with readable metadata, oldest first.
pub fn list_backups(layout: &InstallLayout) -> anyhow::Result<Vec<BackupEntry>> {
    let dir = layout.backups_dir();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", dir.display()));
        }
    };

    let mut backups = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to iterate {}", dir.display()))?;
        let Some(id) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if !backup_exists(layout, &id) {
            continue;
        }
        match get_backup_info(layout, &id) {
            Ok(info) => backups.push(BackupEntry { id, info }),
            Err(err) => warn!(backup_id = %id, error = %err, "skipping unreadable backup"),
        }
    }
    backups.sort_by(|left, right| left.id.cmp(&right.id));
    Ok(backups)
}

fn copy_protected_files(
    layout: &InstallLayout,
    backup_dir: &Path,
    files: &FileManifest,
) -> anyhow::Result<usize> {
    fs::create_dir_all(backup_dir)
        .with_context(|| format!("failed to create {}", backup_dir.display()))?;

    let mut copied = 0;
    for relative in files.protected_paths() {
        let source = layout.host_path(relative);
        if !source.is_file() {
            continue;
        }
        let target: PathBuf = backup_dir.join(relative);
        copy_file_creating_parents(&source, &target)?;
        copied += 1;
    }
    Ok(copied)
}

fn write_backup_info(backup_dir: &Path, info: &BackupInfo) -> anyhow::Result<()> {
    fs::create_dir_all(backup_dir)
        .with_context(|| format!("failed to create {}", backup_dir.display()))?;
    let path = backup_dir.join(BACKUP_INFO_FILE);
    let raw = serde_json::to_string_pretty(info).context("failed to serialize backup info")?;
    fs::write(&path, raw).with_context(|| format!("failed to write {}", path.display()))
}

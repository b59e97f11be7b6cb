use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use updraft_core::BACKUP_INFO_FILE;

/// Where the installation lives and where updraft keeps its own state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLayout {
    root: PathBuf,
    storage: PathBuf,
    updates: PathBuf,
    backups: PathBuf,
    vendor_backups: PathBuf,
    migrations: PathBuf,
    config: PathBuf,
}

impl InstallLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let storage = root.join("storage").join("updraft");
        Self {
            updates: storage.join("updates"),
            backups: storage.join("backups"),
            vendor_backups: storage.join("vendor-backups"),
            migrations: root.join("database").join("migrations"),
            config: root.join("config"),
            storage,
            root,
        }
    }

    /// Moves the state directory; updates and backups follow unless overridden afterwards.
    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let storage = dir.into();
        self.updates = storage.join("updates");
        self.backups = storage.join("backups");
        self.vendor_backups = storage.join("vendor-backups");
        self.storage = storage;
        self
    }

    pub fn with_updates_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.updates = dir.into();
        self
    }

    pub fn with_backups_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backups = dir.into();
        self
    }

    pub fn with_vendor_backups_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.vendor_backups = dir.into();
        self
    }

    pub fn with_migrations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migrations = dir.into();
        self
    }

    pub fn with_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config = dir.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage
    }

    pub fn updates_dir(&self) -> &Path {
        &self.updates
    }

    pub fn backups_dir(&self) -> &Path {
        &self.backups
    }

    pub fn vendor_backups_dir(&self) -> &Path {
        &self.vendor_backups
    }

    pub fn migrations_dir(&self) -> &Path {
        &self.migrations
    }

    pub fn config_dir(&self) -> &Path {
        &self.config
    }

    pub fn host_path(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    pub fn backup_dir(&self, backup_id: &str) -> PathBuf {
        self.backups.join(backup_id)
    }

    pub fn backup_info_path(&self, backup_id: &str) -> PathBuf {
        self.backup_dir(backup_id).join(BACKUP_INFO_FILE)
    }

    pub fn history_path(&self) -> PathBuf {
        self.storage.join("update-history.jsonl")
    }

    pub fn vendor_ledger_path(&self) -> PathBuf {
        self.storage.join("vendor-modifications.jsonl")
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [
            &self.storage,
            &self.updates,
            &self.backups,
            &self.vendor_backups,
        ] {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

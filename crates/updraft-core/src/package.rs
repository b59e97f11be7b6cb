use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::error;

use crate::manifest::{
    CommandManifest, ConfigManifest, FileManifest, MigrationManifest, UpdateManifest,
};
use crate::UpdateError;

pub const BACKUP_INFO_FILE: &str = "backup-info.json";

const MAIN_MANIFEST: &str = "update-manifest.json";
const FILE_MANIFEST: &str = "manifests/file-manifest.json";
const MIGRATION_MANIFEST: &str = "manifests/migration-manifest.json";
const CONFIG_MANIFEST: &str = "manifests/config-manifest.json";
const COMMAND_MANIFEST: &str = "manifests/command-manifest.json";

/// Paths inside an extracted update package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageLayout {
    root: PathBuf,
}

impl PackageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files_dir(&self) -> PathBuf {
        self.root.join("files")
    }

    pub fn manifests_dir(&self) -> PathBuf {
        self.root.join("manifests")
    }

    pub fn migrations_dir(&self) -> PathBuf {
        self.root.join("migrations")
    }

    pub fn config_dir(&self) -> PathBuf {
        self.root.join("config")
    }

    pub fn main_manifest_path(&self) -> PathBuf {
        self.root.join(MAIN_MANIFEST)
    }

    pub fn file_manifest_path(&self) -> PathBuf {
        self.root.join(FILE_MANIFEST)
    }

    pub fn migration_manifest_path(&self) -> PathBuf {
        self.root.join(MIGRATION_MANIFEST)
    }

    pub fn config_manifest_path(&self) -> PathBuf {
        self.root.join(CONFIG_MANIFEST)
    }

    pub fn command_manifest_path(&self) -> PathBuf {
        self.root.join(COMMAND_MANIFEST)
    }

    pub fn payload_path(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }
}

/// Checks that every required entry exists and that the main manifest names a version.
pub fn validate_structure(package: &PackageLayout) -> Result<(), UpdateError> {
    let required = [
        ("files", package.files_dir()),
        ("manifests", package.manifests_dir()),
        (MAIN_MANIFEST, package.main_manifest_path()),
        (FILE_MANIFEST, package.file_manifest_path()),
    ];
    let missing = required
        .iter()
        .filter(|(_, path)| !path.exists())
        .map(|(label, _)| label.to_string())
        .collect::<Vec<_>>();

    if !missing.is_empty() {
        error!(
            extract_path = %package.root().display(),
            missing_paths = ?missing,
            "invalid update package structure"
        );
        return Err(UpdateError::PackageStructure { missing });
    }

    let raw = read_required(&package.main_manifest_path(), MAIN_MANIFEST)?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|err| UpdateError::manifest(MAIN_MANIFEST, err.to_string()))?;
    let has_version = value
        .get("version")
        .and_then(serde_json::Value::as_str)
        .is_some_and(|version| !version.trim().is_empty());
    if !has_version {
        error!(
            extract_path = %package.root().display(),
            "update manifest does not declare a version"
        );
        return Err(UpdateError::manifest(
            MAIN_MANIFEST,
            "missing required 'version' field",
        ));
    }

    Ok(())
}

pub fn read_main_manifest(package: &PackageLayout) -> Result<UpdateManifest, UpdateError> {
    let raw = read_required(&package.main_manifest_path(), MAIN_MANIFEST)?;
    UpdateManifest::from_json_str(&raw)
        .map_err(|err| UpdateError::manifest(MAIN_MANIFEST, format!("{err:#}")))
}

pub fn read_file_manifest(package: &PackageLayout) -> Result<FileManifest, UpdateError> {
    let raw = read_required(&package.file_manifest_path(), FILE_MANIFEST)?;
    FileManifest::from_json_str(&raw)
        .map_err(|err| UpdateError::manifest(FILE_MANIFEST, format!("{err:#}")))
}

pub fn read_migration_manifest(package: &PackageLayout) -> Result<MigrationManifest, UpdateError> {
    match read_optional(&package.migration_manifest_path(), MIGRATION_MANIFEST)? {
        Some(raw) => MigrationManifest::from_json_str(&raw)
            .map_err(|err| UpdateError::manifest(MIGRATION_MANIFEST, format!("{err:#}"))),
        None => Ok(MigrationManifest::default()),
    }
}

pub fn read_config_manifest(package: &PackageLayout) -> Result<ConfigManifest, UpdateError> {
    match read_optional(&package.config_manifest_path(), CONFIG_MANIFEST)? {
        Some(raw) => ConfigManifest::from_json_str(&raw)
            .map_err(|err| UpdateError::manifest(CONFIG_MANIFEST, format!("{err:#}"))),
        None => Ok(ConfigManifest::default()),
    }
}

pub fn read_command_manifest(package: &PackageLayout) -> Result<CommandManifest, UpdateError> {
    match read_optional(&package.command_manifest_path(), COMMAND_MANIFEST)? {
        Some(raw) => CommandManifest::from_json_str(&raw)
            .map_err(|err| UpdateError::manifest(COMMAND_MANIFEST, format!("{err:#}"))),
        None => Ok(CommandManifest::default()),
    }
}

fn read_required(path: &Path, label: &str) -> Result<String, UpdateError> {
    match read_optional(path, label)? {
        Some(raw) => Ok(raw),
        None => Err(UpdateError::manifest(label, "file is missing or empty")),
    }
}

/// Missing and blank manifests both read as `None`.
fn read_optional(path: &Path, label: &str) -> Result<Option<String>, UpdateError> {
    match fs::read_to_string(path) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => Ok(Some(raw)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(UpdateError::manifest(
            label,
            format!("failed to read {}: {err}", path.display()),
        )),
    }
}

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

/// Top-level `update-manifest.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateManifest {
    pub version: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(
        default,
        alias = "requiredPhpVersion",
        skip_serializing_if = "Option::is_none"
    )]
    pub required_runtime_version: Option<String>,
    #[serde(
        default,
        alias = "requiredLaravelVersion",
        skip_serializing_if = "Option::is_none"
    )]
    pub required_framework_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_required_version: Option<String>,
}

impl UpdateManifest {
    pub fn from_json_str(input: &str) -> anyhow::Result<Self> {
        let manifest: Self =
            serde_json::from_str(input).context("failed to parse update manifest")?;
        if manifest.version.trim().is_empty() {
            return Err(anyhow!("update manifest version must not be empty"));
        }
        Ok(manifest)
    }

    /// Name used in history entries; packages without a name fall back to their version.
    pub fn display_name(&self) -> String {
        if self.name.trim().is_empty() {
            format!("Update {}", self.version)
        } else {
            self.name.clone()
        }
    }
}

/// One file copy: `source` is relative to the extracted package, `destination` to the
/// installation root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// Canonical form of `manifests/file-manifest.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileManifest {
    pub added: Vec<FileChange>,
    pub modified: Vec<FileChange>,
    pub deleted: Vec<PathBuf>,
    pub vendor: Vec<FileChange>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FileEntries {
    List(Vec<String>),
    Mapping(BTreeMap<String, String>),
}

#[derive(Debug, Default, Deserialize)]
struct RawFileManifest {
    #[serde(default)]
    added: Option<FileEntries>,
    #[serde(default)]
    modified: Option<FileEntries>,
    #[serde(default)]
    deleted: Option<Vec<String>>,
    #[serde(default)]
    vendor: Option<Vec<String>>,
}

impl FileManifest {
    pub fn from_json_str(input: &str) -> anyhow::Result<Self> {
        let raw: RawFileManifest =
            serde_json::from_str(input).context("failed to parse file manifest")?;

        let added = normalize_entries(raw.added, "added")?;
        let modified = normalize_entries(raw.modified, "modified")?;
        let deleted = raw
            .deleted
            .unwrap_or_default()
            .iter()
            .map(|path| validated_relative_path(path).context("invalid 'deleted' entry"))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let vendor = raw
            .vendor
            .unwrap_or_default()
            .iter()
            .map(|path| payload_change(path).context("invalid 'vendor' entry"))
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self {
            added,
            modified,
            deleted,
            vendor,
        })
    }

    /// Root-relative paths whose current content must be protected before applying.
    pub fn protected_paths(&self) -> impl Iterator<Item = &Path> {
        self.modified
            .iter()
            .map(|change| change.destination.as_path())
            .chain(self.deleted.iter().map(PathBuf::as_path))
    }

    pub fn has_vendor_changes(&self) -> bool {
        !self.vendor.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.modified.is_empty()
            && self.deleted.is_empty()
            && self.vendor.is_empty()
    }
}

fn normalize_entries(entries: Option<FileEntries>, section: &str) -> anyhow::Result<Vec<FileChange>> {
    match entries {
        None => Ok(Vec::new()),
        Some(FileEntries::List(paths)) => paths
            .iter()
            .map(|path| {
                payload_change(path).with_context(|| format!("invalid '{section}' entry"))
            })
            .collect(),
        Some(FileEntries::Mapping(pairs)) => pairs
            .iter()
            .map(|(source, destination)| {
                Ok(FileChange {
                    source: validated_relative_path(source)
                        .with_context(|| format!("invalid '{section}' source"))?,
                    destination: validated_relative_path(destination)
                        .with_context(|| format!("invalid '{section}' destination"))?,
                })
            })
            .collect(),
    }
}

fn payload_change(path: &str) -> anyhow::Result<FileChange> {
    let relative = validated_relative_path(path)?;
    Ok(FileChange {
        source: Path::new("files").join(&relative),
        destination: relative,
    })
}

/// Normalizes a manifest path and rejects anything that could escape its base directory.
pub fn validated_relative_path(path: &str) -> anyhow::Result<PathBuf> {
    let unified = path.trim().replace('\\', "/");
    if unified.is_empty() {
        return Err(anyhow!("path must not be empty"));
    }

    let mut normalized = PathBuf::new();
    for component in Path::new(&unified).components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(anyhow!("path must not include '..': {path}"));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(anyhow!("path must be relative: {path}"));
            }
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(anyhow!("path must not be empty"));
    }
    Ok(normalized)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrationManifest {
    #[serde(default)]
    pub migrations: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigManifest {
    #[serde(default, rename = "configFiles")]
    pub config_files: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandManifest {
    #[serde(default, rename = "postUpdateCommands")]
    pub post_update_commands: Vec<String>,
}

impl MigrationManifest {
    pub fn from_json_str(input: &str) -> anyhow::Result<Self> {
        let manifest: Self =
            serde_json::from_str(input).context("failed to parse migration manifest")?;
        for migration in &manifest.migrations {
            validated_relative_path(migration).context("invalid migration entry")?;
        }
        Ok(manifest)
    }
}

impl ConfigManifest {
    pub fn from_json_str(input: &str) -> anyhow::Result<Self> {
        let manifest: Self =
            serde_json::from_str(input).context("failed to parse config manifest")?;
        for config in &manifest.config_files {
            validated_relative_path(config).context("invalid config entry")?;
        }
        Ok(manifest)
    }
}

impl CommandManifest {
    pub fn from_json_str(input: &str) -> anyhow::Result<Self> {
        serde_json::from_str(input).context("failed to parse command manifest")
    }
}

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use updraft_core::HostEnvironment;
use updraft_installer::{InstallLayout, SignaturePolicy};

use crate::logging::LogFormat;

pub const DEFAULT_CONFIG_FILE: &str = "updraft.toml";
pub const APP_VERSION_ENV: &str = "UPDRAFT_APP_VERSION";
const FALLBACK_APP_VERSION: &str = "0.0.0";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpdraftConfig {
    pub app: AppConfig,
    pub paths: PathsConfig,
    pub migrations: MigrationsConfig,
    pub commands: CommandsConfig,
    pub verification: VerificationConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub root: PathBuf,
    pub version: Option<String>,
    pub runtime_version: Option<String>,
    pub framework_version: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            version: None,
            runtime_version: None,
            framework_version: None,
        }
    }
}

/// Overrides for the state and host directories; relative paths resolve against `app.root`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    pub storage: Option<PathBuf>,
    pub updates: Option<PathBuf>,
    pub backups: Option<PathBuf>,
    pub vendor_backups: Option<PathBuf>,
    pub migrations: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MigrationsConfig {
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CommandsConfig {
    pub prefix: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VerificationConfig {
    pub verify_updates: bool,
    pub public_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

impl UpdraftConfig {
    /// Reads `path`, or `./updraft.toml` when none is given. Only an explicitly requested
    /// file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };
        let mut config = match fs::read_to_string(&path) {
            Ok(raw) => Self::from_toml_str(&raw)
                .with_context(|| format!("failed to parse config {}", path.display()))?,
            Err(err) if err.kind() == io::ErrorKind::NotFound && !required => Self::default(),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read config {}", path.display()));
            }
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("invalid updraft configuration")
    }

    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(version) = lookup(APP_VERSION_ENV).filter(|value| !value.trim().is_empty()) {
            self.app.version = Some(version.trim().to_string());
        }
    }

    pub fn layout(&self) -> InstallLayout {
        let root = &self.app.root;
        let resolve = |path: &PathBuf| root.join(path);
        let mut layout = InstallLayout::new(root.clone());
        if let Some(storage) = &self.paths.storage {
            layout = layout.with_storage_dir(resolve(storage));
        }
        if let Some(updates) = &self.paths.updates {
            layout = layout.with_updates_dir(resolve(updates));
        }
        if let Some(backups) = &self.paths.backups {
            layout = layout.with_backups_dir(resolve(backups));
        }
        if let Some(vendor_backups) = &self.paths.vendor_backups {
            layout = layout.with_vendor_backups_dir(resolve(vendor_backups));
        }
        if let Some(migrations) = &self.paths.migrations {
            layout = layout.with_migrations_dir(resolve(migrations));
        }
        if let Some(config) = &self.paths.config {
            layout = layout.with_config_dir(resolve(config));
        }
        layout
    }

    /// The flag is false when no version was configured and `0.0.0` is assumed.
    pub fn host_environment(&self) -> (HostEnvironment, bool) {
        let configured = self.app.version.is_some();
        let mut host = HostEnvironment::new(
            self.app
                .version
                .clone()
                .unwrap_or_else(|| FALLBACK_APP_VERSION.to_string()),
        );
        if let Some(runtime) = &self.app.runtime_version {
            host = host.with_runtime_version(runtime.clone());
        }
        if let Some(framework) = &self.app.framework_version {
            host = host.with_framework_version(framework.clone());
        }
        (host, configured)
    }

    pub fn signature_policy(&self) -> SignaturePolicy {
        if !self.verification.verify_updates {
            return SignaturePolicy::Disabled;
        }
        SignaturePolicy::Required {
            public_key_hex: self.verification.public_key.clone().unwrap_or_default(),
        }
    }
}

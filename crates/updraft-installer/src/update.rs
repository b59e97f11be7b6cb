use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use serde_json::Value;
use tracing::{error, info, warn};
use updraft_core::{
    check_version_compatibility, extract_package, read_command_manifest, read_config_manifest,
    read_file_manifest, read_main_manifest, read_migration_manifest, validate_structure,
    validated_relative_path, CommandManifest, Compatibility, ConfigManifest, FileManifest,
    HostEnvironment, MigrationManifest, PackageLayout, UpdateError, UpdateManifest,
};
use updraft_security::{sha256_file_hex, verify_detached_signature_file};
use uuid::Uuid;

use crate::backups::{create_backup, restore_files};
use crate::files::{apply_file_changes, FileApplyReport};
use crate::fs_utils::copy_file_creating_parents;
use crate::history::{HistoryStore, UpdateHistoryRecord};
use crate::layout::InstallLayout;
use crate::steps::{ActorResolver, CommandRunner, MigrationRunner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStage {
    Extracting,
    Validating,
    CheckingVersion,
    CheckingDuplicate,
    BackingUp,
    ApplyingFiles,
    RunningMigrations,
    ApplyingConfig,
    RunningCommands,
    RestoringBackup,
    Succeeded,
    Failed,
}

impl UpdateStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Extracting => "extracting",
            Self::Validating => "validating",
            Self::CheckingVersion => "checking_version",
            Self::CheckingDuplicate => "checking_duplicate",
            Self::BackingUp => "backing_up",
            Self::ApplyingFiles => "applying_files",
            Self::RunningMigrations => "running_migrations",
            Self::ApplyingConfig => "applying_config",
            Self::RunningCommands => "running_commands",
            Self::RestoringBackup => "restoring_backup",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SignaturePolicy {
    #[default]
    Disabled,
    /// Require `<archive>.sig` signed by this hex Ed25519 key.
    Required { public_key_hex: String },
}

/// Everything `process_update` needs besides paths and the host's versions.
pub struct UpdateServices<'a> {
    pub history: &'a dyn HistoryStore,
    pub migrations: &'a dyn MigrationRunner,
    pub commands: &'a dyn CommandRunner,
    pub actor: &'a dyn ActorResolver,
    pub signature: SignaturePolicy,
    pub observer: Option<&'a dyn Fn(UpdateStage)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreStatus {
    NotAttempted,
    Restored { files: usize },
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    pub version: String,
    pub name: String,
    pub backup_id: String,
    pub files: FileApplyReport,
    pub migrations: usize,
    pub config_files: usize,
    pub failed_commands: Vec<String>,
    /// `None` when the success could not be written to history.
    pub history_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateFailure {
    pub message: String,
    pub code: &'static str,
    pub stage: UpdateStage,
    pub version: Option<String>,
    pub backup_id: Option<String>,
    pub restore: RestoreStatus,
}

impl UpdateFailure {
    /// The original error, followed by the restore failure when there was one.
    pub fn composed_message(&self) -> String {
        match &self.restore {
            RestoreStatus::Failed(detail) => {
                format!("{}; backup restore also failed: {detail}", self.message)
            }
            _ => self.message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied(UpdateReport),
    Failed(UpdateFailure),
}

impl UpdateOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Applies one update package to the installation described by `layout`.
///
/// Never returns an error: every failure is folded into `UpdateOutcome::Failed`, after the
/// host has been restored from this run's backup when one was taken.
pub fn process_update(
    layout: &InstallLayout,
    host: &HostEnvironment,
    services: &UpdateServices<'_>,
    archive_path: &Path,
) -> UpdateOutcome {
    info!(archive = %archive_path.display(), current_version = %host.app_version, "starting update");
    let mut run = UpdateRun {
        layout,
        host,
        services,
        archive_path,
        stage: UpdateStage::Extracting,
        manifest: None,
        package_sha256: None,
        backup_id: None,
    };

    match run.apply() {
        Ok(report) => UpdateOutcome::Applied(run.succeed(report)),
        Err(err) => UpdateOutcome::Failed(run.fail(err)),
    }
}

struct PackagePlan {
    files: FileManifest,
    migrations: MigrationManifest,
    config: ConfigManifest,
    commands: CommandManifest,
}

struct UpdateRun<'r, 'a> {
    layout: &'r InstallLayout,
    host: &'r HostEnvironment,
    services: &'r UpdateServices<'a>,
    archive_path: &'r Path,
    stage: UpdateStage,
    manifest: Option<UpdateManifest>,
    package_sha256: Option<String>,
    backup_id: Option<String>,
}

impl UpdateRun<'_, '_> {
    fn enter(&mut self, stage: UpdateStage) {
        self.stage = stage;
        info!(stage = stage.as_str(), "update stage");
        if let Some(observer) = self.services.observer {
            observer(stage);
        }
    }

    fn apply(&mut self) -> Result<UpdateReport, UpdateError> {
        self.enter(UpdateStage::Extracting);
        self.verify_signature()?;
        self.package_sha256 = match sha256_file_hex(self.archive_path) {
            Ok(digest) => Some(digest),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "could not fingerprint update package");
                None
            }
        };
        let workspace = ExtractionWorkspace::create(self.layout)?;
        extract_package(self.archive_path, workspace.path())?;
        let package = PackageLayout::new(workspace.path());

        self.enter(UpdateStage::Validating);
        validate_structure(&package)?;
        let manifest = read_main_manifest(&package)?;
        self.manifest = Some(manifest.clone());

        self.enter(UpdateStage::CheckingVersion);
        if let Compatibility::Incompatible(reason) = check_version_compatibility(&manifest, self.host)
        {
            return Err(UpdateError::VersionIncompatible(reason));
        }

        self.enter(UpdateStage::CheckingDuplicate);
        let already_applied = self
            .services
            .history
            .has_successful_version(&manifest.version)
            .map_err(|err| UpdateError::History(format!("{err:#}")))?;
        if already_applied {
            return Err(UpdateError::DuplicateVersion(manifest.version.clone()));
        }

        self.enter(UpdateStage::BackingUp);
        // A malformed manifest must not leave a backup behind.
        let plan = PackagePlan {
            files: read_file_manifest(&package)?,
            migrations: read_migration_manifest(&package)?,
            config: read_config_manifest(&package)?,
            commands: read_command_manifest(&package)?,
        };
        let backup_id = create_backup(
            self.layout,
            &plan.files,
            &self.host.app_version,
            &manifest.version,
        )?;
        self.backup_id = Some(backup_id.clone());

        self.enter(UpdateStage::ApplyingFiles);
        let files = apply_file_changes(self.layout, &package, &plan.files, &manifest.version)?;

        self.enter(UpdateStage::RunningMigrations);
        let migrations = apply_migrations(
            self.layout,
            &package,
            &plan.migrations,
            self.services.migrations,
        )?;

        self.enter(UpdateStage::ApplyingConfig);
        let config_files = apply_config_files(self.layout, &package, &plan.config)?;

        self.enter(UpdateStage::RunningCommands);
        let failed_commands = run_post_update_commands(&plan.commands, self.services.commands);

        Ok(UpdateReport {
            version: manifest.version.clone(),
            name: manifest.display_name(),
            backup_id,
            files,
            migrations,
            config_files,
            failed_commands,
            history_id: None,
        })
    }

    fn verify_signature(&self) -> Result<(), UpdateError> {
        let SignaturePolicy::Required { public_key_hex } = &self.services.signature else {
            return Ok(());
        };
        if public_key_hex.trim().is_empty() {
            return Err(UpdateError::Signature(
                "signature verification is enabled but no public key is configured".to_string(),
            ));
        }
        match verify_detached_signature_file(self.archive_path, public_key_hex) {
            Ok(true) => {
                info!(archive = %self.archive_path.display(), "update package signature verified");
                Ok(())
            }
            Ok(false) => Err(UpdateError::Signature(format!(
                "signature does not match {}",
                self.archive_path.display()
            ))),
            Err(err) => Err(UpdateError::Signature(format!("{err:#}"))),
        }
    }

    fn succeed(&mut self, mut report: UpdateReport) -> UpdateReport {
        self.enter(UpdateStage::Succeeded);
        let mut metadata = self.base_metadata();
        metadata.insert("filesAdded".to_string(), Value::from(report.files.added));
        metadata.insert("filesModified".to_string(), Value::from(report.files.modified));
        metadata.insert("filesDeleted".to_string(), Value::from(report.files.deleted));
        if !report.failed_commands.is_empty() {
            metadata.insert(
                "failedCommands".to_string(),
                Value::from(report.failed_commands.clone()),
            );
        }

        report.history_id = self
            .write_history(true, metadata, Some(report.backup_id.clone()))
            .map(|record| record.id);
        info!(
            version = %report.version,
            backup_id = %report.backup_id,
            "update applied"
        );
        report
    }

    fn fail(&mut self, err: UpdateError) -> UpdateFailure {
        let stage = self.stage;
        let message = err.to_string();
        let code = err.code();
        error!(stage = stage.as_str(), code, error = %message, "update failed");
        self.enter(UpdateStage::Failed);

        let restore = match self.backup_id.clone() {
            Some(backup_id) => {
                self.enter(UpdateStage::RestoringBackup);
                match restore_files(self.layout, &backup_id, self.layout.root()) {
                    Ok(files) => {
                        info!(backup_id = %backup_id, files, "restored backup after failed update");
                        RestoreStatus::Restored { files }
                    }
                    Err(restore_err) => {
                        error!(
                            backup_id = %backup_id,
                            error = %restore_err,
                            "failed to restore backup after failed update"
                        );
                        RestoreStatus::Failed(restore_err.to_string())
                    }
                }
            }
            _ => RestoreStatus::NotAttempted,
        };

        if self.manifest.is_some() {
            let mut metadata = self.base_metadata();
            metadata.insert("error".to_string(), Value::from(message.clone()));
            metadata.insert("error_code".to_string(), Value::from(code));
            metadata.insert("error_stage".to_string(), Value::from(stage.as_str()));
            if let RestoreStatus::Failed(detail) = &restore {
                metadata.insert("restore_error".to_string(), Value::from(detail.clone()));
            }
            self.write_history(false, metadata, self.backup_id.clone());
        }

        UpdateFailure {
            message,
            code,
            stage,
            version: self.manifest.as_ref().map(|manifest| manifest.version.clone()),
            backup_id: self.backup_id.clone(),
            restore,
        }
    }

    fn base_metadata(&self) -> BTreeMap<String, Value> {
        let mut metadata = BTreeMap::new();
        if let Some(manifest) = &self.manifest {
            metadata.insert(
                "requiredRuntimeVersion".to_string(),
                Value::from(manifest.required_runtime_version.clone()),
            );
            metadata.insert(
                "requiredFrameworkVersion".to_string(),
                Value::from(manifest.required_framework_version.clone()),
            );
            metadata.insert(
                "minimumRequiredVersion".to_string(),
                Value::from(manifest.minimum_required_version.clone()),
            );
        }
        metadata.insert(
            "previousVersion".to_string(),
            Value::from(self.host.app_version.clone()),
        );
        metadata.insert(
            "package_sha256".to_string(),
            Value::from(self.package_sha256.clone()),
        );
        metadata
    }

    /// A history failure never changes the outcome; it is logged and `None` is returned.
    fn write_history(
        &self,
        successful: bool,
        metadata: BTreeMap<String, Value>,
        backup_id: Option<String>,
    ) -> Option<UpdateHistoryRecord> {
        let manifest = self.manifest.as_ref()?;
        let record = UpdateHistoryRecord {
            id: 0,
            version: manifest.version.clone(),
            name: manifest.display_name(),
            description: manifest.description.clone(),
            applied_by: self.services.actor.current_actor(),
            metadata,
            applied_at: Utc::now(),
            successful,
            backup_id,
        };
        match self.services.history.record(record) {
            Ok(record) => Some(record),
            Err(err) => {
                error!(
                    version = %manifest.version,
                    error = %format!("{err:#}"),
                    "failed to write update history"
                );
                None
            }
        }
    }
}

/// Copies listed migrations into the host's migrations directory, then runs them once.
fn apply_migrations(
    layout: &InstallLayout,
    package: &PackageLayout,
    manifest: &MigrationManifest,
    runner: &dyn MigrationRunner,
) -> Result<usize, UpdateError> {
    if manifest.migrations.is_empty() {
        return Ok(0);
    }

    for name in &manifest.migrations {
        let relative = validated_relative_path(name)
            .map_err(|err| UpdateError::Migration(format!("{err:#}")))?;
        let source = package.migrations_dir().join(&relative);
        if !source.is_file() {
            return Err(UpdateError::Migration(format!(
                "migration file not found in package: {name}"
            )));
        }
        copy_file_creating_parents(&source, &layout.migrations_dir().join(&relative))
            .map_err(|err| UpdateError::Migration(format!("{err:#}")))?;
    }

    let output = runner
        .run_pending()
        .map_err(|err| UpdateError::Migration(format!("{err:#}")))?;
    info!(count = manifest.migrations.len(), output = %output, "ran migrations");
    Ok(manifest.migrations.len())
}

fn apply_config_files(
    layout: &InstallLayout,
    package: &PackageLayout,
    manifest: &ConfigManifest,
) -> Result<usize, UpdateError> {
    for name in &manifest.config_files {
        let relative =
            validated_relative_path(name).map_err(|err| UpdateError::Config(format!("{err:#}")))?;
        let source = package.config_dir().join(&relative);
        if !source.is_file() {
            return Err(UpdateError::Config(format!(
                "config file not found in package: {name}"
            )));
        }
        copy_file_creating_parents(&source, &layout.config_dir().join(&relative))
            .map_err(|err| UpdateError::Config(format!("{err:#}")))?;
    }
    if !manifest.config_files.is_empty() {
        info!(count = manifest.config_files.len(), "applied config files");
    }
    Ok(manifest.config_files.len())
}

/// Returns the commands that did not succeed; none of them stop the update.
fn run_post_update_commands(manifest: &CommandManifest, runner: &dyn CommandRunner) -> Vec<String> {
    let mut failed = Vec::new();
    for command in &manifest.post_update_commands {
        match runner.run(command) {
            Ok(0) => info!(command = %command, "post-update command succeeded"),
            Ok(exit_code) => {
                error!(command = %command, exit_code, "post-update command failed");
                failed.push(command.clone());
            }
            Err(err) => {
                error!(command = %command, error = %format!("{err:#}"), "post-update command failed");
                failed.push(command.clone());
            }
        }
    }
    failed
}

/// Scratch directory for one extraction, removed when dropped.
struct ExtractionWorkspace {
    path: PathBuf,
}

impl ExtractionWorkspace {
    fn create(layout: &InstallLayout) -> Result<Self, UpdateError> {
        let path = layout.updates_dir().join(format!(
            "update_{}_{}",
            std::process::id(),
            Uuid::new_v4().simple()
        ));
        fs::create_dir_all(&path)
            .with_context(|| format!("failed to create extraction workspace {}", path.display()))
            .map_err(UpdateError::io)?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ExtractionWorkspace {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_dir_all(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %err, "failed to remove extraction workspace");
            }
        }
    }
}

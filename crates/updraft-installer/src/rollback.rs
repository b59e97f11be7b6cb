use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::Value;
use tracing::{error, info};
use updraft_core::{HostEnvironment, UpdateError};

use crate::backups::{backup_exists, create_safety_backup, get_backup_info, restore_files};
use crate::fs_utils::{current_unix_timestamp, generate_backup_id};
use crate::history::{HistoryStore, UpdateHistoryRecord};
use crate::layout::InstallLayout;
use crate::steps::ActorResolver;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackReport {
    pub backup_id: String,
    pub safety_backup_id: String,
    pub previous_version: String,
    pub target_version: String,
    pub restored_files: usize,
    pub history_id: u64,
}

/// Rolls back to `backup_id`, logging any failure. Returns whether the rollback completed.
pub fn rollback_to_backup(
    layout: &InstallLayout,
    host: &HostEnvironment,
    history: &dyn HistoryStore,
    actor: &dyn ActorResolver,
    backup_id: &str,
) -> bool {
    match try_rollback_to_backup(layout, host, history, actor, backup_id) {
        Ok(_) => true,
        Err(err) => {
            error!(backup_id, code = err.code(), error = %err, "rollback failed");
            false
        }
    }
}

/// Restores the files saved in `backup_id` over the installation and records the rollback as a
/// new history entry. A metadata-only safety backup is written first.
///
/// Not transactional: a failure part-way leaves already restored files in place.
pub fn try_rollback_to_backup(
    layout: &InstallLayout,
    host: &HostEnvironment,
    history: &dyn HistoryStore,
    actor: &dyn ActorResolver,
    backup_id: &str,
) -> Result<RollbackReport, UpdateError> {
    if !backup_exists(layout, backup_id) {
        return Err(UpdateError::BackupNotFound(backup_id.to_string()));
    }

    let safety_backup_id = generate_backup_id(Utc::now());
    let previous_version = host.app_version.clone();
    let target = get_backup_info(layout, backup_id)?;
    info!(
        backup_id,
        from_version = %previous_version,
        to_version = %target.version,
        "starting rollback"
    );

    create_safety_backup(layout, &safety_backup_id, &previous_version, &target.version)?;
    let restored_files = restore_files(layout, backup_id, layout.root())?;

    let metadata = BTreeMap::from([
        ("rollback".to_string(), Value::Bool(true)),
        ("backupId".to_string(), Value::from(backup_id)),
        (
            "safetyBackupId".to_string(),
            Value::from(safety_backup_id.clone()),
        ),
        (
            "timestamp".to_string(),
            Value::from(current_unix_timestamp()),
        ),
    ]);
    let record = history
        .record(UpdateHistoryRecord {
            id: 0,
            version: target.version.clone(),
            name: format!("Rollback to backup: {backup_id}"),
            description: Some("System rollback to a previous version".to_string()),
            applied_by: actor.current_actor(),
            metadata,
            applied_at: Utc::now(),
            successful: true,
            backup_id: Some(safety_backup_id.clone()),
        })
        .map_err(|err| UpdateError::History(format!("{err:#}")))?;

    info!(
        backup_id,
        safety_backup_id = %safety_backup_id,
        files = restored_files,
        "rollback completed"
    );
    Ok(RollbackReport {
        backup_id: backup_id.to_string(),
        safety_backup_id,
        previous_version,
        target_version: target.version,
        restored_files,
        history_id: record.id,
    })
}

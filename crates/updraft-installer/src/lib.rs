mod backups;
mod files;
mod fs_utils;
mod history;
mod layout;
mod rollback;
mod steps;
mod update;

pub use backups::{
    backup_exists, create_backup, create_safety_backup, get_backup_info, list_backups,
    restore_files, BackupEntry, BackupInfo, BackupKind,
};
pub use files::{apply_file_changes, read_vendor_ledger, FileApplyReport, VendorLedgerEntry};
pub use fs_utils::{current_unix_timestamp, generate_backup_id, remove_file_if_exists};
pub use history::{HistoryStore, JsonlHistoryStore, UpdateHistoryRecord};
pub use layout::InstallLayout;
pub use rollback::{rollback_to_backup, try_rollback_to_backup, RollbackReport};
pub use steps::{
    ActorResolver, CommandRunner, EnvActorResolver, MigrationRunner, ProcessCommandRunner,
    ProcessMigrationRunner,
};
pub use update::{
    process_update, RestoreStatus, SignaturePolicy, UpdateFailure, UpdateOutcome, UpdateReport,
    UpdateServices, UpdateStage,
};

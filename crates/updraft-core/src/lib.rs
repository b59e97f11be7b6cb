mod archive;
mod compat;
mod error;
mod manifest;
mod package;

pub use archive::{extract_package, ArchiveError, ArchiveFailure};
pub use compat::{
    check_version_compatibility, parse_lenient_version, Compatibility, HostEnvironment,
};
pub use error::UpdateError;
pub use manifest::{
    validated_relative_path, CommandManifest, ConfigManifest, FileChange, FileManifest,
    MigrationManifest, UpdateManifest,
};
pub use package::{
    read_command_manifest, read_config_manifest, read_file_manifest, read_main_manifest,
    read_migration_manifest, validate_structure, PackageLayout, BACKUP_INFO_FILE,
};

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use zip::result::ZipError;
use zip::ZipArchive;

/// Why an update archive could not be opened or unpacked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveFailure {
    NotFound,
    NotAnArchive,
    ReadError,
    WriteError,
    SeekError,
    CrcMismatch,
    UnsupportedCompression(String),
    OutOfMemory,
    PermissionDenied,
    Inconsistent(String),
    Other(String),
}

impl fmt::Display for ArchiveFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => f.write_str("No such file"),
            Self::NotAnArchive => f.write_str("Not a ZIP archive"),
            Self::ReadError => f.write_str("Read error"),
            Self::WriteError => f.write_str("Write error"),
            Self::SeekError => f.write_str("Seek error"),
            Self::CrcMismatch => f.write_str("CRC error"),
            Self::UnsupportedCompression(detail) => {
                write!(f, "Compression method not supported ({detail})")
            }
            Self::OutOfMemory => f.write_str("Memory allocation failure"),
            Self::PermissionDenied => f.write_str("Permission denied"),
            Self::Inconsistent(detail) => write!(f, "ZIP archive inconsistent ({detail})"),
            Self::Other(detail) => write!(f, "Unknown error ({detail})"),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{reason}: {}", .path.display())]
pub struct ArchiveError {
    pub path: PathBuf,
    pub reason: ArchiveFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    Extract,
}

/// Unpacks `archive_path` into `dest_dir`, preserving relative paths.
///
/// A failed extraction may leave `dest_dir` partially populated; callers must discard it.
pub fn extract_package(archive_path: &Path, dest_dir: &Path) -> Result<(), ArchiveError> {
    let fail = |reason: ArchiveFailure| ArchiveError {
        path: archive_path.to_path_buf(),
        reason,
    };

    if !archive_path.exists() {
        return Err(fail(ArchiveFailure::NotFound));
    }

    let file = File::open(archive_path).map_err(|err| fail(classify_io(&err, Phase::Open)))?;
    let mut archive = ZipArchive::new(BufReader::new(file))
        .map_err(|err| fail(classify_zip(err, Phase::Open)))?;

    fs::create_dir_all(dest_dir).map_err(|err| fail(classify_io(&err, Phase::Extract)))?;
    debug!(
        archive = %archive_path.display(),
        destination = %dest_dir.display(),
        entries = archive.len(),
        "extracting update package"
    );
    archive
        .extract(dest_dir)
        .map_err(|err| fail(classify_zip(err, Phase::Extract)))?;

    Ok(())
}

fn classify_zip(err: ZipError, phase: Phase) -> ArchiveFailure {
    match err {
        ZipError::Io(io_err) => classify_io(&io_err, phase),
        ZipError::InvalidArchive(detail) => match phase {
            Phase::Open => ArchiveFailure::NotAnArchive,
            Phase::Extract => ArchiveFailure::Inconsistent(detail.to_string()),
        },
        ZipError::UnsupportedArchive(detail) => {
            ArchiveFailure::UnsupportedCompression(detail.to_string())
        }
        ZipError::FileNotFound => {
            ArchiveFailure::Inconsistent("entry listed but not present".to_string())
        }
        other => ArchiveFailure::Other(other.to_string()),
    }
}

fn classify_io(err: &io::Error, phase: Phase) -> ArchiveFailure {
    let message = err.to_string().to_ascii_lowercase();
    match err.kind() {
        io::ErrorKind::NotFound => ArchiveFailure::NotFound,
        io::ErrorKind::PermissionDenied => ArchiveFailure::PermissionDenied,
        io::ErrorKind::OutOfMemory => ArchiveFailure::OutOfMemory,
        _ if message.contains("checksum") || message.contains("crc") => {
            ArchiveFailure::CrcMismatch
        }
        _ if message.contains("seek") => ArchiveFailure::SeekError,
        io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData => ArchiveFailure::ReadError,
        _ => match phase {
            Phase::Open => ArchiveFailure::ReadError,
            Phase::Extract => ArchiveFailure::WriteError,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::{classify_io, ArchiveFailure, Phase};
    use std::io;

    #[test]
    fn classify_io_maps_well_known_kinds() {
        let not_found = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert_eq!(
            classify_io(&not_found, Phase::Open),
            ArchiveFailure::NotFound
        );

        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        assert_eq!(
            classify_io(&denied, Phase::Extract),
            ArchiveFailure::PermissionDenied
        );

        let crc = io::Error::new(io::ErrorKind::Other, "Invalid checksum");
        assert_eq!(classify_io(&crc, Phase::Extract), ArchiveFailure::CrcMismatch);
    }

    #[test]
    fn classify_io_falls_back_on_phase() {
        let generic = io::Error::new(io::ErrorKind::Other, "disk hiccup");
        assert_eq!(classify_io(&generic, Phase::Open), ArchiveFailure::ReadError);
        assert_eq!(
            classify_io(&generic, Phase::Extract),
            ArchiveFailure::WriteError
        );
    }
}

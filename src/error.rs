use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Everything that can go wrong while fingerprinting a tree.
///
/// Run-level conditions (`InvalidRoot`, `UnsupportedAlgorithm`,
/// `InvalidPattern`, `Interrupted`, `Output`) abort before any artifact is
/// written. Per-file conditions (`NonUtf8Path`, `NotFound`, `Io`) are caught
/// by the engine, logged, and the file is left out of the fingerprint.
#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("'{}' is not a valid directory", path.display())]
    InvalidRoot { path: PathBuf },

    #[error("unsupported hash algorithm '{name}' (expected one of: {supported})")]
    UnsupportedAlgorithm { name: String, supported: String },

    #[error("invalid exclude pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("file name is not valid UTF-8: '{}'", path.display())]
    NonUtf8Path { path: PathBuf },

    #[error("file not found: '{}'", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("fingerprinting interrupted")]
    Interrupted,

    #[error("failed to write '{}': {source}", path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FingerprintError {
    /// Maps an I/O error on `path` to `NotFound` or `Io`.
    pub fn from_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::NotFound {
            FingerprintError::NotFound { path }
        } else {
            FingerprintError::Io { path, source }
        }
    }

    /// Whether this error aborts the whole run rather than a single file.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            FingerprintError::NonUtf8Path { .. }
                | FingerprintError::NotFound { .. }
                | FingerprintError::Io { .. }
        )
    }
}

pub type Result<T, E = FingerprintError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_io_errors_become_not_found() {
        let err = FingerprintError::from_io("gone.txt", io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(err, FingerprintError::NotFound { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn other_io_errors_stay_io() {
        let err = FingerprintError::from_io(
            "locked.txt",
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert!(matches!(err, FingerprintError::Io { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn undecodable_names_are_per_file() {
        let err = FingerprintError::NonUtf8Path {
            path: PathBuf::from("bad"),
        };
        assert!(!err.is_fatal());
    }

    #[test]
    fn run_level_errors_are_fatal() {
        assert!(FingerprintError::Interrupted.is_fatal());
        assert!(
            FingerprintError::InvalidRoot {
                path: PathBuf::from("nope")
            }
            .is_fatal()
        );
    }

    #[test]
    fn messages_name_the_offending_input() {
        let err = FingerprintError::InvalidRoot {
            path: PathBuf::from("missing/dir"),
        };
        assert_eq!(err.to_string(), "'missing/dir' is not a valid directory");
    }
}

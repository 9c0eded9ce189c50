//! Error taxonomy for release verification.
//!
//! [`RejectReason`] covers every way a run can end in `Failed`; each variant
//! is routed through the pipeline's single failure transition. [`VerifyError`]
//! covers the cases where a run never starts.

use release_state::{ReleaseId, StorageError};

/// Why a verification run rejected a release.
///
/// The `Display` form starts with the kind name so the release log and
/// notifications carry a stable, searchable token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    #[error("OversizedArtifact: file is {size} bytes, limit is {limit} bytes")]
    OversizedArtifact { size: u64, limit: u64 },

    #[error("UnsupportedFormat: unknown or disallowed file type '{extension}'")]
    UnsupportedFormat { extension: String },

    #[error("InvalidExecutableHeader: {0}")]
    InvalidExecutableHeader(String),

    #[error("InvalidArchive: {0}")]
    InvalidArchive(String),

    #[error(
        "ArchiveBombSuspected: uncompressed size {uncompressed} exceeds {max_ratio}x compressed size {compressed}"
    )]
    ArchiveBombSuspected {
        compressed: u64,
        uncompressed: u64,
        max_ratio: u64,
    },

    #[error("MissingManifest: archive has no {expected}")]
    MissingManifest { expected: String },

    #[error("UnsafeArchiveEntry: unsafe path reference in archive: {entry}")]
    UnsafeArchiveEntry { entry: String },

    #[error("MalwareDetected: {verdict}")]
    MalwareDetected { verdict: String },

    #[error("Cancelled: verification was cancelled")]
    Cancelled,

    #[error("Unexpected: {0}")]
    Unexpected(String),
}

impl RejectReason {
    /// Stable kind name, matching the leading token of the `Display` form.
    pub fn kind(&self) -> &'static str {
        match self {
            RejectReason::OversizedArtifact { .. } => "OversizedArtifact",
            RejectReason::UnsupportedFormat { .. } => "UnsupportedFormat",
            RejectReason::InvalidExecutableHeader(_) => "InvalidExecutableHeader",
            RejectReason::InvalidArchive(_) => "InvalidArchive",
            RejectReason::ArchiveBombSuspected { .. } => "ArchiveBombSuspected",
            RejectReason::MissingManifest { .. } => "MissingManifest",
            RejectReason::UnsafeArchiveEntry { .. } => "UnsafeArchiveEntry",
            RejectReason::MalwareDetected { .. } => "MalwareDetected",
            RejectReason::Cancelled => "Cancelled",
            RejectReason::Unexpected(_) => "Unexpected",
        }
    }

    /// Wrap an unanticipated fault.
    pub fn unexpected(err: impl std::fmt::Display) -> Self {
        RejectReason::Unexpected(err.to_string())
    }

    pub fn is_unexpected(&self) -> bool {
        matches!(self, RejectReason::Unexpected(_))
    }
}

impl From<StorageError> for RejectReason {
    fn from(err: StorageError) -> Self {
        RejectReason::unexpected(err)
    }
}

impl From<std::io::Error> for RejectReason {
    fn from(err: std::io::Error) -> Self {
        RejectReason::unexpected(err)
    }
}

/// Errors returned before a verification run starts.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("release {release_id} is already being verified")]
    AlreadyRunning { release_id: ReleaseId },

    #[error("release {release_id} has already passed verification")]
    AlreadyVerified { release_id: ReleaseId },

    #[error("could not claim release {release_id}: record kept changing")]
    ClaimConflict { release_id: ReleaseId },

    #[error("dispatcher is no longer accepting runs")]
    DispatcherClosed,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for verification entry points.
pub type Result<T> = std::result::Result<T, VerifyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_leads_with_kind() {
        let reasons = vec![
            RejectReason::OversizedArtifact { size: 2, limit: 1 },
            RejectReason::UnsupportedFormat {
                extension: "dmg".to_string(),
            },
            RejectReason::InvalidExecutableHeader("missing MZ".to_string()),
            RejectReason::InvalidArchive("bad central directory".to_string()),
            RejectReason::ArchiveBombSuspected {
                compressed: 1,
                uncompressed: 1000,
                max_ratio: 100,
            },
            RejectReason::MissingManifest {
                expected: "AndroidManifest.xml".to_string(),
            },
            RejectReason::UnsafeArchiveEntry {
                entry: "../evil".to_string(),
            },
            RejectReason::MalwareDetected {
                verdict: "Eicar-Test-Signature".to_string(),
            },
            RejectReason::Cancelled,
            RejectReason::Unexpected("boom".to_string()),
        ];
        for reason in reasons {
            assert!(
                reason.to_string().starts_with(reason.kind()),
                "{reason} should start with {}",
                reason.kind()
            );
        }
    }

    #[test]
    fn test_storage_error_is_unexpected() {
        let reason: RejectReason = StorageError::Backend("down".to_string()).into();
        assert!(reason.is_unexpected());
        assert!(reason.to_string().contains("down"));
    }

    #[test]
    fn test_verify_error_display() {
        let err = VerifyError::AlreadyRunning {
            release_id: ReleaseId::from("rel-9"),
        };
        assert!(err.to_string().contains("rel-9"));
        assert!(err.to_string().contains("already being verified"));
    }
}

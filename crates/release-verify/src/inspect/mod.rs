//! Format inspectors for submitted artifacts.
//!
//! Each inspector takes a file path and either returns diagnostics for the
//! release log or a [`RejectReason`]. Inspectors are synchronous and do
//! blocking file I/O; the pipeline runs them on the blocking pool.

pub mod executable;
pub mod gzip;
pub mod package;
pub mod tarball;

use std::path::{Path, PathBuf};

use crate::error::RejectReason;

pub use package::PackageKind;

/// Largest tolerated `uncompressed / compressed` ratio for archives.
pub const MAX_COMPRESSION_RATIO: u64 = 100;

/// Diagnostics produced by a successful inspection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inspection {
    pub lines: Vec<String>,
}

impl Inspection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a diagnostic line.
    pub fn note(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }
}

/// Container family selected from a release's extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    Executable,
    Package(PackageKind),
    TarGz,
    Gzip,
}

impl ArtifactFormat {
    /// Map a lower-cased extension (no leading dot) to its format.
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension {
            "exe" => Some(ArtifactFormat::Executable),
            "tar.gz" | "tgz" => Some(ArtifactFormat::TarGz),
            "gz" => Some(ArtifactFormat::Gzip),
            other => PackageKind::from_extension(other).map(ArtifactFormat::Package),
        }
    }
}

/// Best-effort MIME type for diagnostics. Never used to gate a decision.
pub fn guess_mime(extension: &str) -> Option<&'static str> {
    match extension {
        "exe" => Some("application/vnd.microsoft.portable-executable"),
        "apk" => Some("application/vnd.android.package-archive"),
        "aab" | "ipa" | "zip" => Some("application/zip"),
        "tar.gz" | "tgz" => Some("application/x-gtar"),
        "gz" => Some("application/gzip"),
        _ => None,
    }
}

/// Whether an archive entry name could escape the extraction root.
///
/// Flags absolute paths (`/`, `\`, drive letters) and any `..` segment.
pub fn is_unsafe_entry_name(name: &str) -> bool {
    if name.starts_with('/') || name.starts_with('\\') {
        return true;
    }
    let bytes = name.as_bytes();
    if let (Some(drive), Some(b':')) = (bytes.first(), bytes.get(1)) {
        if drive.is_ascii_alphabetic() {
            return true;
        }
    }
    name.split(|c| c == '/' || c == '\\').any(|seg| seg == "..")
}

/// Structural inspection seam used by the pipeline.
pub trait ArtifactInspector: Send + Sync {
    /// Inspect the artifact at `path` whose declared extension is `extension`.
    fn inspect(&self, path: &Path, extension: &str) -> Result<Inspection, RejectReason>;
}

/// Production inspector dispatching on [`ArtifactFormat`].
#[derive(Debug, Clone, Default)]
pub struct FormatInspectors {
    scratch_dir: Option<PathBuf>,
}

impl FormatInspectors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory for temporary decompressed payloads (defaults to the
    /// system temp dir).
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }
}

impl ArtifactInspector for FormatInspectors {
    fn inspect(&self, path: &Path, extension: &str) -> Result<Inspection, RejectReason> {
        match ArtifactFormat::from_extension(extension) {
            Some(ArtifactFormat::Executable) => executable::inspect_executable(path),
            Some(ArtifactFormat::Package(kind)) => package::inspect_package(path, kind),
            Some(ArtifactFormat::TarGz) => tarball::inspect_tarball(path),
            Some(ArtifactFormat::Gzip) => gzip::inspect_gzip(path, self.scratch_dir.as_deref()),
            None => Err(RejectReason::UnsupportedFormat {
                extension: extension.to_string(),
            }),
        }
    }
}

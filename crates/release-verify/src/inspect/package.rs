//! Zip-container package inspection (`apk`, `aab`, `ipa`).
//!
//! Checks run in a fixed order and stop at the first failure:
//! 1. every entry name is safe (no traversal, no absolute path)
//! 2. total uncompressed/compressed ratio is within [`MAX_COMPRESSION_RATIO`]
//! 3. the platform manifest is present

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use super::{is_unsafe_entry_name, Inspection, MAX_COMPRESSION_RATIO};
use crate::error::RejectReason;

/// Zip-based package family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageKind {
    /// Android application package
    Apk,
    /// Android app bundle
    Aab,
    /// iOS application archive
    Ipa,
}

impl PackageKind {
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension {
            "apk" => Some(PackageKind::Apk),
            "aab" => Some(PackageKind::Aab),
            "ipa" => Some(PackageKind::Ipa),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            PackageKind::Apk => "apk",
            PackageKind::Aab => "aab",
            PackageKind::Ipa => "ipa",
        }
    }

    /// Human-readable name of the required manifest entry.
    pub fn manifest_description(&self) -> &'static str {
        match self {
            PackageKind::Apk | PackageKind::Aab => "AndroidManifest.xml",
            PackageKind::Ipa => "Payload/ directory",
        }
    }

    fn has_manifest(&self, names: &[String]) -> bool {
        match self {
            PackageKind::Apk => names.iter().any(|n| n == "AndroidManifest.xml"),
            PackageKind::Aab => names
                .iter()
                .any(|n| n == "AndroidManifest.xml" || n == "base/manifest/AndroidManifest.xml"),
            PackageKind::Ipa => names.iter().any(|n| n.starts_with("Payload/")),
        }
    }
}

/// Inspect a package archive on disk.
pub fn inspect_package(path: &Path, kind: PackageKind) -> Result<Inspection, RejectReason> {
    let file = File::open(path)?;
    let mut inspection = Inspection::new();
    inspection.note(format!(
        "Checking ZIP archive with extension .{}.",
        kind.extension()
    ));
    inspect_package_reader(BufReader::new(file), kind, &mut inspection)?;
    Ok(inspection)
}

/// Run the package checks against any seekable zip source.
pub fn inspect_package_reader<R: Read + Seek>(
    reader: R,
    kind: PackageKind,
    inspection: &mut Inspection,
) -> Result<(), RejectReason> {
    let mut archive = zip::ZipArchive::new(reader).map_err(invalid_archive)?;

    let mut names = Vec::with_capacity(archive.len());
    let mut compressed: u64 = 0;
    let mut uncompressed: u64 = 0;
    for index in 0..archive.len() {
        let entry = archive.by_index_raw(index).map_err(invalid_archive)?;
        let name = entry.name().to_string();
        if is_unsafe_entry_name(&name) {
            return Err(RejectReason::UnsafeArchiveEntry { entry: name });
        }
        compressed = compressed.saturating_add(entry.compressed_size());
        uncompressed = uncompressed.saturating_add(entry.size());
        names.push(name);
    }
    inspection.note(format!("ZIP archive contains {} entries.", names.len()));
    inspection.note(format!(
        "Compressed size: {compressed}, uncompressed size: {uncompressed}"
    ));

    if exceeds_ratio(compressed, uncompressed) {
        return Err(RejectReason::ArchiveBombSuspected {
            compressed,
            uncompressed,
            max_ratio: MAX_COMPRESSION_RATIO,
        });
    }

    if !kind.has_manifest(&names) {
        return Err(RejectReason::MissingManifest {
            expected: kind.manifest_description().to_string(),
        });
    }
    inspection.note(format!("Found {}.", kind.manifest_description()));
    Ok(())
}

/// `uncompressed / compressed > MAX_COMPRESSION_RATIO`, without division.
///
/// An archive whose entries compress to zero bytes has no meaningful ratio.
pub(crate) fn exceeds_ratio(compressed: u64, uncompressed: u64) -> bool {
    compressed > 0
        && u128::from(uncompressed) > u128::from(compressed) * u128::from(MAX_COMPRESSION_RATIO)
}

fn invalid_archive(err: zip::result::ZipError) -> RejectReason {
    RejectReason::InvalidArchive(err.to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;
    use zip::CompressionMethod;

    /// Build a zip in memory from `(name, contents)` pairs.
    pub(crate) fn build_zip(entries: &[(&str, &[u8])], method: CompressionMethod) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(method);
        for (name, data) in entries {
            writer.start_file(*name, options).expect("start file");
            writer.write_all(data).expect("write entry");
        }
        writer.finish().expect("finish zip").into_inner()
    }

    fn inspect_bytes(bytes: Vec<u8>, kind: PackageKind) -> Result<Inspection, RejectReason> {
        let mut inspection = Inspection::new();
        inspect_package_reader(Cursor::new(bytes), kind, &mut inspection)?;
        Ok(inspection)
    }

    #[test]
    fn test_valid_apk_passes() {
        let bytes = build_zip(
            &[
                ("AndroidManifest.xml", b"<manifest/>".as_slice()),
                ("classes.dex", b"dex\n035".as_slice()),
            ],
            CompressionMethod::Stored,
        );
        let inspection = inspect_bytes(bytes, PackageKind::Apk).expect("inspect");
        assert!(inspection.lines.iter().any(|l| l.contains("2 entries")));
    }

    #[test]
    fn test_valid_ipa_passes() {
        let bytes = build_zip(
            &[("Payload/Demo.app/Info.plist", b"<plist/>".as_slice())],
            CompressionMethod::Stored,
        );
        assert!(inspect_bytes(bytes, PackageKind::Ipa).is_ok());
    }

    #[test]
    fn test_aab_accepts_module_manifest() {
        let bytes = build_zip(
            &[("base/manifest/AndroidManifest.xml", b"<manifest/>".as_slice())],
            CompressionMethod::Stored,
        );
        assert!(inspect_bytes(bytes, PackageKind::Aab).is_ok());
    }

    #[test]
    fn test_missing_manifest_rejected() {
        let bytes = build_zip(&[("classes.dex", b"dex".as_slice())], CompressionMethod::Stored);
        let err = inspect_bytes(bytes, PackageKind::Apk).unwrap_err();
        assert_eq!(err.kind(), "MissingManifest");

        let bytes = build_zip(&[("AndroidManifest.xml", b"x".as_slice())], CompressionMethod::Stored);
        let err = inspect_bytes(bytes, PackageKind::Ipa).unwrap_err();
        assert_eq!(err.kind(), "MissingManifest");
    }

    #[test]
    fn test_unsafe_entry_takes_precedence_over_manifest_and_ratio() {
        let zeros = vec![0u8; 1024 * 1024];
        let bytes = build_zip(
            &[("bomb.bin", zeros.as_slice()), ("../evil", b"x".as_slice())],
            CompressionMethod::Deflated,
        );
        let err = inspect_bytes(bytes, PackageKind::Apk).unwrap_err();
        assert_eq!(
            err,
            RejectReason::UnsafeArchiveEntry {
                entry: "../evil".to_string()
            }
        );
    }

    #[test]
    fn test_absolute_entry_rejected() {
        let bytes = build_zip(
            &[("AndroidManifest.xml", b"x".as_slice()), ("/etc/cron.d/job", b"x".as_slice())],
            CompressionMethod::Stored,
        );
        let err = inspect_bytes(bytes, PackageKind::Apk).unwrap_err();
        assert_eq!(err.kind(), "UnsafeArchiveEntry");
    }

    #[test]
    fn test_high_ratio_rejected_before_manifest() {
        let zeros = vec![0u8; 4 * 1024 * 1024];
        let bytes = build_zip(&[("bomb.bin", zeros.as_slice())], CompressionMethod::Deflated);
        let err = inspect_bytes(bytes, PackageKind::Apk).unwrap_err();
        assert_eq!(err.kind(), "ArchiveBombSuspected");
    }

    #[test]
    fn test_corrupt_zip_rejected() {
        let err = inspect_bytes(b"PK\x03\x04 truncated".to_vec(), PackageKind::Apk).unwrap_err();
        assert_eq!(err.kind(), "InvalidArchive");
    }

    #[test]
    fn test_ratio_boundary() {
        assert!(!exceeds_ratio(10, 1000));
        assert!(exceeds_ratio(10, 1001));
        assert!(!exceeds_ratio(0, 1_000_000));
        assert!(!exceeds_ratio(u64::MAX, u64::MAX));
    }
}

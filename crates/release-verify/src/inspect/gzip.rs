//! Bare gzip stream inspection.
//!
//! The stream is decompressed into a [`tempfile::NamedTempFile`]. The
//! temporary payload is removed when that handle drops, which covers the
//! success path, every rejection and unwinding alike. A zip payload is then
//! held to the same package checks as a directly submitted package.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use release_state::extension_of;
use tempfile::NamedTempFile;

use super::package::{inspect_package_reader, PackageKind};
use super::{Inspection, MAX_COMPRESSION_RATIO};
use crate::error::RejectReason;

/// Decompressed payloads may always grow to this size, whatever the ratio.
const MIN_DECOMPRESSED_ALLOWANCE: u64 = 1024 * 1024;

const ZIP_LOCAL_HEADER: &[u8; 4] = b"PK\x03\x04";
const ZIP_EMPTY_ARCHIVE: &[u8; 4] = b"PK\x05\x06";

/// Inspect a `.gz` artifact, decompressing into `scratch_dir` (or the system
/// temp dir when `None`).
pub fn inspect_gzip(path: &Path, scratch_dir: Option<&Path>) -> Result<Inspection, RejectReason> {
    let mut inspection = Inspection::new();
    inspection.note("Checking .gz file, attempting to decompress.");

    let compressed = fs::metadata(path)?.len();
    let allowance = compressed
        .saturating_mul(MAX_COMPRESSION_RATIO)
        .max(MIN_DECOMPRESSED_ALLOWANCE);

    let mut builder = tempfile::Builder::new();
    builder.prefix("releasegate-gunzip-");
    let mut payload = match scratch_dir {
        Some(dir) => builder.tempfile_in(dir)?,
        None => builder.tempfile()?,
    };

    // Concatenated members decode as one payload.
    let decoder = MultiGzDecoder::new(BufReader::new(File::open(path)?));
    let written = io::copy(&mut decoder.take(allowance.saturating_add(1)), payload.as_file_mut())
        .map_err(|e| RejectReason::InvalidArchive(format!("could not decompress gzip stream: {e}")))?;
    if written > allowance {
        return Err(RejectReason::ArchiveBombSuspected {
            compressed,
            uncompressed: written,
            max_ratio: MAX_COMPRESSION_RATIO,
        });
    }
    inspection.note(format!(".gz decompressed: {written} bytes"));

    if is_zip(payload.as_file_mut())? {
        let kind = inner_package_kind(path);
        inspection.note(format!(
            "Decompressed payload is a ZIP container, checking as .{}.",
            kind.extension()
        ));
        inspect_package_reader(BufReader::new(payload.as_file()), kind, &mut inspection)?;
    } else {
        inspection.note("No ZIP structure detected.");
    }

    close_payload(payload);
    Ok(inspection)
}

/// Package family implied by the name under the `.gz` suffix, `ipa` when
/// the inner name carries no package extension.
fn inner_package_kind(path: &Path) -> PackageKind {
    path.file_stem()
        .map(|stem| extension_of(Path::new(stem)))
        .and_then(|ext| PackageKind::from_extension(&ext))
        .unwrap_or(PackageKind::Ipa)
}

fn is_zip(file: &mut File) -> Result<bool, RejectReason> {
    file.seek(SeekFrom::Start(0))?;
    let mut magic = [0u8; 4];
    let mut filled = 0;
    while filled < magic.len() {
        let n = file.read(&mut magic[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    file.seek(SeekFrom::Start(0))?;
    Ok(filled == magic.len() && (&magic == ZIP_LOCAL_HEADER || &magic == ZIP_EMPTY_ARCHIVE))
}

fn close_payload(payload: NamedTempFile) {
    let location = payload.path().display().to_string();
    if let Err(e) = payload.close() {
        tracing::warn!(path = %location, error = %e, "failed to remove decompressed payload");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspect::package::tests::build_zip;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use zip::CompressionMethod;

    fn write_gz(dir: &Path, name: &str, payload: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut encoder = GzEncoder::new(File::create(&path).expect("create"), Compression::best());
        encoder.write_all(payload).expect("write");
        encoder.finish().expect("finish");
        path
    }

    fn scratch_is_empty(dir: &Path) -> bool {
        fs::read_dir(dir).expect("read scratch").next().is_none()
    }

    #[test]
    fn test_plain_payload_passes_and_cleans_up() {
        let input = tempfile::tempdir().expect("input dir");
        let scratch = tempfile::tempdir().expect("scratch dir");
        let path = write_gz(input.path(), "notes.txt.gz", b"release notes");

        let inspection = inspect_gzip(&path, Some(scratch.path())).expect("inspect");
        assert!(inspection
            .lines
            .iter()
            .any(|l| l == "No ZIP structure detected."));
        assert!(scratch_is_empty(scratch.path()));
    }

    #[test]
    fn test_zipped_ipa_checked_for_payload() {
        let input = tempfile::tempdir().expect("input dir");
        let scratch = tempfile::tempdir().expect("scratch dir");
        let zip = build_zip(
            &[("Payload/Demo.app/Info.plist", b"<plist/>".as_slice())],
            CompressionMethod::Stored,
        );
        let path = write_gz(input.path(), "demo.ipa.gz", &zip);

        assert!(inspect_gzip(&path, Some(scratch.path())).is_ok());
        assert!(scratch_is_empty(scratch.path()));
    }

    #[test]
    fn test_zipped_package_missing_manifest_rejected_and_cleaned_up() {
        let input = tempfile::tempdir().expect("input dir");
        let scratch = tempfile::tempdir().expect("scratch dir");
        let zip = build_zip(&[("readme.txt", b"hi".as_slice())], CompressionMethod::Stored);
        let path = write_gz(input.path(), "bundle.gz", &zip);

        let err = inspect_gzip(&path, Some(scratch.path())).unwrap_err();
        assert_eq!(err.kind(), "MissingManifest");
        assert!(scratch_is_empty(scratch.path()));
    }

    #[test]
    fn test_inner_extension_selects_package_kind() {
        let input = tempfile::tempdir().expect("input dir");
        let scratch = tempfile::tempdir().expect("scratch dir");
        let zip = build_zip(
            &[("AndroidManifest.xml", b"<manifest/>".as_slice())],
            CompressionMethod::Stored,
        );
        let path = write_gz(input.path(), "app.apk.gz", &zip);

        assert!(inspect_gzip(&path, Some(scratch.path())).is_ok());
    }

    #[test]
    fn test_zipped_traversal_rejected() {
        let input = tempfile::tempdir().expect("input dir");
        let scratch = tempfile::tempdir().expect("scratch dir");
        let zip = build_zip(
            &[
                ("Payload/Demo.app/Info.plist", b"<plist/>".as_slice()),
                ("../evil", b"x".as_slice()),
            ],
            CompressionMethod::Stored,
        );
        let path = write_gz(input.path(), "demo.ipa.gz", &zip);

        let err = inspect_gzip(&path, Some(scratch.path())).unwrap_err();
        assert_eq!(err.kind(), "UnsafeArchiveEntry");
        assert!(scratch_is_empty(scratch.path()));
    }

    #[test]
    fn test_corrupt_stream_rejected_and_cleaned_up() {
        let input = tempfile::tempdir().expect("input dir");
        let scratch = tempfile::tempdir().expect("scratch dir");
        let path = input.path().join("broken.gz");
        fs::write(&path, b"\x1f\x8b\x08\x00garbage-after-magic").expect("write");

        let err = inspect_gzip(&path, Some(scratch.path())).unwrap_err();
        assert_eq!(err.kind(), "InvalidArchive");
        assert!(scratch_is_empty(scratch.path()));
    }

    #[test]
    fn test_decompression_bomb_rejected() {
        let input = tempfile::tempdir().expect("input dir");
        let scratch = tempfile::tempdir().expect("scratch dir");
        let zeros = vec![0u8; 8 * 1024 * 1024];
        let path = write_gz(input.path(), "zeros.bin.gz", &zeros);

        let err = inspect_gzip(&path, Some(scratch.path())).unwrap_err();
        assert_eq!(err.kind(), "ArchiveBombSuspected");
        assert!(scratch_is_empty(scratch.path()));
    }

    #[test]
    fn test_every_gzip_member_is_decompressed() {
        let input = tempfile::tempdir().expect("input dir");
        let scratch = tempfile::tempdir().expect("scratch dir");
        let path = input.path().join("notes.txt.gz");
        let mut file = File::create(&path).expect("create");
        for part in [b"first member ".as_slice(), b"second member".as_slice()] {
            let mut encoder = GzEncoder::new(&mut file, Compression::default());
            encoder.write_all(part).expect("write");
            encoder.finish().expect("finish");
        }
        drop(file);

        let inspection = inspect_gzip(&path, Some(scratch.path())).expect("inspect");
        assert!(inspection
            .lines
            .iter()
            .any(|l| l == ".gz decompressed: 26 bytes"));
    }

    #[test]
    fn test_inner_package_kind_defaults_to_ipa() {
        assert_eq!(inner_package_kind(Path::new("x.apk.gz")), PackageKind::Apk);
        assert_eq!(inner_package_kind(Path::new("x.aab.gz")), PackageKind::Aab);
        assert_eq!(inner_package_kind(Path::new("x.gz")), PackageKind::Ipa);
        assert_eq!(inner_package_kind(Path::new("x.bin.gz")), PackageKind::Ipa);
    }
}

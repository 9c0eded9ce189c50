//! tar+gzip archive inspection.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use flate2::read::GzDecoder;

use super::{is_unsafe_entry_name, Inspection};
use crate::error::RejectReason;

/// Inspect a `.tar.gz` / `.tgz` artifact.
///
/// Enumerates every member without extracting; the first member whose path
/// is absolute or contains a `..` segment rejects the archive.
pub fn inspect_tarball(path: &Path) -> Result<Inspection, RejectReason> {
    let file = File::open(path)?;
    let mut inspection = Inspection::new();
    inspection.note("Checking tar.gz archive.");

    let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    let entries = archive.entries().map_err(corrupt)?;

    let mut count = 0usize;
    for entry in entries {
        let entry = entry.map_err(corrupt)?;
        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        if is_unsafe_entry_name(&name) {
            return Err(RejectReason::UnsafeArchiveEntry { entry: name });
        }
        count += 1;
    }
    inspection.note(format!("tar.gz contains {count} entries."));
    Ok(inspection)
}

fn corrupt(err: std::io::Error) -> RejectReason {
    RejectReason::InvalidArchive(format!("could not read tar.gz: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    /// Write a tar.gz whose members carry the given raw names.
    ///
    /// Names go straight into the header bytes so unsafe paths survive;
    /// `tar::Builder`'s path helpers would refuse them.
    fn write_tarball(names: &[&str]) -> tempfile::NamedTempFile {
        let file = tempfile::Builder::new()
            .suffix(".tar.gz")
            .tempfile()
            .expect("temp file");
        let encoder = GzEncoder::new(file.reopen().expect("reopen"), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for name in names {
            let data = b"payload";
            let mut header = tar::Header::new_gnu();
            {
                let gnu = header.as_gnu_mut().expect("gnu header");
                gnu.name[..name.len()].copy_from_slice(name.as_bytes());
            }
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_entry_type(tar::EntryType::Regular);
            header.set_cksum();
            builder.append(&header, &data[..]).expect("append");
        }
        let encoder = builder.into_inner().expect("tar finish");
        encoder.finish().expect("gzip finish");
        file
    }

    #[test]
    fn test_clean_tarball_passes() {
        let file = write_tarball(&["bin/tool", "share/doc/README"]);
        let inspection = inspect_tarball(file.path()).expect("inspect");
        assert!(inspection.lines.iter().any(|l| l.contains("2 entries")));
    }

    #[test]
    fn test_traversal_member_rejected() {
        let file = write_tarball(&["bin/tool", "../../etc/profile"]);
        let err = inspect_tarball(file.path()).unwrap_err();
        assert_eq!(
            err,
            RejectReason::UnsafeArchiveEntry {
                entry: "../../etc/profile".to_string()
            }
        );
    }

    #[test]
    fn test_absolute_member_rejected() {
        let file = write_tarball(&["/usr/bin/evil"]);
        let err = inspect_tarball(file.path()).unwrap_err();
        assert_eq!(err.kind(), "UnsafeArchiveEntry");
    }

    #[test]
    fn test_corrupt_stream_rejected() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(b"this is not gzip at all").expect("write");
        let err = inspect_tarball(file.path()).unwrap_err();
        assert_eq!(err.kind(), "InvalidArchive");
    }
}

//! Native-executable (PE) header inspection.
//!
//! Parses the DOS stub, PE signature, COFF header and optional header far
//! enough to prove the file is a well-formed PE image and to report its
//! entry point and whether an Authenticode certificate table is present.
//! Certificate presence is informational only.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::Inspection;
use crate::error::RejectReason;

/// Only the leading bytes are read; PE headers live well inside this window.
const HEADER_WINDOW: u64 = 64 * 1024;

const DOS_MAGIC: &[u8; 2] = b"MZ";
const PE_SIGNATURE: &[u8; 4] = b"PE\0\0";
const E_LFANEW_OFFSET: usize = 0x3C;
const COFF_HEADER_LEN: usize = 20;
const PE32_MAGIC: u16 = 0x10b;
const PE32_PLUS_MAGIC: u16 = 0x20b;
const SECURITY_DIRECTORY_INDEX: usize = 4;

/// Fields extracted from a PE image header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeHeader {
    pub machine: u16,
    pub section_count: u16,
    pub pe32_plus: bool,
    pub entry_point: u32,
    pub has_certificate: bool,
}

impl PeHeader {
    /// Parse a PE header from the leading bytes of an image.
    pub fn parse(buf: &[u8]) -> Result<Self, String> {
        if buf.get(..2) != Some(DOS_MAGIC.as_slice()) {
            return Err("missing MZ signature".to_string());
        }
        let pe_offset = read_u32(buf, E_LFANEW_OFFSET)
            .ok_or_else(|| "truncated DOS header".to_string())? as usize;
        match buf.get(pe_offset..pe_offset.saturating_add(4)) {
            Some(sig) if sig == PE_SIGNATURE.as_slice() => {}
            Some(_) => return Err(format!("missing PE signature at offset {pe_offset:#x}")),
            None => {
                return Err(format!(
                    "PE header offset {pe_offset:#x} lies outside the file header"
                ))
            }
        }

        let coff = pe_offset + 4;
        let machine = read_u16(buf, coff).ok_or("truncated COFF header")?;
        let section_count = read_u16(buf, coff + 2).ok_or("truncated COFF header")?;
        let optional_size = read_u16(buf, coff + 16).ok_or("truncated COFF header")? as usize;

        let opt = coff + COFF_HEADER_LEN;
        let magic = read_u16(buf, opt).ok_or("truncated optional header")?;
        let (pe32_plus, count_offset, directories_offset) = match magic {
            PE32_MAGIC => (false, 92, 96),
            PE32_PLUS_MAGIC => (true, 108, 112),
            other => return Err(format!("unknown optional header magic {other:#x}")),
        };
        if optional_size < 20 {
            return Err(format!("optional header too small ({optional_size} bytes)"));
        }
        let entry_point = read_u32(buf, opt + 16).ok_or("truncated optional header")?;

        let security_end = directories_offset + (SECURITY_DIRECTORY_INDEX + 1) * 8;
        let has_certificate = optional_size >= security_end
            && read_u32(buf, opt + count_offset)
                .is_some_and(|count| count as usize > SECURITY_DIRECTORY_INDEX)
            && {
                let entry = opt + directories_offset + SECURITY_DIRECTORY_INDEX * 8;
                let address = read_u32(buf, entry).unwrap_or(0);
                let size = read_u32(buf, entry + 4).unwrap_or(0);
                address != 0 && size != 0
            };

        Ok(Self {
            machine,
            section_count,
            pe32_plus,
            entry_point,
            has_certificate,
        })
    }
}

fn read_u16(buf: &[u8], offset: usize) -> Option<u16> {
    let bytes = buf.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_u32(buf: &[u8], offset: usize) -> Option<u32> {
    let bytes = buf.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Inspect a `.exe` artifact.
pub fn inspect_executable(path: &Path) -> Result<Inspection, RejectReason> {
    let mut inspection = Inspection::new();
    inspection.note("Checking EXE file (PE analysis).");

    let mut buf = Vec::new();
    File::open(path)?.take(HEADER_WINDOW).read_to_end(&mut buf)?;

    let header = PeHeader::parse(&buf).map_err(RejectReason::InvalidExecutableHeader)?;
    inspection.note(format!(
        "PE format: {}, machine {:#06x}, {} sections",
        if header.pe32_plus { "PE32+" } else { "PE32" },
        header.machine,
        header.section_count
    ));
    inspection.note(format!("PE entry point: {:#x}", header.entry_point));
    if header.has_certificate {
        inspection.note("Digital certificate found.");
    } else {
        inspection.note("No digital certificate found.");
    }
    Ok(inspection)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a minimal PE image header.
    pub(crate) fn minimal_pe(pe32_plus: bool, with_certificate: bool) -> Vec<u8> {
        let mut buf = vec![0u8; 512];
        buf[..2].copy_from_slice(b"MZ");
        let pe_offset: u32 = 0x80;
        buf[0x3C..0x40].copy_from_slice(&pe_offset.to_le_bytes());
        buf[0x80..0x84].copy_from_slice(b"PE\0\0");

        let coff = 0x84;
        buf[coff..coff + 2].copy_from_slice(&0x8664u16.to_le_bytes());
        buf[coff + 2..coff + 4].copy_from_slice(&1u16.to_le_bytes());
        let (magic, optional_size, count_offset, dirs_offset): (u16, u16, usize, usize) =
            if pe32_plus {
                (0x20b, 240, 108, 112)
            } else {
                (0x10b, 224, 92, 96)
            };
        buf[coff + 16..coff + 18].copy_from_slice(&optional_size.to_le_bytes());

        let opt = coff + 20;
        buf[opt..opt + 2].copy_from_slice(&magic.to_le_bytes());
        buf[opt + 16..opt + 20].copy_from_slice(&0x1400u32.to_le_bytes());
        buf[opt + count_offset..opt + count_offset + 4].copy_from_slice(&16u32.to_le_bytes());
        if with_certificate {
            let sec = opt + dirs_offset + 4 * 8;
            buf[sec..sec + 4].copy_from_slice(&0x2000u32.to_le_bytes());
            buf[sec + 4..sec + 8].copy_from_slice(&0x300u32.to_le_bytes());
        }
        buf
    }

    fn write_temp(bytes: &[u8]) -> tempfile::NamedTempFile {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(bytes).expect("write");
        file
    }

    #[test]
    fn test_parse_pe32_plus_without_certificate() {
        let header = PeHeader::parse(&minimal_pe(true, false)).expect("parse");
        assert!(header.pe32_plus);
        assert_eq!(header.machine, 0x8664);
        assert_eq!(header.section_count, 1);
        assert_eq!(header.entry_point, 0x1400);
        assert!(!header.has_certificate);
    }

    #[test]
    fn test_parse_pe32_with_certificate() {
        let header = PeHeader::parse(&minimal_pe(false, true)).expect("parse");
        assert!(!header.pe32_plus);
        assert!(header.has_certificate);
    }

    #[test]
    fn test_parse_rejects_missing_mz() {
        let err = PeHeader::parse(b"ELF\x7f not a pe").unwrap_err();
        assert!(err.contains("MZ"));
    }

    #[test]
    fn test_parse_rejects_bad_pe_offset() {
        let mut buf = minimal_pe(true, false);
        buf[0x3C..0x40].copy_from_slice(&0xFFFF_FFF0u32.to_le_bytes());
        let err = PeHeader::parse(&buf).unwrap_err();
        assert!(err.contains("outside"));
    }

    #[test]
    fn test_parse_rejects_missing_pe_signature() {
        let mut buf = minimal_pe(true, false);
        buf[0x80..0x84].copy_from_slice(b"NE\0\0");
        let err = PeHeader::parse(&buf).unwrap_err();
        assert!(err.contains("PE signature"));
    }

    #[test]
    fn test_parse_rejects_unknown_magic() {
        let mut buf = minimal_pe(true, false);
        buf[0x98..0x9A].copy_from_slice(&0x0107u16.to_le_bytes());
        let err = PeHeader::parse(&buf).unwrap_err();
        assert!(err.contains("magic"));
    }

    #[test]
    fn test_inspect_logs_certificate_presence() {
        let file = write_temp(&minimal_pe(true, true));
        let inspection = inspect_executable(file.path()).expect("inspect");
        assert!(inspection
            .lines
            .iter()
            .any(|l| l == "Digital certificate found."));
        assert!(inspection.lines.iter().any(|l| l.contains("0x1400")));
    }

    #[test]
    fn test_inspect_unsigned_executable_still_passes() {
        let file = write_temp(&minimal_pe(false, false));
        let inspection = inspect_executable(file.path()).expect("inspect");
        assert!(inspection
            .lines
            .iter()
            .any(|l| l == "No digital certificate found."));
    }

    #[test]
    fn test_inspect_garbage_rejected() {
        let file = write_temp(b"definitely not an executable");
        let err = inspect_executable(file.path()).unwrap_err();
        assert_eq!(err.kind(), "InvalidExecutableHeader");
    }
}

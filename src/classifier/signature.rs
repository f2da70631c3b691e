//! Executable-image detection by header structure.
//!
//! Layout walked, all little-endian:
//!
//! ```text
//! 0x00  DOS header (64 bytes)      e_magic "MZ" at 0x00, e_lfanew u32 at 0x3C
//! e_lfanew  NT signature "PE\0\0"
//!       COFF file header (20 bytes) machine u16 at +0
//!       optional header            PE32 (224 bytes, magic 0x10B)
//!                                  PE32+ (240 bytes, magic 0x20B)
//! ```
//!
//! Every structural failure (bad magic, unknown machine, truncated read)
//! classifies as `Signature(false)`. Only IO errors other than a short read
//! propagate.

use std::io::{self, ErrorKind, Read, SeekFrom};

use super::{Classifier, ClassifierKind, ContentSource, Fingerprint};

const DOS_HEADER_LEN: usize = 64;
const DOS_MAGIC: u16 = 0x5A4D;
const LFANEW_OFFSET: usize = 0x3C;

const NT_SIGNATURE: u32 = 0x0000_4550;
const COFF_HEADER_LEN: usize = 20;

pub const MACHINE_I386: u16 = 0x014C;
pub const MACHINE_IA64: u16 = 0x0200;
pub const MACHINE_AMD64: u16 = 0x8664;

pub const PE32_MAGIC: u16 = 0x10B;
pub const PE32_PLUS_MAGIC: u16 = 0x20B;

/// Optional header sizes including the 16 data directories.
pub const PE32_OPTIONAL_LEN: usize = 224;
pub const PE32_PLUS_OPTIONAL_LEN: usize = 240;

/// Optional-header shape selected by the machine field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OptionalShape {
    Pe32,
    Pe32Plus,
}

impl OptionalShape {
    const fn for_machine(machine: u16) -> Option<Self> {
        match machine {
            MACHINE_I386 => Some(Self::Pe32),
            MACHINE_AMD64 | MACHINE_IA64 => Some(Self::Pe32Plus),
            _ => None,
        }
    }

    const fn len(self) -> usize {
        match self {
            Self::Pe32 => PE32_OPTIONAL_LEN,
            Self::Pe32Plus => PE32_PLUS_OPTIONAL_LEN,
        }
    }

    const fn magic(self) -> u16 {
        match self {
            Self::Pe32 => PE32_MAGIC,
            Self::Pe32Plus => PE32_PLUS_MAGIC,
        }
    }
}

/// Classifier that matches PE/COFF executable images.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureClassifier;

impl Classifier for SignatureClassifier {
    fn kind(&self) -> ClassifierKind {
        ClassifierKind::Signature
    }

    fn classify(&self, source: &mut dyn ContentSource) -> io::Result<Fingerprint> {
        match inspect(source) {
            Ok(matched) => Ok(Fingerprint::Signature(matched)),
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
                Ok(Fingerprint::Signature(false))
            }
            Err(err) => Err(err),
        }
    }
}

fn inspect(source: &mut dyn ContentSource) -> io::Result<bool> {
    source.seek(SeekFrom::Start(0))?;

    let mut dos = [0u8; DOS_HEADER_LEN];
    source.read_exact(&mut dos)?;
    if le_u16(&dos, 0) != DOS_MAGIC {
        return Ok(false);
    }
    let lfanew = le_u32(&dos, LFANEW_OFFSET);

    source.seek(SeekFrom::Start(u64::from(lfanew)))?;
    let mut signature = [0u8; 4];
    source.read_exact(&mut signature)?;
    if u32::from_le_bytes(signature) != NT_SIGNATURE {
        return Ok(false);
    }

    let mut coff = [0u8; COFF_HEADER_LEN];
    source.read_exact(&mut coff)?;
    let Some(shape) = OptionalShape::for_machine(le_u16(&coff, 0)) else {
        return Ok(false);
    };

    let mut optional = vec![0u8; shape.len()];
    source.read_exact(&mut optional)?;
    Ok(le_u16(&optional, 0) == shape.magic())
}

fn le_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn le_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}


#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::fixtures::pe_image;
    use super::*;

    fn classify(bytes: Vec<u8>) -> Fingerprint {
        SignatureClassifier
            .classify(&mut Cursor::new(bytes))
            .expect("in-memory stream never fails")
    }

    #[test]
    fn bare_mz_is_not_a_match() {
        assert_eq!(classify(vec![0x4D, 0x5A]), Fingerprint::Signature(false));
    }

    #[test]
    fn empty_stream_is_not_a_match() {
        assert_eq!(classify(Vec::new()), Fingerprint::Signature(false));
    }

    #[test]
    fn pe32_with_correct_magic_matches() {
        assert_eq!(
            classify(pe_image(MACHINE_I386, PE32_MAGIC)),
            Fingerprint::Signature(true)
        );
    }

    #[test]
    fn pe32_plus_with_correct_magic_matches() {
        assert_eq!(
            classify(pe_image(MACHINE_AMD64, PE32_PLUS_MAGIC)),
            Fingerprint::Signature(true)
        );
    }

    #[test]
    fn pe32_with_wrong_optional_magic_fails() {
        assert_eq!(
            classify(pe_image(MACHINE_I386, PE32_PLUS_MAGIC)),
            Fingerprint::Signature(false)
        );
    }

    #[test]
    fn wrong_nt_signature_fails() {
        let mut image = pe_image(MACHINE_I386, PE32_MAGIC);
        image[0x80..0x84].copy_from_slice(b"NE\0\0");
        assert_eq!(classify(image), Fingerprint::Signature(false));
    }

    #[test]
    fn wrong_dos_magic_fails() {
        let mut image = pe_image(MACHINE_I386, PE32_MAGIC);
        image[0] = b'Z';
        assert_eq!(classify(image), Fingerprint::Signature(false));
    }

    #[test]
    fn unsupported_machine_fails() {
        assert_eq!(
            classify(pe_image(0xAA64, PE32_PLUS_MAGIC)),
            Fingerprint::Signature(false)
        );
    }

    #[test]
    fn truncated_optional_header_fails() {
        let mut image = pe_image(MACHINE_AMD64, PE32_PLUS_MAGIC);
        image.truncate(image.len() - 1);
        assert_eq!(classify(image), Fingerprint::Signature(false));
    }

    #[test]
    fn lfanew_past_end_fails() {
        let mut image = pe_image(MACHINE_I386, PE32_MAGIC);
        image[LFANEW_OFFSET..LFANEW_OFFSET + 4].copy_from_slice(&0x00FF_FFFFu32.to_le_bytes());
        assert_eq!(classify(image), Fingerprint::Signature(false));
    }

    struct Unreadable;

    impl Read for Unreadable {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("device gone"))
        }
    }

    impl std::io::Seek for Unreadable {
        fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
            Ok(0)
        }
    }

    #[test]
    fn unreadable_stream_is_a_hard_failure() {
        let err = SignatureClassifier
            .classify(&mut Unreadable)
            .expect_err("read failure must propagate");
        assert_eq!(err.kind(), ErrorKind::Other);
    }
}

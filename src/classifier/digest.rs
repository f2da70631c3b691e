//! Content-digest classifier (SHA-256 over the full stream) and hex codec.

use std::io::{self, ErrorKind, Read, SeekFrom};

use sha2::{Digest, Sha256};

use super::{Classifier, ClassifierKind, ContentSource, DIGEST_LEN, Fingerprint};

const CHUNK_LEN: usize = 64 * 1024;

/// Classifier that fingerprints files by the SHA-256 of their content.
#[derive(Debug, Clone, Copy, Default)]
pub struct DigestClassifier;

impl Classifier for DigestClassifier {
    fn kind(&self) -> ClassifierKind {
        ClassifierKind::Digest
    }

    fn classify(&self, source: &mut dyn ContentSource) -> io::Result<Fingerprint> {
        source.seek(SeekFrom::Start(0))?;
        let mut hasher = Sha256::new();
        let mut chunk = vec![0u8; CHUNK_LEN];
        loop {
            let read = match source.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            };
            hasher.update(&chunk[..read]);
        }
        Ok(Fingerprint::Digest(hasher.finalize().into()))
    }
}

/// Format a digest as lowercase hex.
pub fn digest_hex(digest: &[u8; DIGEST_LEN]) -> String {
    use std::fmt::Write;
    digest
        .iter()
        .fold(String::with_capacity(DIGEST_LEN * 2), |mut acc, b| {
            let _ = write!(acc, "{b:02x}");
            acc
        })
}

/// Parse a hex digest (either case). Returns `None` on bad length or digits.
pub fn parse_digest_hex(text: &str) -> Option<[u8; DIGEST_LEN]> {
    let bytes = text.as_bytes();
    if bytes.len() != DIGEST_LEN * 2 {
        return None;
    }
    let mut out = [0u8; DIGEST_LEN];
    for (slot, pair) in out.iter_mut().zip(bytes.chunks_exact(2)) {
        *slot = (hex_nibble(pair[0])? << 4) | hex_nibble(pair[1])?;
    }
    Some(out)
}

const fn hex_nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn digest_of(bytes: &[u8]) -> [u8; DIGEST_LEN] {
        match DigestClassifier
            .classify(&mut Cursor::new(bytes.to_vec()))
            .unwrap()
        {
            Fingerprint::Digest(d) => d,
            other => panic!("unexpected fingerprint {other:?}"),
        }
    }

    #[test]
    fn empty_stream_has_known_digest() {
        assert_eq!(
            digest_hex(&digest_of(b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn identical_content_identical_digest() {
        assert_eq!(digest_of(b"same bytes"), digest_of(b"same bytes"));
        assert_ne!(digest_of(b"same bytes"), digest_of(b"other bytes"));
    }

    #[test]
    fn content_larger_than_one_chunk_is_fully_hashed() {
        let mut a = vec![7u8; CHUNK_LEN * 2 + 13];
        let b = a.clone();
        assert_eq!(digest_of(&a), digest_of(&b));
        if let Some(last) = a.last_mut() {
            *last = 8;
        }
        assert_ne!(digest_of(&a), digest_of(&b));
    }

    #[test]
    fn hex_codec_accepts_either_case() {
        let digest = digest_of(b"abc");
        let hex = digest_hex(&digest);
        assert_eq!(hex.len(), 64);
        assert_eq!(parse_digest_hex(&hex), Some(digest));
        assert_eq!(parse_digest_hex(&hex.to_uppercase()), Some(digest));
    }

    #[test]
    fn hex_codec_rejects_malformed_input() {
        assert_eq!(parse_digest_hex(""), None);
        assert_eq!(parse_digest_hex("abc"), None);
        assert_eq!(parse_digest_hex(&"zz".repeat(DIGEST_LEN)), None);
        assert_eq!(parse_digest_hex(&"00".repeat(DIGEST_LEN + 1)), None);
    }
}

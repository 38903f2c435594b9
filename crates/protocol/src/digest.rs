//! Content fingerprints.
//!
//! Both sides hash with BLAKE3 and compare lowercase hex digests.

use std::io::{self, Read};

/// Fingerprint an in-memory buffer.
pub fn fingerprint(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Fingerprint everything a reader yields, without buffering it whole.
pub fn fingerprint_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_hex_blake3() {
        let fp = fingerprint(b"hello");
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp, blake3::hash(b"hello").to_hex().to_string());
    }

    #[test]
    fn test_reader_matches_buffer() {
        let data = vec![7u8; 200_000];
        assert_eq!(
            fingerprint_reader(data.as_slice()).unwrap(),
            fingerprint(&data)
        );
    }

    #[test]
    fn test_different_content_differs() {
        assert_ne!(fingerprint(b"a"), fingerprint(b"b"));
        assert_ne!(fingerprint(b""), "");
    }
}

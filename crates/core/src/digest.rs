//! Content digest of uploaded bytes.

/// Hex-encoded BLAKE3 digest.
///
/// Computed once, when the bytes are first stored, and copied along with the
/// blob on fork. Nothing verifies reads against it (yet).
pub fn digest(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest() {
        assert_eq!(digest(b""), "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262");
        assert_eq!(digest(b"SQLite format 3\0"), digest(b"SQLite format 3\0"));
        assert_ne!(digest(b"a"), digest(b"b"));
    }
}

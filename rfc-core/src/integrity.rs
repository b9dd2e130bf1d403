//! Integrity: SHA-256 digest of served documents, verified by the fetching peer.

use std::fmt::Write;

use sha2::{Digest, Sha256};

/// Hex SHA-256 of a document body, sent in the `sha256` header.
pub fn digest_hex(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    let mut out = String::with_capacity(64);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Verify a body against the hex digest a peer advertised. Case-insensitive.
pub fn verify(body: &[u8], expected_hex: &str) -> bool {
    digest_hex(body).eq_ignore_ascii_case(expected_hex.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digest() {
        assert_eq!(
            digest_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn verify_detects_tampering() {
        let digest = digest_hex(b"RFC TEXT");
        assert!(verify(b"RFC TEXT", &digest));
        assert!(verify(b"RFC TEXT", &digest.to_uppercase()));
        assert!(!verify(b"RFC TEXT!", &digest));
    }
}

//! Content digests of a build's raw bytes.

use crate::index::types::Digests;
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};

fn hex_digest<D: Digest>(bytes: &[u8]) -> String {
    let mut hasher = D::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// MD5, SHA-1 and SHA-256 of `bytes`, lowercase hex
pub fn compute_digests(bytes: &[u8]) -> Digests {
    Digests {
        md5: hex_digest::<Md5>(bytes),
        sha1: hex_digest::<Sha1>(bytes),
        sha256: hex_digest::<Sha256>(bytes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vectors() {
        let d = compute_digests(b"abc");
        assert_eq!(d.md5, "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(d.sha1, "a9993e364706816aba3e25717850c26c9cd0d89d");
        assert_eq!(
            d.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_empty_input() {
        let d = compute_digests(b"");
        assert_eq!(d.md5, "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(d.sha1.len(), 40);
        assert_eq!(d.sha256.len(), 64);
    }
}

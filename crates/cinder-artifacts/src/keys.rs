//! Artifact key and checksum utilities.

use cinder_core::artifact::ArtifactKey;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Content checksum over an artifact's file set.
///
/// Paths and contents are folded in map order, so the digest is stable
/// for a given file set regardless of insertion order.
pub fn checksum(files: &BTreeMap<String, Vec<u8>>) -> String {
    let mut hasher = Sha256::new();
    for (path, contents) in files {
        hasher.update(path.as_bytes());
        hasher.update([0u8]);
        hasher.update(contents);
    }
    hex::encode(hasher.finalize())
}

/// Sanitize a key for use in filenames or log fields.
pub fn sanitize(key: &ArtifactKey) -> String {
    key.to_string()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_is_content_addressed() {
        let a: BTreeMap<String, Vec<u8>> =
            [("out.txt".to_string(), b"hello".to_vec())]
                .into_iter()
                .collect();
        let b = a.clone();
        assert_eq!(checksum(&a), checksum(&b));

        let c: BTreeMap<String, Vec<u8>> =
            [("out.txt".to_string(), b"world".to_vec())]
                .into_iter()
                .collect();
        assert_ne!(checksum(&a), checksum(&c));
    }

    #[test]
    fn test_path_content_boundary() {
        // Same bytes split differently across path/content must differ.
        let a: BTreeMap<String, Vec<u8>> =
            [("ab".to_string(), b"c".to_vec())].into_iter().collect();
        let b: BTreeMap<String, Vec<u8>> =
            [("a".to_string(), b"bc".to_vec())].into_iter().collect();
        assert_ne!(checksum(&a), checksum(&b));
    }

    #[test]
    fn test_sanitize() {
        let key = ArtifactKey::new("build", "feature/x", "abc");
        assert_eq!(sanitize(&key), "build@feature_x@abc");
    }
}

//! Content-addressed cache key generation.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::Error;

/// Hash of a code artifact's pre-minification content.
pub fn content_hash(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}

/// Hash of a serializable key (e.g. an ordered fragment list).
///
/// # Errors
///
/// Returns `Error::Serialization` if the key cannot be serialized.
pub fn manifest_key<T: Serialize + ?Sized>(key: &T) -> Result<String, Error> {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(key)?);
    Ok(hex::encode(hasher.finalize()))
}

/// Nested directory components for a checksum: `abcde...` becomes `a/b/c/d/e`.
pub fn checksum_dirs(checksum: &str) -> Vec<String> {
    if checksum.len() < 5 {
        return Vec::new();
    }
    checksum.chars().take(5).map(String::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_stability() {
        let hash1 = content_hash("a{color:red}");
        let hash2 = content_hash("a{color:red}");
        assert_eq!(hash1, hash2);
    }

    #[test]
    fn test_hash_different_content() {
        assert_ne!(content_hash("a{color:red}"), content_hash("a{color:blue}"));
    }

    #[test]
    fn test_hash_format() {
        let hash = content_hash("body{}");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_manifest_key_order_matters() {
        let a = manifest_key(&["one", "two"]).unwrap();
        let b = manifest_key(&["two", "one"]).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, manifest_key(&vec!["one", "two"]).unwrap());
    }

    #[test]
    fn test_checksum_dirs() {
        assert_eq!(checksum_dirs("abcdef0123"), vec!["a", "b", "c", "d", "e"]);
        assert!(checksum_dirs("abc").is_empty());
    }
}

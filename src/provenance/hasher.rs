//! BLAKE3 fingerprints for sources, specification documents and manifests.

use crate::core::types::Fingerprint;
use std::io::Read;
use std::path::Path;

const STREAM_BUF_SIZE: usize = 65536;

/// Fingerprint a byte slice.
pub fn hash_bytes(bytes: &[u8]) -> Fingerprint {
    Fingerprint::from_hash(format!("blake3:{}", blake3::hash(bytes).to_hex()))
}

/// Fingerprint a file's contents, streamed.
pub fn hash_file(path: &Path) -> Result<Fingerprint, String> {
    let mut file =
        std::fs::File::open(path).map_err(|e| format!("cannot open {}: {}", path.display(), e))?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; STREAM_BUF_SIZE];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| format!("read error {}: {}", path.display(), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(Fingerprint::from_hash(format!(
        "blake3:{}",
        hasher.finalize().to_hex()
    )))
}

/// Fingerprint a file if it exists. `Ok(None)` when it does not.
pub fn hash_file_if_exists(path: &Path) -> Result<Option<Fingerprint>, String> {
    if !path.is_file() {
        return Ok(None);
    }
    hash_file(path).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_hash_file_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.cpp");
        std::fs::write(&path, "int main() {}").unwrap();
        let h = hash_file(&path).unwrap();
        assert!(h.as_str().starts_with("blake3:"));
        assert_eq!(h.as_str().len(), 7 + 64);
    }

    #[test]
    fn test_hash_file_matches_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vss.json");
        std::fs::write(&path, b"{\"Vehicle\":{}}").unwrap();
        assert_eq!(hash_file(&path).unwrap(), hash_bytes(b"{\"Vehicle\":{}}"));
    }

    #[test]
    fn test_hash_file_larger_than_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.bin");
        let data = vec![0x5Au8; STREAM_BUF_SIZE * 2 + 17];
        std::fs::write(&path, &data).unwrap();
        assert_eq!(hash_file(&path).unwrap(), hash_bytes(&data));
    }

    #[test]
    fn test_hash_file_not_found() {
        assert!(hash_file(Path::new("/nonexistent/main.cpp")).is_err());
    }

    #[test]
    fn test_hash_file_if_exists_missing() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("conanfile.txt");
        assert_eq!(hash_file_if_exists(&missing).unwrap(), None);
        std::fs::write(&missing, "[requires]\n").unwrap();
        assert!(hash_file_if_exists(&missing).unwrap().is_some());
    }

    #[test]
    fn test_single_byte_change_changes_fingerprint() {
        let a = hash_bytes(b"int main() { return 0; }");
        let b = hash_bytes(b"int main() { return 1; }");
        assert_ne!(a, b);
    }

    proptest! {
        #[test]
        fn prop_fingerprint_equal_iff_bytes_equal(
            a in proptest::collection::vec(any::<u8>(), 0..256),
            b in proptest::collection::vec(any::<u8>(), 0..256),
        ) {
            prop_assert_eq!(hash_bytes(&a) == hash_bytes(&b), a == b);
        }

        #[test]
        fn prop_fingerprint_deterministic(a in proptest::collection::vec(any::<u8>(), 0..512)) {
            prop_assert_eq!(hash_bytes(&a), hash_bytes(&a.clone()));
        }
    }
}

//! Content fingerprints for source files
//!
//! A fingerprint is the hex-encoded SHA-256 of a file's bytes. Together with
//! the file path it forms the identity of a work unit, so a file that is
//! rewritten under the same name is a different unit.

use crate::error::{EspError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 digest of some content
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint an in-memory buffer
    pub fn of_bytes(data: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(data)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex digits, for logs and file names
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }

    /// Fail with `FingerprintMismatch` unless `data` hashes to this fingerprint
    pub fn verify(&self, path: &str, data: &[u8]) -> Result<()> {
        let actual = Self::of_bytes(data);
        if actual == *self {
            Ok(())
        } else {
            Err(EspError::FingerprintMismatch {
                path: path.to_string(),
                expected: self.0.clone(),
                actual: actual.0,
            })
        }
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_of_bytes() {
        let fingerprint = Fingerprint::of_bytes(b"hello world");
        assert_eq!(
            fingerprint.as_str(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(fingerprint.short(), "b94d27b9934d");
    }

    #[test]
    fn test_verify_detects_changed_content() {
        let fingerprint = Fingerprint::of_bytes(b"original");
        assert!(fingerprint.verify("a.csv", b"original").is_ok());

        match fingerprint.verify("a.csv", b"rewritten") {
            Err(EspError::FingerprintMismatch { path, expected, .. }) => {
                assert_eq!(path, "a.csv");
                assert_eq!(expected, fingerprint.as_str());
            },
            other => panic!("expected mismatch, got {:?}", other),
        }
    }

    proptest::proptest! {
        #[test]
        fn prop_verify_accepts_only_identical_content(
            data in proptest::collection::vec(proptest::num::u8::ANY, 0..4096),
            flip in proptest::num::usize::ANY,
        ) {
            let fingerprint = Fingerprint::of_bytes(&data);
            proptest::prop_assert_eq!(fingerprint.as_str().len(), 64);
            proptest::prop_assert!(fingerprint.verify("f.csv", &data).is_ok());

            let mut changed = data.clone();
            if changed.is_empty() {
                changed.push(0);
            } else {
                let idx = flip % changed.len();
                changed[idx] ^= 0x01;
            }
            proptest::prop_assert!(fingerprint.verify("f.csv", &changed).is_err());
        }
    }
}

//! Module: generated content for one subtask.

use serde::{Deserialize, Serialize};
use sha2::Digest as _;

/// Which attempt produced a module and whether it succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// 1-indexed attempt number.
    pub attempt: u32,
    pub success: bool,
}

/// Generated content for one subtask path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub path: String,
    pub content: String,
    /// SHA-256 hex digest of `content`.
    pub digest: String,
    pub provenance: Provenance,
}

impl Module {
    /// Construct a successful module, computing and embedding the digest.
    pub fn generated(path: impl Into<String>, content: impl Into<String>, attempt: u32) -> Self {
        let content = content.into();
        let digest = content_digest(&content);
        Self {
            path: path.into(),
            content,
            digest,
            provenance: Provenance {
                attempt,
                success: true,
            },
        }
    }

    /// `true` when the digest still matches the content.
    pub fn verify(&self) -> bool {
        content_digest(&self.content) == self.digest
    }
}

fn content_digest(content: &str) -> String {
    hex::encode(sha2::Sha256::digest(content.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_stable_for_identical_content() {
        let a = Module::generated("a.rs", "fn main() {}", 1);
        let b = Module::generated("b.rs", "fn main() {}", 2);
        assert_eq!(a.digest, b.digest);
        assert_eq!(a.digest.len(), 64);
    }

    #[test]
    fn test_verify_rejects_tampered_content() {
        let mut module = Module::generated("a.rs", "fn main() {}", 1);
        assert!(module.verify());
        module.content.push_str("// edited");
        assert!(!module.verify());
    }

    #[test]
    fn test_provenance_records_attempt() {
        let module = Module::generated("a.rs", "", 3);
        assert_eq!(module.provenance.attempt, 3);
        assert!(module.provenance.success);
    }
}

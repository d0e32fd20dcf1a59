//! Content hashing for installed-app identities.
//!
//! An app's identity hash must be stable across manifest reloads, so it is
//! derived only from the app's label and source location. The encoding is
//! URL-safe base64 without padding over the first 20 bytes of a SHA-256
//! digest, which keeps it short enough for an indexed column.

use base64::Engine;
use sha2::{Digest, Sha256};

/// Number of digest bytes kept in an app identity hash.
pub const APP_HASH_LEN: usize = 20;

/// Compute the identity hash for an app from its label and source location.
pub fn app_identity_hash(label: &str, source_location: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(label.as_bytes());
    hasher.update(source_location.as_bytes());
    let digest = hasher.finalize();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&digest[..APP_HASH_LEN])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable() {
        let a = app_identity_hash("wallet", "git://example.org/wallet.git");
        let b = app_identity_hash("wallet", "git://example.org/wallet.git");
        assert_eq!(a, b);
        // 20 bytes -> 27 base64 chars without padding
        assert_eq!(a.len(), 27);
    }

    #[test]
    fn test_hash_depends_on_both_inputs() {
        let base = app_identity_hash("wallet", "repo-a");
        assert_ne!(base, app_identity_hash("wallet", "repo-b"));
        assert_ne!(base, app_identity_hash("explorer", "repo-a"));
    }

    #[test]
    fn test_hash_is_url_safe() {
        let h = app_identity_hash("some label", "some/source?with=chars");
        assert!(!h.contains('+'));
        assert!(!h.contains('/'));
        assert!(!h.contains('='));
    }
}

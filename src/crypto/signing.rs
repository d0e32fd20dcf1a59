//! Legacy HMAC-SHA256 signatures.
//!
//! Machine-key tokens are signed with a lower-case hex HMAC-SHA256 over the
//! `header.payload` prefix of the token. The key is the ASCII text of the
//! label's hex key, not its decoded bytes; keys in the wild were provisioned
//! that way and existing tokens depend on it.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Compute the lower-case hex HMAC-SHA256 of `data` keyed by `key`.
pub fn hmac_sha256_hex(key: &[u8], data: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC-SHA256 accepts keys of any length"),
    };
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a hex signature by exact, case-sensitive comparison in constant time.
pub fn verify_hmac_sha256_hex(key: &[u8], data: &[u8], expected: &str) -> bool {
    let computed = hmac_sha256_hex(key, data);
    computed.as_bytes().ct_eq(expected.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc4231_case_2() {
        // RFC 4231 test case 2
        let sig = hmac_sha256_hex(b"Jefe", b"what do ya want for nothing?");
        assert_eq!(
            sig,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_verify_is_case_sensitive() {
        let sig = hmac_sha256_hex(b"abc123", b"header.payload");
        assert!(verify_hmac_sha256_hex(b"abc123", b"header.payload", &sig));
        assert!(!verify_hmac_sha256_hex(
            b"abc123",
            b"header.payload",
            &sig.to_uppercase()
        ));
    }

    #[test]
    fn test_verify_rejects_truncated() {
        let sig = hmac_sha256_hex(b"abc123", b"header.payload");
        assert!(!verify_hmac_sha256_hex(
            b"abc123",
            b"header.payload",
            &sig[..32]
        ));
    }
}

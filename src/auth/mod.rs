//! Credential verification for forward-gate
//!
//! Two independent trust roots are supported:
//!
//! - **Machine keys**: a legacy label-keyed scheme. Tokens look like JWTs but
//!   are signed with a hex HMAC-SHA256 keyed by the label's key string, and a
//!   label is allowed to perform an action when it belongs to the action's
//!   group. Keys and action groups come from two line-oriented files.
//! - **Sessions**: standard HMAC-signed JWTs, verified either against the
//!   server-wide cookie secret (users) or against a per-app secret (apps).
//!
//! # Configuration
//!
//! - `KEYS_FILE`: machine-key file
//! - `ACTIONS_FILE`: action-to-group file
//! - `COOKIE_SECRET`: session signing secret
//! - `SESSION_COOKIE_NAME`: cookie carrying the session token

mod machine_key;
mod session;

pub use machine_key::*;
pub use session::*;

use base64::Engine;

/// Authentication error
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("malformed token: {0}")]
    MalformedToken(String),

    #[error("missing claim: {0}")]
    MissingClaim(&'static str),

    #[error("no such key with label {0}")]
    UnknownLabel(String),

    #[error("signature mismatch")]
    SignatureMismatch,

    #[error("action {0} is not mapped to a group")]
    UnmappedAction(String),

    #[error("label {label} may not perform {action}")]
    ActionNotAllowed { label: String, action: String },

    #[error("invalid JWT: {0}")]
    InvalidJwt(String),

    #[error("token expired")]
    TokenExpired,

    #[error("unexpected signing algorithm: {0}")]
    UnexpectedAlgorithm(String),

    #[error("app not found: {0}")]
    UnknownApp(i64),

    #[error("invalid app secret")]
    InvalidAppSecret,

    #[error("lookup failed: {0}")]
    Lookup(String),

    #[error("failed to read {path}: {source}")]
    KeyFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Decode a base64 segment in either alphabet, padded or not.
pub(crate) fn decode_base64_any(s: &str) -> Result<Vec<u8>, AuthError> {
    let trimmed = s.trim();
    base64::engine::general_purpose::STANDARD
        .decode(trimmed)
        .or_else(|_| base64::engine::general_purpose::STANDARD_NO_PAD.decode(trimmed))
        .or_else(|_| base64::engine::general_purpose::URL_SAFE.decode(trimmed))
        .or_else(|_| base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(trimmed))
        .map_err(|e| AuthError::MalformedToken(format!("invalid base64: {e}")))
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn token_from_bearer(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_from_bearer() {
        assert_eq!(token_from_bearer("Bearer abc.def"), Some("abc.def"));
        assert_eq!(token_from_bearer("Bearer "), None);
        assert_eq!(token_from_bearer("Basic abc"), None);
        assert_eq!(token_from_bearer(""), None);
    }

    #[test]
    fn test_decode_base64_any_accepts_all_flavors() {
        // 0xfb 0xff encodes differently in the two alphabets
        assert_eq!(decode_base64_any("+/8=").unwrap(), vec![0xfb, 0xff]);
        assert_eq!(decode_base64_any("+/8").unwrap(), vec![0xfb, 0xff]);
        assert_eq!(decode_base64_any("-_8=").unwrap(), vec![0xfb, 0xff]);
        assert_eq!(decode_base64_any("-_8").unwrap(), vec![0xfb, 0xff]);
        assert!(decode_base64_any("!!!").is_err());
    }
}

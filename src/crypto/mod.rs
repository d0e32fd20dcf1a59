//! Cryptographic utilities for forward-gate
//!
//! Provides:
//! - Stable content hashing for installed-app identities
//! - Legacy HMAC-SHA256 hex signatures used by machine-key tokens
//! - Argon2id password hashing for the reserved administrative user

mod hash;
mod password;
mod signing;

pub use hash::*;
pub use password::*;
pub use signing::*;

//! Domain models for forward-gate
//!
//! Installed apps as declared by the manifest, their persisted counterparts,
//! and the users and roles that policies are evaluated against.

mod app;
mod user;

pub use app::*;
pub use user::*;

/// Row id of the reserved administrative app, role and user.
///
/// These rows are created by the first migration and are never removed by
/// manifest reconciliation or by the store's delete operations.
pub const RESERVED_ID: i64 = 1;

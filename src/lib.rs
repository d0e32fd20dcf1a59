//! forward-gate Library
//!
//! Forward-auth decision service: a reverse proxy asks it whether a request
//! to an installed app, or to a node action, may go through.
//!
//! ## Modules
//!
//! - [`domain`] - Core domain types (apps, roles, users)
//! - [`policy`] - Access policy rules and their evaluation
//! - [`auth`] - Credential verification (machine keys, session tokens)
//! - [`crypto`] - Hashing and signing helpers
//! - [`registry`] - Installed-app manifest and its sync into the store
//! - [`infra`] - Durable store, file watches, shutdown
//! - [`config`] - Environment configuration
//! - [`api`] - Forward-auth HTTP routes
//! - [`server`] - Bootstrap and wiring

pub mod api;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod domain;
pub mod infra;
pub mod migrations;
pub mod policy;
pub mod registry;
pub mod server;

// Re-export commonly used types
pub use domain::{InstalledApp, PersistedApp, Role, User};
pub use infra::{AuthStore, StoreError};
pub use policy::{check_access, AccessPolicyRule, PolicySet};

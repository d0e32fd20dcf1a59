//! Infrastructure layer for forward-gate
//!
//! Contains:
//! - The durable store contract and its SQLite implementation
//! - File-stat change detection for the manifest, key and action files
//! - Graceful shutdown of the HTTP server and background tasks

mod error;
mod file_watch;
mod shutdown;
pub mod sqlite;
mod traits;

pub use error::*;
pub use file_watch::*;
pub use shutdown::*;
pub use sqlite::SqliteAuthStore;
pub use traits::*;

//! SQLite implementation of the durable store

mod store;

pub use store::*;

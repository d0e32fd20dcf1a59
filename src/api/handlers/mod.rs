//! Forward-auth decision handlers, one per check endpoint.

mod app_auth;
mod gatekeeper_auth;
mod health;
mod user_auth;

pub use app_auth::*;
pub use gatekeeper_auth::*;
pub use health::*;
pub use user_auth::*;

//! HTTP surface of forward-gate
//!
//! A reverse proxy calls one of the check endpoints before forwarding a
//! request, passing the original request in `X-Forwarded-*` headers. A 2xx
//! answer lets the request through. Bodies are always empty.
//!
//! - `/app`: requests signed by an installed app
//! - `/gatekeeper`: machine-key holders calling node actions
//! - `/public`: browser sessions of users
//! - `/health`: liveness

pub mod handlers;
mod headers;

pub use headers::*;

use axum::routing::{any, get};
use axum::Router;

use crate::server::AppState;

/// Create the check router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/app", any(handlers::app_auth))
        .route("/gatekeeper", any(handlers::gatekeeper_auth))
        .route("/public", any(handlers::user_auth))
        .route("/health", get(handlers::health_check))
}

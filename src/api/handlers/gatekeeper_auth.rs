use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use tracing::{debug, info};

use crate::api::{bearer_token, ForwardedRequest};
use crate::server::AppState;

/// Action named by a forwarded URI: its first path segment, query removed.
pub fn action_from_uri(uri: &str) -> Option<&str> {
    let path = uri.split('?').next().unwrap_or_default();
    let path = path.strip_prefix('/').unwrap_or(path);
    path.split('/').next().filter(|action| !action.is_empty())
}

/// Allow a machine-key holder to perform the action named by the forwarded
/// URI. Failures are always a bare 401.
pub async fn gatekeeper_auth(State(state): State<AppState>, headers: HeaderMap) -> StatusCode {
    let forwarded = ForwardedRequest::from_headers(&headers);

    let Some(action) = forwarded.uri.as_deref().and_then(action_from_uri) else {
        debug!(uri = ?forwarded.uri, "Gatekeeper check without action");
        return StatusCode::UNAUTHORIZED;
    };
    let Some(token) = bearer_token(&headers) else {
        debug!(action, "Gatekeeper check without bearer token");
        return StatusCode::UNAUTHORIZED;
    };

    match state.machine_keys.authenticate(action, token) {
        Ok(label) => {
            info!(label = %label, action, "Machine key accepted");
            StatusCode::OK
        }
        Err(e) => {
            info!(action, error = %e, "Machine key rejected");
            StatusCode::UNAUTHORIZED
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_from_uri() {
        assert_eq!(action_from_uri("/getinfo"), Some("getinfo"));
        assert_eq!(action_from_uri("/getinfo/extra/parts"), Some("getinfo"));
        assert_eq!(action_from_uri("/getinfo?verbose=1"), Some("getinfo"));
        assert_eq!(action_from_uri("getinfo"), Some("getinfo"));
        assert_eq!(action_from_uri("/"), None);
        assert_eq!(action_from_uri(""), None);
        assert_eq!(action_from_uri("//x"), None);
    }
}

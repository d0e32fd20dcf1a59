use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use tracing::debug;

use crate::api::bearer_token;
use crate::auth::AuthError;
use crate::server::AppState;

/// Allow a request signed by an installed app with its own secret.
///
/// 200 when the bearer token verifies against the secret of the app named by
/// its `id` claim, 401 otherwise.
pub async fn app_auth(State(state): State<AppState>, headers: HeaderMap) -> StatusCode {
    let Some(token) = bearer_token(&headers) else {
        debug!("App check without bearer token");
        return StatusCode::UNAUTHORIZED;
    };

    let store = state.store.clone();
    let result = state
        .sessions
        .validate_with_app_secret(token, |app_id| async move {
            store
                .get_app(app_id, false)
                .await
                .map(|app| app.map(|app| app.secret))
                .map_err(|e| AuthError::Lookup(e.to_string()))
        })
        .await;

    match result {
        Ok(app_id) => {
            debug!(app_id, "App token accepted");
            StatusCode::OK
        }
        Err(e) => {
            debug!(error = %e, "App token rejected");
            StatusCode::UNAUTHORIZED
        }
    }
}

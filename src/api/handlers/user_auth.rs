use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

use crate::api::{
    bearer_token, cookie_value, set_header, unauthorized_redirect, ForwardedRequest,
    X_AUTH_USER_CLAIMS, X_STATUS_REASON,
};
use crate::auth::SessionToken;
use crate::policy::PolicySet;
use crate::server::AppState;

#[derive(Debug, Default)]
struct Verdict {
    allowed: bool,
    claims: Option<String>,
    reason: Option<String>,
}

impl Verdict {
    fn deny(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    fn allow(mut self) -> Self {
        self.allowed = true;
        self
    }
}

/// Decide whether a browser request to an installed app may go through.
///
/// Public routes of the app pass without credentials. Otherwise the session
/// (bearer or cookie) must name a user holding a role of that app that the
/// app's policy allows. Refusals are a redirect to the admin login page.
pub async fn user_auth(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let forwarded = ForwardedRequest::from_headers(&headers);
    let verdict = evaluate(&state, &headers, &forwarded).await;

    let mut response = if verdict.allowed {
        StatusCode::OK.into_response()
    } else {
        unauthorized_redirect(&forwarded)
    };
    if let Some(claims) = &verdict.claims {
        set_header(&mut response, X_AUTH_USER_CLAIMS, claims);
    }
    if let Some(reason) = &verdict.reason {
        set_header(&mut response, X_STATUS_REASON, reason);
    }
    response
}

fn session_token(state: &AppState, headers: &HeaderMap) -> Option<String> {
    bearer_token(headers)
        .map(str::to_string)
        .or_else(|| cookie_value(headers, &state.config.session_cookie_name))
}

async fn evaluate(state: &AppState, headers: &HeaderMap, forwarded: &ForwardedRequest) -> Verdict {
    let verdict = Verdict::default();

    let Some(prefix) = forwarded.prefix.as_deref() else {
        debug!("User check without forwarded prefix");
        return verdict;
    };
    let mount_point = prefix.strip_prefix('/').unwrap_or(prefix);

    let app = match state.registry.get_by_mount_point(mount_point).await {
        Ok(Some(app)) => app,
        Ok(None) => {
            debug!(mount_point, "User check for unknown app");
            return verdict.deny("no such app");
        }
        Err(e) => {
            warn!(mount_point, error = %e, "App lookup failed");
            return verdict.deny("app lookup failed");
        }
    };

    let method = forwarded.method.as_deref().unwrap_or_default();
    let path = forwarded.uri.as_deref().unwrap_or_default();

    let session: Option<SessionToken> =
        session_token(state, headers).and_then(|token| match state.sessions.validate(&token) {
            Ok(session) => Some(session),
            Err(e) => {
                debug!(error = %e, "Session token rejected");
                None
            }
        });
    let verdict = Verdict {
        claims: session.as_ref().map(|s| s.payload_segment.clone()),
        ..verdict
    };

    let policy = PolicySet::compile(&app.access_policies);
    if policy.check(method, path, None).allowed {
        return verdict.allow();
    }

    let Some(session) = session else {
        return verdict.deny("not logged in");
    };
    let Some(subject_id) = session.subject_id else {
        return verdict.deny("no subject claims");
    };
    let Ok(user_id) = i64::try_from(subject_id) else {
        return verdict.deny("no such user");
    };

    match state.store.get_user(user_id, false).await {
        Ok(Some(_)) => {}
        Ok(None) => return verdict.deny("no such user"),
        Err(e) => {
            warn!(user_id, error = %e, "User lookup failed");
            return verdict.deny("user lookup failed");
        }
    }

    let roles = match state.store.roles_for_user_in_app(user_id, app.id).await {
        Ok(roles) => roles,
        Err(e) => {
            warn!(user_id, app_id = app.id, error = %e, "Role lookup failed");
            return verdict.deny("role lookup failed");
        }
    };

    if policy.check(method, path, Some(roles.as_slice())).allowed {
        debug!(user_id, app_id = app.id, method, path, "User allowed");
        verdict.allow()
    } else {
        debug!(user_id, app_id = app.id, method, path, ?roles, "User denied");
        verdict.deny("forbidden")
    }
}

//! Forwarded request headers and response helpers shared by the handlers.

use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Redirect, Response};

use crate::auth::token_from_bearer;

pub const X_FORWARDED_URI: &str = "x-forwarded-uri";
pub const X_FORWARDED_METHOD: &str = "x-forwarded-method";
pub const X_FORWARDED_PREFIX: &str = "x-forwarded-prefix";
pub const X_FORWARDED_HOST: &str = "x-forwarded-host";
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

pub const X_AUTH_USER_CLAIMS: &str = "x-auth-user-claims";
pub const X_STATUS_REASON: &str = "x-status-reason";

/// Path users are sent to when they are not allowed through.
pub const UNAUTHORIZED_PATH: &str = "/admin";

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Original request as described by the reverse proxy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwardedRequest {
    pub uri: Option<String>,
    pub method: Option<String>,
    pub prefix: Option<String>,
    pub host: Option<String>,
    pub proto: Option<String>,
}

impl ForwardedRequest {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let get = |name| header_str(headers, name).map(str::to_string);
        Self {
            uri: get(X_FORWARDED_URI),
            method: get(X_FORWARDED_METHOD),
            prefix: get(X_FORWARDED_PREFIX),
            host: get(X_FORWARDED_HOST),
            proto: get(X_FORWARDED_PROTO),
        }
    }

    /// `{proto}://{host}/admin`, with missing parts left empty.
    pub fn unauthorized_url(&self) -> String {
        format!(
            "{}://{}{}",
            self.proto.as_deref().unwrap_or_default(),
            self.host.as_deref().unwrap_or_default(),
            UNAUTHORIZED_PATH
        )
    }
}

/// Token carried by `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, header::AUTHORIZATION.as_str()).and_then(token_from_bearer)
}

/// Value of the cookie called `name`, looking through every `Cookie` header.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

/// 307 to the unauthorized page.
pub fn unauthorized_redirect(forwarded: &ForwardedRequest) -> Response {
    Redirect::temporary(&forwarded.unauthorized_url()).into_response()
}

/// Set `name` on the response unless `value` is not a valid header value.
pub fn set_header(response: &mut Response, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        response.headers_mut().insert(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_forwarded_request_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_URI, HeaderValue::from_static("/status"));
        headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("https"));
        headers.insert(X_FORWARDED_HOST, HeaderValue::from_static("node.local"));

        let forwarded = ForwardedRequest::from_headers(&headers);
        assert_eq!(forwarded.uri.as_deref(), Some("/status"));
        assert_eq!(forwarded.method, None);
        assert_eq!(forwarded.unauthorized_url(), "https://node.local/admin");
    }

    #[test]
    fn test_unauthorized_url_without_headers() {
        assert_eq!(ForwardedRequest::default().unauthorized_url(), ":///admin");
    }

    #[test]
    fn test_cookie_value() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; forward-gate.session=abc.def.ghi; other=1"),
        );
        assert_eq!(
            cookie_value(&headers, "forward-gate.session").as_deref(),
            Some("abc.def.ghi")
        );
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn test_cookie_value_across_headers() {
        let mut headers = HeaderMap::new();
        headers.append(header::COOKIE, HeaderValue::from_static("a=1"));
        headers.append(header::COOKIE, HeaderValue::from_static("b=2"));
        assert_eq!(cookie_value(&headers, "b").as_deref(), Some("2"));
    }

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer t0k"));
        assert_eq!(bearer_token(&headers), Some("t0k"));
    }

    #[test]
    fn test_unauthorized_redirect() {
        let forwarded = ForwardedRequest {
            proto: Some("http".into()),
            host: Some("example.org".into()),
            ..Default::default()
        };
        let response = unauthorized_redirect(&forwarded);
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "http://example.org/admin"
        );
    }
}

//! Session JWT verification
//!
//! User sessions are signed with the server-wide cookie secret. App-signed
//! tokens carry the app id in their `id` claim and are signed with that app's
//! hex secret. Only the HMAC family is accepted in both cases.

use std::collections::HashSet;
use std::future::Future;

use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use super::AuthError;

const HMAC_ALGORITHMS: [Algorithm; 3] = [Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

/// Claims read from a session token
#[derive(Debug, Deserialize)]
struct SessionClaims {
    #[serde(default)]
    id: Option<serde_json::Value>,
}

/// Claims written by [`SessionValidator::issue`]
#[derive(Debug, Serialize)]
struct IssuedClaims {
    id: u64,
    exp: i64,
    iat: i64,
}

/// A verified session token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    /// Numeric `id` claim, if present
    pub subject_id: Option<u64>,

    /// Raw base64url payload segment, forwarded downstream as-is
    pub payload_segment: String,
}

fn validation() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.algorithms = HMAC_ALGORITHMS.to_vec();
    // `exp` is checked when present but not required
    validation.required_spec_claims = HashSet::new();
    validation.validate_aud = false;
    validation
}

fn map_jwt_error(e: jsonwebtoken::errors::Error) -> AuthError {
    match e.kind() {
        ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        ErrorKind::InvalidAlgorithm => AuthError::UnexpectedAlgorithm(e.to_string()),
        _ => AuthError::InvalidJwt(e.to_string()),
    }
}

fn ensure_hmac(token: &str) -> Result<(), AuthError> {
    let header = decode_header(token).map_err(map_jwt_error)?;
    if HMAC_ALGORITHMS.contains(&header.alg) {
        Ok(())
    } else {
        Err(AuthError::UnexpectedAlgorithm(format!("{:?}", header.alg)))
    }
}

/// Numeric claim as an id. Floats are truncated.
fn numeric_id(value: &serde_json::Value) -> Result<u64, AuthError> {
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
        .ok_or_else(|| AuthError::InvalidJwt("id claim is not a number".to_string()))
}

fn payload_segment(token: &str) -> String {
    token.split('.').nth(1).unwrap_or_default().to_string()
}

/// Session token validator and issuer
pub struct SessionValidator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl SessionValidator {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }

    /// Verify a user session token against the server secret.
    pub fn validate(&self, token: &str) -> Result<SessionToken, AuthError> {
        verify(token, &self.decoding_key)
    }

    /// Verify an app-signed token.
    ///
    /// The unverified `id` claim names the app; `lookup` resolves its hex
    /// secret, which then verifies the signature. Returns the app id.
    pub async fn validate_with_app_secret<F, Fut>(
        &self,
        token: &str,
        lookup: F,
    ) -> Result<i64, AuthError>
    where
        F: FnOnce(i64) -> Fut,
        Fut: Future<Output = Result<Option<String>, AuthError>>,
    {
        ensure_hmac(token)?;

        let app_id = unverified_subject(token)?.ok_or(AuthError::MissingClaim("id"))?;
        let app_id = i64::try_from(app_id)
            .map_err(|_| AuthError::InvalidJwt("id claim out of range".to_string()))?;

        let secret = lookup(app_id).await?.ok_or(AuthError::UnknownApp(app_id))?;
        let secret = hex::decode(secret.trim()).map_err(|_| AuthError::InvalidAppSecret)?;

        verify(token, &DecodingKey::from_secret(&secret))?;
        Ok(app_id)
    }

    /// Issue a session token for a user id.
    pub fn issue(&self, subject_id: u64, ttl: Duration) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = IssuedClaims {
            id: subject_id,
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::InvalidJwt(e.to_string()))
    }
}

/// Issue a token signed with an app's hex secret, claiming the app's id.
pub fn issue_app_token(app_id: i64, hex_secret: &str, ttl: Duration) -> Result<String, AuthError> {
    let secret = hex::decode(hex_secret.trim()).map_err(|_| AuthError::InvalidAppSecret)?;
    let id = u64::try_from(app_id).map_err(|_| AuthError::UnknownApp(app_id))?;
    let now = Utc::now();
    let claims = IssuedClaims {
        id,
        exp: (now + ttl).timestamp(),
        iat: now.timestamp(),
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(&secret),
    )
    .map_err(|e| AuthError::InvalidJwt(e.to_string()))
}

fn verify(token: &str, key: &DecodingKey) -> Result<SessionToken, AuthError> {
    let data = decode::<SessionClaims>(token, key, &validation()).map_err(map_jwt_error)?;

    let subject_id = data.claims.id.as_ref().map(numeric_id).transpose()?;

    Ok(SessionToken {
        subject_id,
        payload_segment: payload_segment(token),
    })
}

/// Read the `id` claim without verifying the signature.
fn unverified_subject(token: &str) -> Result<Option<u64>, AuthError> {
    let mut validation = validation();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;

    let data = decode::<SessionClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map_err(map_jwt_error)?;

    data.claims.id.as_ref().map(numeric_id).transpose()
}

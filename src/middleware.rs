//! Session-token middleware
//!
//! Requests carry the session token in the `X-Auth-Token` header. Missing
//! and invalid tokens both end in 401, but the body says which, so a
//! client that forgot the header gets a different hint than one holding
//! an expired token. On success the decoded token is injected as a
//! request extension for downstream handlers.

use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{debug, warn};

use crate::token::{DecodedToken, TokenCodec};
use crate::{Error, Result};

/// Header carrying the session token.
pub const AUTH_HEADER: &str = "x-auth-token";

/// Pull the session token out of the request headers.
///
/// # Errors
///
/// Returns [`Error::MissingCredential`] when the header is absent or
/// blank; malformed (non-ASCII) header values count as absent.
pub fn extract_token(headers: &HeaderMap) -> Result<&str> {
    headers
        .get(AUTH_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(Error::MissingCredential)
}

/// Authentication middleware
pub async fn auth_middleware(
    State(codec): State<Arc<TokenCodec>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    let token = match extract_token(request.headers()) {
        Ok(token) => token.to_string(),
        Err(_) => {
            warn!(path = %path, "missing auth token header");
            return unauthorized_response("Missing X-Auth-Token header");
        }
    };

    match codec.verify(&token) {
        Ok(decoded) => {
            debug!(subject = %decoded.subject, path = %path, "authenticated request");
            request.extensions_mut().insert::<DecodedToken>(decoded);
            next.run(request).await
        }
        Err(_) => {
            warn!(path = %path, "invalid auth token");
            unauthorized_response("Invalid token")
        }
    }
}

/// Create a 401 Unauthorized response
fn unauthorized_response(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [("WWW-Authenticate", "X-Auth-Token")],
        Json(json!({ "error": message })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn extracts_and_trims_token() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTH_HEADER, HeaderValue::from_static(" abc.def.ghi "));
        assert_eq!(extract_token(&headers).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn missing_header_is_missing_credential() {
        let headers = HeaderMap::new();
        assert!(matches!(
            extract_token(&headers),
            Err(Error::MissingCredential)
        ));
    }

    #[test]
    fn blank_header_is_missing_credential() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTH_HEADER, HeaderValue::from_static("   "));
        assert!(matches!(
            extract_token(&headers),
            Err(Error::MissingCredential)
        ));
    }

    #[test]
    fn header_name_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Auth-Token", HeaderValue::from_static("tok"));
        assert_eq!(extract_token(&headers).unwrap(), "tok");
    }
}

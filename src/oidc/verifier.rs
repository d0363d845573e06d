//! Provider token verification
//!
//! # Verification flow
//!
//! 1. Decode the JWT header (no verification) to extract `kid` and `alg`.
//! 2. Reject algorithms outside the configured allow-list.
//! 3. Resolve the `kid` through the signing-key cache.
//! 4. Verify the signature and standard claims (`exp`, `iss`), then check
//!    the audience manually to cover both string and array forms.
//! 5. Map the claims to an [`ExternalIdentity`].
//!
//! Verified identities are cached keyed by the raw token, so a client
//! presenting the same provider token repeatedly costs one signature
//! check per cache TTL.

use jsonwebtoken::{Algorithm, Validation};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{KeyCache, OidcError};
use crate::cache::TtlCache;
use crate::config::OidcConfig;

/// Identity extracted from a verified provider token.
#[derive(Debug, Clone)]
pub struct ExternalIdentity {
    /// Provider-side username
    pub username: String,
    /// Email address, when the token carries one
    pub email: Option<String>,
    /// Provider-side group memberships
    pub groups: Vec<String>,
    /// ID token this identity came from, when obtained via code exchange
    pub id_token: Option<String>,
    /// Access token from the code exchange, when available
    pub access_token: Option<String>,
    /// Refresh token from the code exchange, when available
    pub refresh_token: Option<String>,
    /// Full claim set, for attribute mapping
    pub claims: Map<String, Value>,
}

/// Verifies provider-issued JWTs against the provider's JWKS.
pub struct OidcVerifier {
    config: OidcConfig,
    keys: KeyCache,
    cache: TtlCache<ExternalIdentity>,
}

impl OidcVerifier {
    /// Build a verifier from provider configuration.
    #[must_use]
    pub fn new(config: OidcConfig) -> Self {
        let keys = KeyCache::new(config.jwks_endpoint());
        let cache = TtlCache::new(config.cache.ttl, config.cache.max_entries);
        Self {
            config,
            keys,
            cache,
        }
    }

    /// Verify a provider token and map it to an identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is malformed, expired, signed with an
    /// unknown key or disallowed algorithm, from the wrong issuer, or
    /// addressed to a different client.
    pub async fn verify(&self, token: &str) -> Result<ExternalIdentity, OidcError> {
        if let Some(identity) = self.cache.get(token) {
            return Ok(identity);
        }

        let header = jsonwebtoken::decode_header(token)?;
        if !self.allowed_algorithms().contains(&header.alg) {
            return Err(OidcError::DisallowedAlgorithm(header.alg));
        }
        let kid = header.kid.ok_or(OidcError::MissingKeyId)?;
        let key = self.keys.resolve(&kid).await?;

        let mut validation = Validation::new(header.alg);
        validation.leeway = 60;
        validation.set_issuer(&[self.config.issuer_url()]);
        // Audience handled manually below: ID tokens carry `aud`, access
        // tokens do not, and the claim may be a string or an array.
        validation.validate_aud = false;

        let data = jsonwebtoken::decode::<Map<String, Value>>(token, &key, &validation)?;
        let claims = data.claims;

        if !self.config.client_id.is_empty() {
            if let Some(aud) = claims.get("aud") {
                check_audience(aud, &self.config.client_id)?;
            }
        }

        let identity = identity_from_claims(&self.config, claims)?;
        self.cache.insert(token.to_string(), identity.clone());
        Ok(identity)
    }

    /// Map a token's claims to an identity without verifying the
    /// signature. Exists only for the code-exchange fallback, where the
    /// token came straight from the provider over TLS a moment ago.
    pub(crate) fn decode_unverified(&self, token: &str) -> Result<ExternalIdentity, OidcError> {
        let claims = extract_unverified_claims(token)?;
        identity_from_claims(&self.config, claims)
    }

    fn allowed_algorithms(&self) -> Vec<Algorithm> {
        if self.config.allowed_algorithms.is_empty() {
            return vec![Algorithm::RS256];
        }
        self.config
            .allowed_algorithms
            .iter()
            .filter_map(|name| match name.parse::<Algorithm>() {
                Ok(alg) => Some(alg),
                Err(_) => {
                    warn!(algorithm = %name, "ignoring unknown algorithm in allow-list");
                    None
                }
            })
            .collect()
    }
}

/// Decode a JWT payload without signature verification.
fn extract_unverified_claims(token: &str) -> Result<Map<String, Value>, OidcError> {
    let invalid =
        || jsonwebtoken::errors::Error::from(jsonwebtoken::errors::ErrorKind::InvalidToken);

    let parts: Vec<&str> = token.splitn(3, '.').collect();
    if parts.len() < 2 {
        return Err(OidcError::Jwt(invalid()));
    }

    let payload =
        base64::Engine::decode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, parts[1])
            .map_err(|_| OidcError::Jwt(invalid()))?;

    serde_json::from_slice(&payload).map_err(|_| OidcError::Jwt(invalid()))
}

/// Validate that an `aud` claim covers our client id.
fn check_audience(aud: &Value, client_id: &str) -> Result<(), OidcError> {
    let matches = match aud {
        Value::String(s) => s == client_id,
        Value::Array(arr) => arr.iter().any(|v| v.as_str() == Some(client_id)),
        _ => false,
    };
    if matches {
        Ok(())
    } else {
        Err(OidcError::AudienceMismatch)
    }
}

/// Map raw claims to an identity per the configured claim names.
///
/// Username precedence: the configured claim, then `preferred_username`,
/// then `sub`. Group names longer than the configured maximum are dropped,
/// with a warning unless configured silent.
fn identity_from_claims(
    config: &OidcConfig,
    claims: Map<String, Value>,
) -> Result<ExternalIdentity, OidcError> {
    let username = [config.username_claim.as_str(), "preferred_username", "sub"]
        .iter()
        .find_map(|claim| claims.get(*claim).and_then(Value::as_str))
        .filter(|s| !s.trim().is_empty())
        .ok_or(OidcError::MissingClaim("sub"))?
        .to_string();

    let email = claims
        .get("email")
        .and_then(Value::as_str)
        .map(str::to_string);

    let groups: Vec<String> = claims
        .get(&config.groups_claim)
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .filter(|name| {
                    if name.len() > config.max_group_name_length {
                        if !config.ignore_oversized_groups {
                            warn!(
                                group_length = name.len(),
                                max = config.max_group_name_length,
                                "dropping oversized group name"
                            );
                        }
                        return false;
                    }
                    true
                })
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    debug!(username = %username, groups = groups.len(), "mapped provider identity");

    Ok(ExternalIdentity {
        username,
        email,
        groups,
        id_token: None,
        access_token: None,
        refresh_token: None,
        claims,
    })
}

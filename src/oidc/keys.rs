//! Provider signing-key cache
//!
//! Resolves JWT `kid` values to decoding keys by fetching the provider's
//! JWKS document. Resolved keys are immutable for the lifetime of a `kid`,
//! so they are cached without expiry; providers rotate by publishing new
//! `kid`s, never by changing an existing one. An unknown `kid` triggers a
//! fetch on every lookup and is never cached, so a slow JWKS rollout
//! cannot poison the cache.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use jsonwebtoken::{
    DecodingKey,
    jwk::{AlgorithmParameters, Jwk, JwkSet},
};
use tracing::debug;

use super::OidcError;

/// Caches decoding keys by `kid`, fetching the JWKS on misses.
pub struct KeyCache {
    keys: DashMap<String, Arc<DecodingKey>>,
    http: reqwest::Client,
    jwks_url: String,
}

impl KeyCache {
    /// Create a cache for the JWKS document at `jwks_url`.
    #[must_use]
    pub fn new(jwks_url: String) -> Self {
        Self {
            keys: DashMap::new(),
            http: reqwest::Client::builder()
                .https_only(true)
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            jwks_url,
        }
    }

    /// Resolve a `kid` to its decoding key, fetching the JWKS if unseen.
    ///
    /// # Errors
    ///
    /// Returns an error if the JWKS cannot be fetched, the `kid` is not
    /// published, or the key's type is unusable for verification.
    pub async fn resolve(&self, kid: &str) -> Result<Arc<DecodingKey>, OidcError> {
        if let Some(key) = self.keys.get(kid) {
            return Ok(Arc::clone(&key));
        }

        debug!(kid = %kid, "key not cached, fetching JWKS from {}", self.jwks_url);
        let jwks: JwkSet = self.http.get(&self.jwks_url).send().await?.json().await?;
        let key = Arc::new(find_key(&jwks, kid)?);

        // Insert-if-absent: a concurrent resolver may have won the race,
        // and both built the key from the same published JWK.
        Ok(Arc::clone(
            &self
                .keys
                .entry(kid.to_string())
                .or_insert_with(|| Arc::clone(&key)),
        ))
    }

    /// Number of resolved keys held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True when no key has been resolved yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Look up `kid` in a JWKS document and build its verification key.
///
/// # Errors
///
/// Returns [`OidcError::UnknownKeyId`] when the document publishes no key
/// under that `kid`, or an error from the key conversion.
pub(crate) fn find_key(jwks: &JwkSet, kid: &str) -> Result<DecodingKey, OidcError> {
    let jwk = jwks
        .keys
        .iter()
        .find(|k| k.common.key_id.as_deref() == Some(kid))
        .ok_or_else(|| OidcError::UnknownKeyId(kid.to_string()))?;
    decoding_key_from_jwk(jwk, kid)
}

/// Convert a published JWK to a verification key.
///
/// RSA keys are built from the `n`/`e` components, elliptic-curve keys
/// from `x`/`y`. Symmetric and OKP keys cannot back provider tokens.
fn decoding_key_from_jwk(jwk: &Jwk, kid: &str) -> Result<DecodingKey, OidcError> {
    match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => {
            DecodingKey::from_rsa_components(&rsa.n, &rsa.e).map_err(OidcError::Jwt)
        }
        AlgorithmParameters::EllipticCurve(ec) => {
            DecodingKey::from_ec_components(&ec.x, &ec.y).map_err(OidcError::Jwt)
        }
        AlgorithmParameters::OctetKey(_) | AlgorithmParameters::OctetKeyPair(_) => {
            Err(OidcError::UnsupportedKey(kid.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rsa_jwk(kid: &str) -> Jwk {
        // 2048-bit modulus and standard exponent, base64url without padding
        serde_json::from_value(serde_json::json!({
            "kty": "RSA",
            "kid": kid,
            "use": "sig",
            "alg": "RS256",
            "n": "u1SU1LfVLPHCozMxH2Mo4lgOEePzNm0tRgeLezV6ffAt0gunVTLw7onLRnrq0_IzW7yWR7QkrmBL7jTKEn5u-qKhbwKfBstIs-bMY2Zkp18gnTxKLxoS2tFczGkPLPgizskuemMghRniWaoLcyehkd3qqGElvW_VDL5AaWTg0nLVkjRo9z-40RQzuVaE8AkAFmxZzow3x-VJYKdjykkJ0iT9wCS0DRTXu269V264Vf_3jvredZiKRkgwlL9xNAwxXFg0x_XFw005UWVRIkdgcKWTjpBP2dPwVZ4WWC-9aGVd-Gyn1o0CLelf4rEjGoXbAAEgAqeGUxrcIlbjXfbcmw",
            "e": "AQAB"
        }))
        .unwrap()
    }

    #[test]
    fn jwk_to_key_accepts_rsa() {
        assert!(decoding_key_from_jwk(&rsa_jwk("k1"), "k1").is_ok());
    }

    #[test]
    fn published_kid_resolves_from_the_set() {
        let jwks = JwkSet {
            keys: vec![rsa_jwk("k1"), rsa_jwk("k2")],
        };
        assert!(find_key(&jwks, "k2").is_ok());
    }

    #[test]
    fn unpublished_kid_is_reported_by_name() {
        let jwks = JwkSet {
            keys: vec![rsa_jwk("k1")],
        };
        assert!(matches!(
            find_key(&jwks, "rotated-away"),
            Err(OidcError::UnknownKeyId(kid)) if kid == "rotated-away"
        ));
    }

    #[test]
    fn jwk_to_key_accepts_ec_point() {
        use base64::Engine as _;
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;

        // Uncompressed SEC1 point from a fresh P-256 keypair
        let keypair = rcgen::KeyPair::generate().unwrap();
        let point = keypair.public_key_raw();
        assert_eq!(point[0], 4);

        let jwk: Jwk = serde_json::from_value(serde_json::json!({
            "kty": "EC",
            "kid": "ec1",
            "crv": "P-256",
            "x": URL_SAFE_NO_PAD.encode(&point[1..33]),
            "y": URL_SAFE_NO_PAD.encode(&point[33..65]),
        }))
        .unwrap();
        assert!(decoding_key_from_jwk(&jwk, "ec1").is_ok());
    }

    #[test]
    fn jwk_to_key_rejects_symmetric() {
        let jwk: Jwk = serde_json::from_value(serde_json::json!({
            "kty": "oct",
            "kid": "sym",
            "k": "c2VjcmV0"
        }))
        .unwrap();
        assert!(matches!(
            decoding_key_from_jwk(&jwk, "sym"),
            Err(OidcError::UnsupportedKey(_))
        ));
    }
}

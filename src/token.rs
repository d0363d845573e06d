//! Session token issuance and verification
//!
//! Tokens are compact JWTs signed with RS256 or ES256. The audience claim
//! carries the installation's instance id so tokens minted by one
//! installation are rejected by another. Permission scopes, target
//! restrictions, and an optional impersonator are carried as comma-joined
//! string claims to keep the token small.
//!
//! When no signing key is configured an ephemeral P-256 keypair is
//! generated at startup. That keeps development setups working with zero
//! configuration, at the cost of every restart invalidating all
//! outstanding tokens.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rcgen::KeyPair;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::TokenConfig;
use crate::{Error, Result};

/// Issuer claim stamped on every token
const ISSUER: &str = "identity-core";

/// Wire-format claims
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    jti: String,
    sub: String,
    iss: String,
    aud: String,
    iat: i64,
    exp: i64,
    /// Comma-joined permission scopes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scp: Option<String>,
    /// Comma-joined target restrictions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tgt: Option<String>,
    /// Impersonating principal, when acting on behalf of another user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    imp: Option<String>,
}

/// A verified token's contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedToken {
    /// Unique token identifier
    pub token_id: String,
    /// Authenticated principal
    pub subject: String,
    /// Granted permission scopes
    pub permissions: Vec<String>,
    /// Target restrictions (empty = unrestricted)
    pub targets: Vec<String>,
    /// Principal acting on behalf of the subject, if any
    pub impersonator: Option<String>,
    /// Issue time
    pub issued_at: DateTime<Utc>,
    /// Expiry time
    pub expires_at: DateTime<Utc>,
}

/// Signs and verifies session tokens for one installation
pub struct TokenCodec {
    instance_id: String,
    algorithm: Algorithm,
    clock_skew: Duration,
    default_ttl: Duration,
    max_lifetime: Duration,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    public_key_pem: Option<String>,
}

impl TokenCodec {
    /// Build a codec from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the algorithm is unsupported, the configured
    /// keys cannot be parsed, or RS256 is requested without keys (RSA
    /// keypairs are never generated on the fly).
    pub fn from_config(config: &TokenConfig) -> Result<Self> {
        let algorithm = match config.algorithm.as_str() {
            "RS256" => Algorithm::RS256,
            "ES256" => Algorithm::ES256,
            other => {
                return Err(Error::Config(format!(
                    "unsupported token algorithm: {other}"
                )));
            }
        };

        let mut ephemeral = false;
        let (encoding_key, decoding_key, public_key_pem) =
            match (config.resolve_private_key(), config.resolve_public_key()) {
                (Some(private_pem), Some(public_pem)) => {
                    let enc = match algorithm {
                        Algorithm::RS256 => EncodingKey::from_rsa_pem(private_pem.as_bytes()),
                        _ => EncodingKey::from_ec_pem(private_pem.as_bytes()),
                    }
                    .map_err(|e| Error::Config(format!("invalid private key: {e}")))?;
                    let dec = match algorithm {
                        Algorithm::RS256 => DecodingKey::from_rsa_pem(public_pem.as_bytes()),
                        _ => DecodingKey::from_ec_pem(public_pem.as_bytes()),
                    }
                    .map_err(|e| Error::Config(format!("invalid public key: {e}")))?;
                    (enc, dec, Some(public_pem))
                }
                (None, None) => {
                    if algorithm == Algorithm::RS256 {
                        return Err(Error::Config(
                            "RS256 requires configured keys; ephemeral keys are ES256 only"
                                .to_string(),
                        ));
                    }
                    warn!("no signing key configured, generating ephemeral keypair; tokens will not survive restart");
                    ephemeral = true;
                    let keypair = KeyPair::generate()
                        .map_err(|e| Error::Config(format!("keypair generation failed: {e}")))?;
                    let private_pem = keypair.serialize_pem();
                    let public_pem = keypair.public_key_pem();
                    let enc = EncodingKey::from_ec_pem(private_pem.as_bytes())
                        .map_err(|e| Error::Config(format!("ephemeral private key: {e}")))?;
                    let dec = DecodingKey::from_ec_pem(public_pem.as_bytes())
                        .map_err(|e| Error::Config(format!("ephemeral public key: {e}")))?;
                    (enc, dec, Some(public_pem))
                }
                _ => {
                    return Err(Error::Config(
                        "token.private_key and token.public_key must be set together".to_string(),
                    ));
                }
            };

        let codec = Self {
            instance_id: config.instance_id.clone(),
            algorithm,
            clock_skew: config.clock_skew,
            default_ttl: config.default_ttl,
            max_lifetime: config.max_lifetime,
            encoding_key,
            decoding_key,
            public_key_pem,
        };

        if ephemeral {
            // Log a long-lived development token once, so a zero-config
            // setup has something to authenticate with
            if let Ok(dev_token) =
                codec.issue("system", &[], &[], None, Some(Duration::from_secs(24 * 60 * 60)))
            {
                info!(
                    public_key = codec.public_key_pem.as_deref().unwrap_or_default(),
                    "development token (valid 24h): {dev_token}"
                );
            }
        }

        Ok(codec)
    }

    /// The verification key in PEM form, when known
    #[must_use]
    pub fn public_key_pem(&self) -> Option<&str> {
        self.public_key_pem.as_deref()
    }

    /// Issue a signed token for `subject`.
    ///
    /// `ttl` defaults to the configured lifetime and is clamped to the
    /// configured maximum; callers cannot mint longer-lived tokens than
    /// the installation allows.
    ///
    /// # Errors
    ///
    /// Returns an error if the subject is blank or signing fails.
    pub fn issue(
        &self,
        subject: &str,
        permissions: &[String],
        targets: &[String],
        impersonator: Option<&str>,
        ttl: Option<Duration>,
    ) -> Result<String> {
        if subject.trim().is_empty() {
            return Err(Error::InvalidToken);
        }

        let lifetime = ttl.unwrap_or(self.default_ttl).min(self.max_lifetime);
        let now = Utc::now();
        let claims = Claims {
            jti: Uuid::new_v4().to_string(),
            sub: subject.to_string(),
            iss: ISSUER.to_string(),
            aud: self.instance_id.clone(),
            iat: now.timestamp(),
            exp: now.timestamp() + lifetime.as_secs() as i64,
            scp: join_csv(permissions),
            tgt: join_csv(targets),
            imp: impersonator.map(str::to_string),
        };

        jsonwebtoken::encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(|e| Error::Internal(format!("token signing failed: {e}")))
    }

    /// Verify a token and return its contents.
    ///
    /// Signature, expiry (with configured leeway), issuer, and audience
    /// are all checked. Every failure collapses to [`Error::InvalidToken`];
    /// the cause is logged at debug level but never reaches the caller,
    /// so responses leak nothing about why a token was rejected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidToken`] for any malformed, tampered,
    /// expired, or foreign token.
    pub fn verify(&self, token: &str) -> Result<DecodedToken> {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = self.clock_skew.as_secs();
        validation.set_audience(&[&self.instance_id]);
        validation.set_issuer(&[ISSUER]);

        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| {
                debug!(error = %e, "token verification failed");
                Error::InvalidToken
            })?;
        let claims = data.claims;

        if claims.sub.trim().is_empty() {
            debug!("token rejected: blank subject");
            return Err(Error::InvalidToken);
        }

        let issued_at = Utc
            .timestamp_opt(claims.iat, 0)
            .single()
            .ok_or(Error::InvalidToken)?;
        let expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .ok_or(Error::InvalidToken)?;

        Ok(DecodedToken {
            token_id: claims.jti,
            subject: claims.sub,
            permissions: split_csv(claims.scp.as_deref()),
            targets: split_csv(claims.tgt.as_deref()),
            impersonator: claims.imp.filter(|s| !s.trim().is_empty()),
            issued_at,
            expires_at,
        })
    }

    /// Verify a token and return just its subject.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`TokenCodec::verify`].
    pub fn validate(&self, token: &str) -> Result<String> {
        Ok(self.verify(token)?.subject)
    }
}

fn join_csv(values: &[String]) -> Option<String> {
    let joined: Vec<&str> = values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .collect();
    if joined.is_empty() {
        None
    } else {
        Some(joined.join(","))
    }
}

fn split_csv(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

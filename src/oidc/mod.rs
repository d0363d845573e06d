//! External identity provider integration (OIDC)
//!
//! Verifies provider-issued JWTs against the provider's published JWKS,
//! exchanges authorization codes at the hosted token endpoint, and
//! provisions local shadow records for provider identities.

pub mod exchange;
pub mod keys;
pub mod provision;
pub mod verifier;

pub use exchange::{OidcClient, TokenResponse};
pub use keys::KeyCache;
pub use provision::{MemoryShadowStore, ShadowUser, ShadowUserStore};
pub use verifier::{ExternalIdentity, OidcVerifier};

use crate::Error;

/// Error variants for provider token verification failures.
#[derive(Debug, thiserror::Error)]
pub enum OidcError {
    /// JWT decode / signature verification failed.
    #[error("JWT verification failed: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// The JWT header contains no `kid` field.
    #[error("JWT missing 'kid' field in header")]
    MissingKeyId,

    /// The `kid` in the JWT header is not in the provider's JWKS.
    #[error("Unknown key ID: {0}")]
    UnknownKeyId(String),

    /// The JWK uses a key type or curve we cannot verify with.
    #[error("Unsupported key type for key ID: {0}")]
    UnsupportedKey(String),

    /// The token is signed with an algorithm outside the allow-list.
    #[error("Disallowed signature algorithm: {0:?}")]
    DisallowedAlgorithm(jsonwebtoken::Algorithm),

    /// The token's audience does not include our client id.
    #[error("Audience mismatch")]
    AudienceMismatch,

    /// A claim the identity mapping needs is missing or malformed.
    #[error("Missing or malformed claim: {0}")]
    MissingClaim(&'static str),

    /// Network or HTTP error while talking to the provider.
    #[error("Provider HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<OidcError> for Error {
    fn from(e: OidcError) -> Self {
        match e {
            OidcError::Http(e) => Error::Http(e),
            _ => Error::InvalidToken,
        }
    }
}

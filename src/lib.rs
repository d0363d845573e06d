//! Identity verification core
//!
//! Building blocks for authenticating users against local credentials, an
//! external OIDC provider, or an LDAP directory, and for minting and
//! verifying the session tokens that carry the result.
//!
//! # Components
//!
//! - **Tokens**: compact signed session tokens with scoped permissions
//!   ([`token::TokenCodec`])
//! - **Passwords**: multi-scheme credential hashing and verification
//!   ([`password`])
//! - **External provider**: JWKS-backed token verification, code exchange,
//!   and shadow-record provisioning ([`oidc`])
//! - **Directory**: LDAP bind authentication with cached group resolution
//!   ([`directory`])
//! - **Middleware**: axum layer enforcing the `X-Auth-Token` header
//!   ([`middleware`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod config;
pub mod directory;
pub mod error;
pub mod middleware;
pub mod oidc;
pub mod password;
pub mod token;

pub use cache::TtlCache;
pub use config::Config;
pub use error::{Error, Result};
pub use token::{DecodedToken, TokenCodec};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}

//! Error types for the identity core

use thiserror::Error;

/// Result type alias for the identity core
pub type Result<T> = std::result::Result<T, Error>;

/// Identity core errors
///
/// Expected authentication outcomes are modeled here rather than panicking:
/// a bad credential is a routine result of verification, not an exceptional
/// condition. The specific cause of a verification failure is logged at debug
/// level where it occurs and never carried in the variant, so callers cannot
/// leak it.
#[derive(Error, Debug)]
pub enum Error {
    /// No credential was presented at all (distinct from an invalid one)
    #[error("Missing credential")]
    MissingCredential,

    /// Token failed verification: bad signature, expired, wrong audience,
    /// empty subject, or unparseable
    #[error("Invalid token")]
    InvalidToken,

    /// Credential verification failed (wrong password, bind rejected)
    #[error("Unauthorized")]
    Unauthorized,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Directory server error (connection, search, or bind-level failure)
    #[error("Directory error: {0}")]
    Directory(#[from] ldap3::LdapError),

    /// Directory write attempted without write mode enabled
    #[error("Directory write not enabled")]
    WriteDisabled,

    /// User registration attempted without the register flag enabled
    #[error("User registration not enabled")]
    RegistrationDisabled,

    /// Entry already exists in the directory
    #[error("Entry already exists: {0}")]
    AlreadyExists(String),

    /// HTTP error from an outbound call
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

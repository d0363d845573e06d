//! Configuration management

use std::{collections::HashMap, env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Token issuance and verification
    pub token: TokenConfig,
    /// External identity provider (OIDC)
    pub oidc: OidcConfig,
    /// LDAP directory authentication
    pub directory: DirectoryConfig,
}

/// Token issuance and verification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Installation identifier, used as token audience
    pub instance_id: String,

    /// Signing algorithm (`RS256` or `ES256`)
    pub algorithm: String,

    /// PEM-encoded private signing key.
    /// Supports `env:VAR_NAME` indirection. When unset an ephemeral
    /// keypair is generated at startup and tokens do not survive restarts.
    #[serde(default)]
    pub private_key: Option<String>,

    /// PEM-encoded public verification key (required with `private_key`)
    #[serde(default)]
    pub public_key: Option<String>,

    /// Default lifetime for issued tokens
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,

    /// Hard upper bound on token lifetime; longer requests are clamped
    #[serde(with = "humantime_serde")]
    pub max_lifetime: Duration,

    /// Leeway applied to expiry and not-before checks
    #[serde(with = "humantime_serde")]
    pub clock_skew: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            instance_id: "default".to_string(),
            algorithm: "ES256".to_string(),
            private_key: None,
            public_key: None,
            default_ttl: Duration::from_secs(300),
            max_lifetime: Duration::from_secs(24 * 60 * 60),
            clock_skew: Duration::from_secs(30),
        }
    }
}

impl TokenConfig {
    /// Resolve the private key (expand `env:VAR_NAME` indirection)
    #[must_use]
    pub fn resolve_private_key(&self) -> Option<String> {
        self.private_key.as_deref().map(resolve_secret)
    }

    /// Resolve the public key (expand `env:VAR_NAME` indirection)
    #[must_use]
    pub fn resolve_public_key(&self) -> Option<String> {
        self.public_key.as_deref().map(resolve_secret)
    }
}

/// TTL cache sizing, shared by the provider identity and attribute caches
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Time entries stay valid after insertion
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// Maximum number of entries before eviction (0 = unbounded)
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_entries: 10_000,
        }
    }
}

/// External identity provider configuration (OIDC / hosted user pool)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OidcConfig {
    /// Enable external provider verification
    pub enabled: bool,

    /// Hosted user pool region (used to derive the issuer URL)
    pub region: String,

    /// User pool identifier
    pub user_pool_id: String,

    /// Explicit issuer URL; overrides the region/pool derivation
    #[serde(default)]
    pub issuer: Option<String>,

    /// Explicit JWKS URL; overrides `{issuer}/.well-known/jwks.json`
    #[serde(default)]
    pub jwks_url: Option<String>,

    /// Hosted UI domain for the code-exchange and authorize endpoints,
    /// e.g. `auth.example.com` or `my-pool.auth.eu-west-1.amazoncognito.com`
    #[serde(default)]
    pub domain: Option<String>,

    /// OAuth client identifier
    pub client_id: String,

    /// OAuth client secret (supports `env:VAR_NAME`). When set, the code
    /// exchange authenticates with HTTP Basic instead of a form field.
    #[serde(default)]
    pub client_secret: Option<String>,

    /// Redirect URI registered with the provider
    pub redirect_uri: String,

    /// Response type requested on the authorize redirect
    /// (`code`, `token`, or `id_token`)
    pub response_type: String,

    /// Scopes requested on the authorize redirect
    pub scopes: Vec<String>,

    /// Claim holding the provider-side username
    pub username_claim: String,

    /// Claim holding the provider-side group list
    pub groups_claim: String,

    /// Longest accepted group name; longer entries are dropped
    pub max_group_name_length: usize,

    /// Drop oversized group names silently instead of logging a warning
    pub ignore_oversized_groups: bool,

    /// Accepted token signature algorithms (empty = `RS256` only)
    #[serde(default)]
    pub allowed_algorithms: Vec<String>,

    /// Create a local shadow record on first sight of a provider identity
    pub auto_create_users: bool,

    /// Provider username to local login name overrides
    #[serde(default)]
    pub login_name_map: HashMap<String, String>,

    /// Provider claim to local attribute name mapping
    #[serde(default)]
    pub attribute_map: HashMap<String, String>,

    /// Verified-identity and attribute cache sizing
    pub cache: CacheConfig,
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            region: "eu-west-1".to_string(),
            user_pool_id: String::new(),
            issuer: None,
            jwks_url: None,
            domain: None,
            client_id: String::new(),
            client_secret: None,
            redirect_uri: String::new(),
            response_type: "code".to_string(),
            scopes: vec![
                "openid".to_string(),
                "email".to_string(),
                "profile".to_string(),
            ],
            username_claim: "cognito:username".to_string(),
            groups_claim: "cognito:groups".to_string(),
            max_group_name_length: 255,
            ignore_oversized_groups: false,
            allowed_algorithms: Vec::new(),
            auto_create_users: true,
            login_name_map: HashMap::new(),
            attribute_map: HashMap::new(),
            cache: CacheConfig::default(),
        }
    }
}

impl OidcConfig {
    /// Token issuer URL, derived from region and pool unless set explicitly
    #[must_use]
    pub fn issuer_url(&self) -> String {
        self.issuer.clone().unwrap_or_else(|| {
            format!(
                "https://cognito-idp.{}.amazonaws.com/{}",
                self.region, self.user_pool_id
            )
        })
    }

    /// JWKS document URL
    #[must_use]
    pub fn jwks_endpoint(&self) -> String {
        self.jwks_url
            .clone()
            .unwrap_or_else(|| format!("{}/.well-known/jwks.json", self.issuer_url()))
    }

    /// Hosted UI base URL (`https://{domain}`)
    ///
    /// # Errors
    ///
    /// Returns an error if no hosted UI domain is configured.
    pub fn domain_base(&self) -> Result<String> {
        let domain = self
            .domain
            .as_deref()
            .ok_or_else(|| Error::Config("oidc.domain is not configured".to_string()))?;
        Ok(format!("https://{domain}"))
    }

    /// Authorization-code exchange endpoint
    ///
    /// # Errors
    ///
    /// Returns an error if no hosted UI domain is configured.
    pub fn token_endpoint(&self) -> Result<String> {
        Ok(format!("{}/oauth2/token", self.domain_base()?))
    }

    /// Interactive login endpoint
    ///
    /// # Errors
    ///
    /// Returns an error if no hosted UI domain is configured.
    pub fn authorize_endpoint(&self) -> Result<String> {
        Ok(format!("{}/oauth2/authorize", self.domain_base()?))
    }

    /// Resolve the client secret (expand `env:VAR_NAME` indirection)
    #[must_use]
    pub fn resolve_client_secret(&self) -> Option<String> {
        self.client_secret.as_deref().map(resolve_secret)
    }
}

/// LDAP directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Enable directory authentication
    pub enabled: bool,

    /// Directory server URL (`ldap://` or `ldaps://`)
    pub url: String,

    /// Upgrade plain connections with StartTLS before binding
    pub starttls: bool,

    /// Connection timeout
    #[serde(with = "humantime_serde")]
    pub conn_timeout: Duration,

    /// Search base for user entries
    pub base_dn: String,

    /// DN used for administrative binds (searches and writes)
    #[serde(default)]
    pub admin_dn: Option<String>,

    /// Password for the administrative bind (supports `env:VAR_NAME`)
    #[serde(default)]
    pub admin_password: Option<String>,

    /// Object class users must carry
    pub user_object_class: String,

    /// Attribute holding the login name
    pub user_attribute: String,

    /// Extra filter ANDed into every user search, e.g. `(st=active)`
    #[serde(default)]
    pub extra_user_filter: Option<String>,

    /// Directory attribute to local attribute name mapping
    #[serde(default)]
    pub attribute_map: HashMap<String, String>,

    /// Object class group entries carry
    pub group_object_class: String,

    /// Attribute holding the group name
    pub group_attribute: String,

    /// Attribute listing group members (DNs)
    pub group_member_attribute: String,

    /// Search base for groups; falls back to `base_dn`
    #[serde(default)]
    pub group_base_dn: Option<String>,

    /// Extra filter ANDed into the group search
    #[serde(default)]
    pub extra_group_filter: Option<String>,

    /// Resolve group membership through nested groups
    pub nested_groups: bool,

    /// How long cached group data stays fresh
    #[serde(with = "humantime_serde")]
    pub group_refresh: Duration,

    /// Trust an upstream proxy's authentication and skip the password bind
    pub external_auth: bool,

    /// Allow attribute and password writes to the directory
    pub writable: bool,

    /// Allow creating new user entries
    pub allow_registration: bool,

    /// Attribute to stamp on newly registered entries with
    /// `registration_domain`
    #[serde(default)]
    pub registration_domain_attribute: Option<String>,

    /// Value for `registration_domain_attribute`
    #[serde(default)]
    pub registration_domain: Option<String>,

    /// Scheme for newly stored passwords (`SSHA`, `SHA256`, ...)
    pub password_scheme: String,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "ldap://localhost:389".to_string(),
            starttls: false,
            conn_timeout: Duration::from_secs(10),
            base_dn: String::new(),
            admin_dn: None,
            admin_password: None,
            user_object_class: "inetOrgPerson".to_string(),
            user_attribute: "uid".to_string(),
            extra_user_filter: None,
            attribute_map: HashMap::new(),
            group_object_class: "groupOfUniqueNames".to_string(),
            group_attribute: "cn".to_string(),
            group_member_attribute: "uniqueMember".to_string(),
            group_base_dn: None,
            extra_group_filter: None,
            nested_groups: true,
            group_refresh: Duration::from_secs(300),
            external_auth: false,
            writable: false,
            allow_registration: false,
            registration_domain_attribute: None,
            registration_domain: None,
            password_scheme: "SSHA".to_string(),
        }
    }
}

impl DirectoryConfig {
    /// Resolve the admin password (expand `env:VAR_NAME` indirection)
    #[must_use]
    pub fn resolve_admin_password(&self) -> Option<String> {
        self.admin_password.as_deref().map(resolve_secret)
    }

    /// Search base for group entries
    #[must_use]
    pub fn group_base(&self) -> &str {
        self.group_base_dn.as_deref().unwrap_or(&self.base_dn)
    }
}

/// Expand `env:VAR_NAME` indirection; unset variables pass the literal through
fn resolve_secret(value: &str) -> String {
    if let Some(var_name) = value.strip_prefix("env:") {
        env::var(var_name).unwrap_or_else(|_| value.to_string())
    } else {
        value.to_string()
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (IDENTITY_CORE_ prefix)
        figment = figment.merge(Env::prefixed("IDENTITY_CORE_").split("__"));

        figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.token.algorithm, "ES256");
        assert_eq!(config.token.max_lifetime, Duration::from_secs(86_400));
        assert!(!config.oidc.enabled);
        assert!(!config.directory.enabled);
        assert!(!config.directory.writable);
    }

    #[test]
    fn issuer_and_jwks_derived_from_pool() {
        let oidc = OidcConfig {
            region: "us-east-1".to_string(),
            user_pool_id: "us-east-1_AbCdEf".to_string(),
            ..OidcConfig::default()
        };
        assert_eq!(
            oidc.issuer_url(),
            "https://cognito-idp.us-east-1.amazonaws.com/us-east-1_AbCdEf"
        );
        assert_eq!(
            oidc.jwks_endpoint(),
            "https://cognito-idp.us-east-1.amazonaws.com/us-east-1_AbCdEf/.well-known/jwks.json"
        );
    }

    #[test]
    fn explicit_issuer_overrides_derivation() {
        let oidc = OidcConfig {
            issuer: Some("https://idp.example.com/realm".to_string()),
            ..OidcConfig::default()
        };
        assert_eq!(oidc.issuer_url(), "https://idp.example.com/realm");
        assert_eq!(
            oidc.jwks_endpoint(),
            "https://idp.example.com/realm/.well-known/jwks.json"
        );
    }

    #[test]
    fn hosted_ui_endpoints_require_domain() {
        let mut oidc = OidcConfig::default();
        assert!(oidc.token_endpoint().is_err());

        oidc.domain = Some("auth.example.com".to_string());
        assert_eq!(
            oidc.token_endpoint().unwrap(),
            "https://auth.example.com/oauth2/token"
        );
        assert_eq!(
            oidc.authorize_endpoint().unwrap(),
            "https://auth.example.com/oauth2/authorize"
        );
    }

    #[test]
    fn env_indirection_resolves() {
        // Unset variables pass the literal through
        assert_eq!(resolve_secret("env:__IDCORE_TEST_UNSET__"), "env:__IDCORE_TEST_UNSET__");
        assert_eq!(resolve_secret("literal-secret"), "literal-secret");
    }

    #[test]
    fn group_base_falls_back_to_base_dn() {
        let mut dir = DirectoryConfig {
            base_dn: "dc=example,dc=com".to_string(),
            ..DirectoryConfig::default()
        };
        assert_eq!(dir.group_base(), "dc=example,dc=com");
        dir.group_base_dn = Some("ou=groups,dc=example,dc=com".to_string());
        assert_eq!(dir.group_base(), "ou=groups,dc=example,dc=com");
    }
}

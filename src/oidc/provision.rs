//! Local shadow records for provider identities
//!
//! Accounts that authenticate through the external provider still need a
//! local record for ownership, preferences, and audit trails. The record
//! carries the `{COGNITOUSER}` credential sentinel so no local password
//! check can ever succeed against it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tracing::info;

use super::ExternalIdentity;
use crate::cache::TtlCache;
use crate::config::OidcConfig;
use crate::password::CredentialScheme;
use crate::{Error, Result};

/// Local shadow record for an externally managed account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowUser {
    /// Local login name
    pub login_name: String,
    /// Stored credential; always a managed sentinel for shadow records
    pub credential: String,
    /// Which remote service manages this account
    pub remote_service: String,
    /// When the record was first created
    pub registered_at: DateTime<Utc>,
    /// Whether the account is active
    pub active: bool,
}

/// Backing store for shadow records.
pub trait ShadowUserStore: Send + Sync {
    /// Look up a record by login name.
    fn find(&self, login_name: &str) -> Option<ShadowUser>;

    /// Create a record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyExists`] if the login name is taken.
    fn create(&self, user: ShadowUser) -> Result<()>;
}

/// In-memory store, for tests and single-node setups.
#[derive(Debug, Default)]
pub struct MemoryShadowStore {
    users: DashMap<String, ShadowUser>,
}

impl MemoryShadowStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ShadowUserStore for MemoryShadowStore {
    fn find(&self, login_name: &str) -> Option<ShadowUser> {
        self.users.get(login_name).map(|u| u.clone())
    }

    fn create(&self, user: ShadowUser) -> Result<()> {
        use dashmap::mapref::entry::Entry;

        let login_name = user.login_name.clone();
        match self.users.entry(login_name.clone()) {
            Entry::Vacant(entry) => {
                entry.insert(user);
                Ok(())
            }
            Entry::Occupied(_) => Err(Error::AlreadyExists(login_name)),
        }
    }
}

/// Maps provider identities to local records, creating them on first sight.
pub struct ShadowProvisioner {
    config: OidcConfig,
    attributes: TtlCache<HashMap<String, String>>,
}

impl ShadowProvisioner {
    /// Build a provisioner from provider configuration.
    #[must_use]
    pub fn new(config: OidcConfig) -> Self {
        let attributes = TtlCache::new(config.cache.ttl, config.cache.max_entries);
        Self { config, attributes }
    }

    /// The local login name for a provider identity, applying the
    /// configured override map.
    #[must_use]
    pub fn login_name(&self, identity: &ExternalIdentity) -> String {
        self.config
            .login_name_map
            .get(&identity.username)
            .cloned()
            .unwrap_or_else(|| identity.username.clone())
    }

    /// Local attributes derived from the identity's claims per the
    /// configured claim-to-attribute map. Cached per username.
    #[must_use]
    pub fn mapped_attributes(&self, identity: &ExternalIdentity) -> HashMap<String, String> {
        if let Some(cached) = self.attributes.get(&identity.username) {
            return cached;
        }

        let mut mapped = HashMap::new();
        for (claim, local_name) in &self.config.attribute_map {
            if let Some(value) = identity.claims.get(claim).and_then(claim_to_string) {
                mapped.insert(local_name.clone(), value);
            }
        }
        self.attributes
            .insert(identity.username.clone(), mapped.clone());
        mapped
    }

    /// Return the local record for an identity, creating it when
    /// auto-creation is enabled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthorized`] when no local record exists and
    /// auto-creation is disabled.
    pub fn ensure_local_user(
        &self,
        store: &dyn ShadowUserStore,
        identity: &ExternalIdentity,
    ) -> Result<ShadowUser> {
        let login_name = self.login_name(identity);
        if let Some(user) = store.find(&login_name) {
            return Ok(user);
        }
        if !self.config.auto_create_users {
            return Err(Error::Unauthorized);
        }

        let user = ShadowUser {
            login_name: login_name.clone(),
            credential: CredentialScheme::ExternalManaged
                .prefix()
                .unwrap_or_default()
                .to_string(),
            remote_service: "oidc".to_string(),
            registered_at: Utc::now(),
            active: true,
        };
        match store.create(user.clone()) {
            Ok(()) => {
                info!(login_name = %login_name, "created shadow record for provider identity");
                Ok(user)
            }
            // Lost a creation race; the winner's record is the truth.
            Err(Error::AlreadyExists(_)) => {
                store.find(&login_name).ok_or(Error::Unauthorized)
            }
            Err(e) => Err(e),
        }
    }
}

/// Flatten a claim value for attribute storage. Arrays of strings are
/// comma-joined; nested objects are skipped.
fn claim_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(arr) => {
            let parts: Vec<&str> = arr.iter().filter_map(Value::as_str).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(","))
            }
        }
        Value::Null | Value::Object(_) => None,
    }
}

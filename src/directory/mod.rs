//! LDAP directory authentication
//!
//! Users authenticate by binding to the directory with their own
//! credentials; an administrative bind is used for searches and for the
//! optional write path. Group membership is resolved from group entries
//! and cached in memory, refreshed when the snapshot goes stale. In
//! external-auth mode an upstream proxy is trusted to have authenticated
//! the user already and the password bind is skipped.

pub mod escape;
pub mod write;

pub use escape::{escape_dn_value, escape_filter_value};

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, NaiveDateTime, Utc};
use dashmap::DashMap;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use tracing::{debug, info, warn};

use crate::config::DirectoryConfig;
use crate::{Error, Result};

/// A user entry resolved from the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryUser {
    /// Distinguished name of the entry
    pub dn: String,
    /// Login name (value of the configured user attribute)
    pub login_name: String,
    /// Locally named attributes per the configured attribute map
    pub attributes: HashMap<String, String>,
    /// Names of groups the user belongs to
    pub groups: Vec<String>,
}

/// A cached group entry.
#[derive(Debug, Clone)]
struct DirectoryGroup {
    dn: String,
    name: String,
    /// Member DNs, lowercased for comparison
    members: HashSet<String>,
    modified_at: Option<DateTime<Utc>>,
}

/// Authenticates users against an LDAP directory.
pub struct DirectoryAuthenticator {
    config: DirectoryConfig,
    /// Group cache keyed by lowercased group DN
    groups: DashMap<String, DirectoryGroup>,
    /// When the group cache was last loaded, in epoch millis (0 = never)
    last_group_reload: AtomicI64,
}

impl DirectoryAuthenticator {
    /// Build an authenticator from directory configuration.
    #[must_use]
    pub fn new(config: DirectoryConfig) -> Self {
        Self {
            config,
            groups: DashMap::new(),
            last_group_reload: AtomicI64::new(0),
        }
    }

    /// Authenticate a user and return their entry with groups resolved.
    ///
    /// In external-auth mode the password is ignored and the user only
    /// has to exist; otherwise a bind as the user's own DN proves the
    /// password. Empty passwords are rejected outright, since many
    /// servers treat an empty-password bind as anonymous and "succeed".
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingCredential`] for an empty password,
    /// [`Error::Unauthorized`] for unknown users or failed binds, or a
    /// directory error for connection problems.
    pub async fn authenticate(&self, login_name: &str, password: &str) -> Result<DirectoryUser> {
        if !self.config.external_auth && password.is_empty() {
            return Err(Error::MissingCredential);
        }

        let mut admin = self.admin_bind().await?;
        let result = self.authenticate_inner(&mut admin, login_name, password).await;
        let _ = admin.unbind().await;
        result
    }

    async fn authenticate_inner(
        &self,
        admin: &mut Ldap,
        login_name: &str,
        password: &str,
    ) -> Result<DirectoryUser> {
        let mut user = match self.search_user(admin, login_name).await? {
            Some(user) => user,
            None => {
                debug!(login_name = %login_name, "user not found in directory");
                return Err(Error::Unauthorized);
            }
        };

        if self.config.external_auth {
            debug!(login_name = %login_name, "external-auth mode, skipping password bind");
        } else {
            self.bind_as_user(&user.dn, password).await?;
        }

        self.maybe_reload_groups(admin).await?;
        user.groups = self.groups_for_dn(&user.dn);
        Ok(user)
    }

    /// Look up a user entry without authenticating.
    ///
    /// # Errors
    ///
    /// Returns a directory error for connection problems.
    pub async fn find_user(&self, login_name: &str) -> Result<Option<DirectoryUser>> {
        let mut admin = self.admin_bind().await?;
        let result = self.search_user(&mut admin, login_name).await;
        let _ = admin.unbind().await;
        result
    }

    /// Reverse lookup: the login name for a known entry DN.
    ///
    /// # Errors
    ///
    /// Returns a directory error for connection problems.
    pub async fn login_for_dn(&self, dn: &str) -> Result<Option<String>> {
        let mut admin = self.admin_bind().await?;
        let result = admin
            .search(
                dn,
                Scope::Base,
                "(objectClass=*)",
                vec![self.config.user_attribute.as_str()],
            )
            .await
            .and_then(ldap3::SearchResult::success);
        let _ = admin.unbind().await;

        let (entries, _) = result?;
        Ok(entries.into_iter().next().and_then(|entry| {
            SearchEntry::construct(entry)
                .attrs
                .get(&self.config.user_attribute)
                .and_then(|values| values.first())
                .cloned()
        }))
    }

    /// Whether an entry was modified strictly after `since`, per its
    /// `modifyTimestamp` (falling back to `createTimestamp`). An entry
    /// with neither timestamp counts as modified, since freshness cannot
    /// be proven.
    ///
    /// # Errors
    ///
    /// Returns a directory error for connection problems; a missing entry
    /// counts as modified.
    pub async fn entry_modified_since(&self, dn: &str, since: DateTime<Utc>) -> Result<bool> {
        let mut admin = self.admin_bind().await?;
        let result = admin
            .search(
                dn,
                Scope::Base,
                "(objectClass=*)",
                vec!["modifyTimestamp", "createTimestamp"],
            )
            .await
            .and_then(ldap3::SearchResult::success);
        let _ = admin.unbind().await;

        let (entries, _) = result?;
        let Some(entry) = entries.into_iter().next() else {
            return Ok(true);
        };
        let entry = SearchEntry::construct(entry);
        let timestamp = ["modifyTimestamp", "createTimestamp"]
            .iter()
            .find_map(|attr| entry.attrs.get(*attr).and_then(|v| v.first()))
            .and_then(|ts| parse_generalized_time(ts));
        Ok(timestamp.is_none_or(|ts| ts > since))
    }

    /// Whether enough is configured to authenticate users at all.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.config.enabled && !self.config.url.is_empty() && !self.config.base_dn.is_empty()
    }

    /// Whether group resolution is configured on top of authentication.
    #[must_use]
    pub fn is_configured_with_groups(&self) -> bool {
        self.is_configured()
            && !self.config.group_object_class.is_empty()
            && !self.config.group_member_attribute.is_empty()
    }

    /// Open a connection per configuration (with StartTLS when enabled).
    pub(crate) async fn connect(&self) -> Result<Ldap> {
        let settings = LdapConnSettings::new()
            .set_conn_timeout(self.config.conn_timeout)
            .set_starttls(self.config.starttls);
        let (conn, ldap) = LdapConnAsync::with_settings(settings, &self.config.url).await?;
        ldap3::drive!(conn);
        Ok(ldap)
    }

    /// Open a connection bound as the administrative DN, or anonymous
    /// when none is configured.
    pub(crate) async fn admin_bind(&self) -> Result<Ldap> {
        let mut ldap = self.connect().await?;
        if let Some(admin_dn) = &self.config.admin_dn {
            let password = self.config.resolve_admin_password().unwrap_or_default();
            ldap.simple_bind(admin_dn, &password).await?.success()?;
        }
        Ok(ldap)
    }

    async fn bind_as_user(&self, dn: &str, password: &str) -> Result<()> {
        let mut ldap = self.connect().await?;
        let bound = ldap.simple_bind(dn, password).await?.success();
        let _ = ldap.unbind().await;
        match bound {
            Ok(_) => Ok(()),
            Err(e) => {
                debug!(dn = %dn, error = %e, "password bind failed");
                Err(Error::Unauthorized)
            }
        }
    }

    async fn search_user(
        &self,
        ldap: &mut Ldap,
        login_name: &str,
    ) -> Result<Option<DirectoryUser>> {
        let filter = self.user_filter(login_name);
        let (entries, _) = ldap
            .search(&self.config.base_dn, Scope::Subtree, &filter, vec!["*"])
            .await?
            .success()?;

        let Some(entry) = entries.into_iter().next() else {
            return Ok(None);
        };
        let entry = SearchEntry::construct(entry);
        Ok(Some(self.user_from_entry(entry, login_name)))
    }

    fn user_filter(&self, login_name: &str) -> String {
        let extra = self.config.extra_user_filter.as_deref().unwrap_or("");
        format!(
            "(&(objectClass={})({}={}){})",
            self.config.user_object_class,
            self.config.user_attribute,
            escape_filter_value(login_name),
            extra
        )
    }

    /// Map a raw entry to a user, applying the attribute map. Binary
    /// attributes come out base64-encoded; directory booleans (`TRUE` /
    /// `FALSE`) are normalized to lowercase.
    fn user_from_entry(&self, entry: SearchEntry, login_name: &str) -> DirectoryUser {
        let login_name = entry
            .attrs
            .get(&self.config.user_attribute)
            .and_then(|values| values.first())
            .map_or_else(|| login_name.to_string(), String::clone);

        let mut attributes = HashMap::new();
        for (dir_attr, local_name) in &self.config.attribute_map {
            if let Some(value) = entry.attrs.get(dir_attr).and_then(|v| v.first()) {
                attributes.insert(local_name.clone(), normalize_boolean(value));
            } else if let Some(bytes) = entry.bin_attrs.get(dir_attr).and_then(|v| v.first()) {
                attributes.insert(local_name.clone(), STANDARD.encode(bytes));
            }
        }

        DirectoryUser {
            dn: entry.dn,
            login_name,
            attributes,
            groups: Vec::new(),
        }
    }

    /// Resolve the groups a user belongs to, by login name.
    ///
    /// An unknown login name yields an empty list rather than an error,
    /// so membership checks and existence checks stay separate concerns.
    ///
    /// # Errors
    ///
    /// Returns a directory error for connection problems.
    pub async fn groups_for_user(&self, login_name: &str) -> Result<Vec<String>> {
        let mut admin = self.admin_bind().await?;
        let result = self.groups_for_user_inner(&mut admin, login_name).await;
        let _ = admin.unbind().await;
        result
    }

    async fn groups_for_user_inner(
        &self,
        admin: &mut Ldap,
        login_name: &str,
    ) -> Result<Vec<String>> {
        let Some(user) = self.search_user(admin, login_name).await? else {
            return Ok(Vec::new());
        };
        self.maybe_reload_groups(admin).await?;
        Ok(self.groups_for_dn(&user.dn))
    }

    /// All group names known to the directory, refreshing the cache first
    /// when it has gone stale.
    ///
    /// # Errors
    ///
    /// Returns a directory error for connection problems.
    pub async fn all_groups(&self) -> Result<HashSet<String>> {
        if self.groups_stale() {
            self.reload_groups().await?;
        }
        Ok(self.groups.iter().map(|g| g.name.clone()).collect())
    }

    /// Force a reload of the group cache, regardless of staleness.
    ///
    /// # Errors
    ///
    /// Returns a directory error for connection problems.
    pub async fn reload_groups(&self) -> Result<()> {
        self.last_group_reload.store(0, Ordering::Release);
        let mut admin = self.admin_bind().await?;
        let result = self.load_groups(&mut admin).await;
        let _ = admin.unbind().await;
        result
    }

    fn groups_stale(&self) -> bool {
        let now = Utc::now().timestamp_millis();
        let last = self.last_group_reload.load(Ordering::Acquire);
        let refresh_millis = self.config.group_refresh.as_millis() as i64;
        last == 0 || now - last >= refresh_millis
    }

    /// Reload the group cache when the snapshot has gone stale.
    async fn maybe_reload_groups(&self, ldap: &mut Ldap) -> Result<()> {
        if !self.groups_stale() {
            return Ok(());
        }
        self.load_groups(ldap).await
    }

    async fn load_groups(&self, ldap: &mut Ldap) -> Result<()> {
        let filter = format!(
            "(&(objectClass={}){})",
            self.config.group_object_class,
            self.config.extra_group_filter.as_deref().unwrap_or("")
        );
        let attrs = vec![
            self.config.group_attribute.clone(),
            self.config.group_member_attribute.clone(),
            "modifyTimestamp".to_string(),
        ];
        let (entries, _) = ldap
            .search(self.config.group_base(), Scope::Subtree, &filter, attrs)
            .await?
            .success()?;

        self.groups.clear();
        for entry in entries {
            let entry = SearchEntry::construct(entry);
            let Some(name) = entry
                .attrs
                .get(&self.config.group_attribute)
                .and_then(|v| v.first())
                .cloned()
            else {
                warn!(dn = %entry.dn, "group entry has no name attribute, skipping");
                continue;
            };
            let members = entry
                .attrs
                .get(&self.config.group_member_attribute)
                .map(|values| values.iter().map(|m| m.to_lowercase()).collect())
                .unwrap_or_default();
            let modified_at = entry
                .attrs
                .get("modifyTimestamp")
                .and_then(|v| v.first())
                .and_then(|ts| parse_generalized_time(ts));

            let group = DirectoryGroup {
                dn: entry.dn.clone(),
                name,
                members,
                modified_at,
            };
            self.groups.insert(entry.dn.to_lowercase(), group);
        }

        self.last_group_reload
            .store(Utc::now().timestamp_millis(), Ordering::Release);
        info!(groups = self.groups.len(), "reloaded directory group cache");
        Ok(())
    }

    /// Group names for a member DN, following nested groups when enabled.
    /// A visited set makes membership cycles in the directory terminate.
    fn groups_for_dn(&self, dn: &str) -> Vec<String> {
        let needle = dn.to_lowercase();
        let mut stack: Vec<String> = self
            .groups
            .iter()
            .filter(|g| g.members.contains(&needle))
            .map(|g| g.dn.to_lowercase())
            .collect();

        let mut visited: HashSet<String> = HashSet::new();
        let mut names: Vec<String> = Vec::new();
        while let Some(group_dn) = stack.pop() {
            if !visited.insert(group_dn.clone()) {
                continue;
            }
            if let Some(group) = self.groups.get(&group_dn) {
                names.push(group.name.clone());
            }
            if self.config.nested_groups {
                for parent in self.groups.iter().filter(|g| g.members.contains(&group_dn)) {
                    stack.push(parent.dn.to_lowercase());
                }
            }
        }
        names.sort();
        names
    }

    /// True when any cached group changed strictly after `since`.
    /// Entries without a `modifyTimestamp` count as changed.
    #[must_use]
    pub fn groups_modified_since(&self, since: DateTime<Utc>) -> bool {
        self.groups
            .iter()
            .any(|g| g.modified_at.is_none_or(|ts| ts > since))
    }
}

fn normalize_boolean(value: &str) -> String {
    if value.eq_ignore_ascii_case("TRUE") {
        "true".to_string()
    } else if value.eq_ignore_ascii_case("FALSE") {
        "false".to_string()
    } else {
        value.to_string()
    }
}

/// Parse an LDAP generalized-time value (`YYYYMMDDHHMMSS` plus optional
/// fraction and zone, e.g. `20240311120000Z`).
fn parse_generalized_time(value: &str) -> Option<DateTime<Utc>> {
    if value.len() < 14 {
        return None;
    }
    NaiveDateTime::parse_from_str(&value[..14], "%Y%m%d%H%M%S")
        .ok()
        .map(|naive| naive.and_utc())
}

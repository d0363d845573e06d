//! Directory write path
//!
//! Password changes, attribute updates, and self-registration. Everything
//! here is gated on configuration: most deployments treat the directory
//! as read-only and leave both switches off.

use std::collections::{HashMap, HashSet};

use ldap3::Mod;
use tracing::info;

use super::{DirectoryAuthenticator, escape_dn_value};
use crate::password::{self, CredentialScheme};
use crate::{Error, Result};

impl DirectoryAuthenticator {
    /// Store a new password for an existing user, encoded with the
    /// configured scheme.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WriteDisabled`] when writes are off,
    /// [`Error::Unauthorized`] when the user does not exist, or a
    /// directory error for the write itself.
    pub async fn set_password(&self, login_name: &str, new_password: &str) -> Result<()> {
        self.ensure_writable()?;
        let user = self
            .find_user(login_name)
            .await?
            .ok_or(Error::Unauthorized)?;

        let encoded = password::encode(new_password, self.password_scheme());
        let mods = vec![Mod::Replace(
            "userPassword".to_string(),
            HashSet::from([encoded]),
        )];

        let mut admin = self.admin_bind().await?;
        let result = admin.modify(&user.dn, mods).await.and_then(|r| r.success());
        let _ = admin.unbind().await;
        result?;
        info!(login_name = %login_name, "password updated in directory");
        Ok(())
    }

    /// Replace attribute values on an existing user entry. Attribute
    /// names are directory-side names, not mapped local names.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WriteDisabled`] when writes are off,
    /// [`Error::Unauthorized`] when the user does not exist, or a
    /// directory error for the write itself.
    pub async fn update_attributes(
        &self,
        login_name: &str,
        attributes: HashMap<String, String>,
    ) -> Result<()> {
        self.ensure_writable()?;
        if attributes.is_empty() {
            return Ok(());
        }
        let user = self
            .find_user(login_name)
            .await?
            .ok_or(Error::Unauthorized)?;

        let mods: Vec<Mod<String>> = attributes
            .into_iter()
            .map(|(name, value)| Mod::Replace(name, HashSet::from([value])))
            .collect();

        let mut admin = self.admin_bind().await?;
        let result = admin.modify(&user.dn, mods).await.and_then(|r| r.success());
        let _ = admin.unbind().await;
        result?;
        Ok(())
    }

    /// Create a new user entry under the search base.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WriteDisabled`] or [`Error::RegistrationDisabled`]
    /// per configuration, [`Error::AlreadyExists`] when the login name is
    /// taken, or a directory error for the write itself.
    pub async fn register_user(
        &self,
        login_name: &str,
        password: &str,
        attributes: HashMap<String, String>,
    ) -> Result<DirectoryRegistration> {
        self.ensure_writable()?;
        if !self.config.allow_registration {
            return Err(Error::RegistrationDisabled);
        }
        if self.find_user(login_name).await?.is_some() {
            return Err(Error::AlreadyExists(login_name.to_string()));
        }

        let dn = format!(
            "{}={},{}",
            self.config.user_attribute,
            escape_dn_value(login_name),
            self.config.base_dn
        );
        let encoded = password::encode(password, self.password_scheme());

        let mut attrs: Vec<(String, HashSet<String>)> = vec![
            (
                "objectClass".to_string(),
                HashSet::from([self.config.user_object_class.clone()]),
            ),
            (
                self.config.user_attribute.clone(),
                HashSet::from([login_name.to_string()]),
            ),
            ("userPassword".to_string(), HashSet::from([encoded])),
        ];
        for (name, value) in attributes {
            attrs.push((name, HashSet::from([value])));
        }
        if let (Some(attr), Some(domain)) = (
            &self.config.registration_domain_attribute,
            &self.config.registration_domain,
        ) {
            attrs.push((attr.clone(), HashSet::from([domain.clone()])));
        }

        let mut admin = self.admin_bind().await?;
        let result = admin.add(&dn, attrs).await.and_then(|r| r.success());
        let _ = admin.unbind().await;
        result?;

        info!(login_name = %login_name, dn = %dn, "registered directory user");
        Ok(DirectoryRegistration {
            dn,
            login_name: login_name.to_string(),
        })
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.config.writable {
            Ok(())
        } else {
            Err(Error::WriteDisabled)
        }
    }

    fn password_scheme(&self) -> CredentialScheme {
        CredentialScheme::from_name(&self.config.password_scheme)
            .unwrap_or(CredentialScheme::Ssha)
    }
}

/// Outcome of a successful registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRegistration {
    /// Distinguished name of the created entry
    pub dn: String,
    /// Login name of the created entry
    pub login_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DirectoryConfig;

    fn authenticator(writable: bool, allow_registration: bool) -> DirectoryAuthenticator {
        DirectoryAuthenticator::new(DirectoryConfig {
            base_dn: "dc=example,dc=com".to_string(),
            writable,
            allow_registration,
            ..DirectoryConfig::default()
        })
    }

    #[tokio::test]
    async fn writes_rejected_when_read_only() {
        let auth = authenticator(false, false);
        assert!(matches!(
            auth.set_password("alice", "pw").await,
            Err(Error::WriteDisabled)
        ));
        assert!(matches!(
            auth.update_attributes("alice", HashMap::from([("cn".to_string(), "A".to_string())]))
                .await,
            Err(Error::WriteDisabled)
        ));
        assert!(matches!(
            auth.register_user("alice", "pw", HashMap::new()).await,
            Err(Error::WriteDisabled)
        ));
    }

    #[tokio::test]
    async fn registration_needs_its_own_switch() {
        // Writable but registration off; the gate fires before any
        // connection is attempted.
        let auth = authenticator(true, false);
        assert!(matches!(
            auth.register_user("alice", "pw", HashMap::new()).await,
            Err(Error::RegistrationDisabled)
        ));
    }

    #[test]
    fn configured_scheme_falls_back_to_salted_sha() {
        let auth = DirectoryAuthenticator::new(DirectoryConfig {
            password_scheme: "no-such-scheme".to_string(),
            ..DirectoryConfig::default()
        });
        assert_eq!(auth.password_scheme(), CredentialScheme::Ssha);

        let auth = DirectoryAuthenticator::new(DirectoryConfig {
            password_scheme: "sha256".to_string(),
            ..DirectoryConfig::default()
        });
        assert_eq!(auth.password_scheme(), CredentialScheme::Sha256);
    }
}

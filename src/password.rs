//! Multi-scheme password hashing and verification
//!
//! Detects and verifies every stored-credential format that has accumulated
//! in migrated user databases: bracket-prefixed directory formats
//! (`{CLEARTEXT}`, `{SHA}`, `{SSHA}`, `{MD5}`, `{SMD5}`), an unprefixed
//! legacy truncated SHA-1 format, and unprefixed hex SHA-256. Three further
//! sentinel prefixes mark accounts whose credential is managed elsewhere and
//! can never be verified locally.
//!
//! Digest comparison is constant-time after a length check; unequal lengths
//! short-circuit, leaking nothing beyond length equality itself. Any
//! decoding or algorithm error makes verification fail, never panic.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use md5::Md5;
use rand::RngExt;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::debug;

/// Fixed secret prefixed to the password in the legacy truncated-SHA-1 scheme.
const LEGACY_SECRET: [u8; 16] = [
    0x85, 0x94, 0xdd, 0xf6, 0x7b, 0xf0, 0xcc, 0x49, 0xc8, 0x56, 0xd8, 0x16, 0xec, 0xb0, 0x66,
    0x32,
];

/// Stored-credential formats, detected from the stored value itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialScheme {
    /// `{CLEARTEXT}` prefix, password stored verbatim
    Cleartext,
    /// `{SHA}` prefix, base64 SHA-1 digest, unsalted
    Sha,
    /// `{SSHA}` prefix, base64 SHA-1 digest with trailing salt
    Ssha,
    /// `{MD5}` prefix, base64 MD5 digest, unsalted
    Md5,
    /// `{SMD5}` prefix, base64 MD5 digest with trailing salt
    Smd5,
    /// Unprefixed 16-char hex: secret-prefixed SHA-1 truncated to 8 bytes
    LegacySha1,
    /// Unprefixed 64-char hex SHA-256
    Sha256,
    /// `{LDAPUSER}` sentinel: credential lives in the directory backend
    DirectoryManaged,
    /// `{REMOTEUSER}` sentinel: credential lives in a remote user service
    RemoteManaged,
    /// `{COGNITOUSER}` sentinel: credential lives in the external provider
    ExternalManaged,
    /// Unrecognized format; always fails verification
    Unknown,
}

impl CredentialScheme {
    /// The stored-format prefix for this scheme, if it has one.
    #[must_use]
    pub fn prefix(self) -> Option<&'static str> {
        match self {
            Self::Cleartext => Some("{CLEARTEXT}"),
            Self::Sha => Some("{SHA}"),
            Self::Ssha => Some("{SSHA}"),
            Self::Md5 => Some("{MD5}"),
            Self::Smd5 => Some("{SMD5}"),
            Self::DirectoryManaged => Some("{LDAPUSER}"),
            Self::RemoteManaged => Some("{REMOTEUSER}"),
            Self::ExternalManaged => Some("{COGNITOUSER}"),
            Self::LegacySha1 | Self::Sha256 | Self::Unknown => None,
        }
    }

    /// Parse a scheme name as it appears in configuration (case-insensitive).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "CLEARTEXT" => Some(Self::Cleartext),
            "SHA" => Some(Self::Sha),
            "SSHA" => Some(Self::Ssha),
            "MD5" => Some(Self::Md5),
            "SMD5" => Some(Self::Smd5),
            "OLDSHA" => Some(Self::LegacySha1),
            "SHA256" => Some(Self::Sha256),
            _ => None,
        }
    }

    /// Whether the credential can be verified against the stored value at
    /// all. False for the managed sentinels and unknown formats.
    #[must_use]
    pub fn locally_verifiable(self) -> bool {
        !matches!(
            self,
            Self::DirectoryManaged | Self::RemoteManaged | Self::ExternalManaged | Self::Unknown
        )
    }
}

/// Detect the scheme of a stored credential value.
///
/// Bracketed prefixes are matched literally; unprefixed values are
/// classified by length and hex pattern (16 hex chars ⇒ legacy truncated
/// SHA-1, 64 ⇒ SHA-256). Anything else is [`CredentialScheme::Unknown`].
#[must_use]
pub fn detect_scheme(stored: &str) -> CredentialScheme {
    if stored.is_empty() {
        return CredentialScheme::Unknown;
    }

    for scheme in [
        CredentialScheme::Sha,
        CredentialScheme::Ssha,
        CredentialScheme::Md5,
        CredentialScheme::Smd5,
        CredentialScheme::Cleartext,
        CredentialScheme::DirectoryManaged,
        CredentialScheme::RemoteManaged,
        CredentialScheme::ExternalManaged,
    ] {
        if let Some(prefix) = scheme.prefix() {
            if stored.starts_with(prefix) {
                return scheme;
            }
        }
    }

    let is_lower_hex = stored.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase());
    if is_lower_hex {
        match stored.len() {
            16 => return CredentialScheme::LegacySha1,
            64 => return CredentialScheme::Sha256,
            _ => {}
        }
    }

    CredentialScheme::Unknown
}

/// Verify a password against a stored credential, auto-detecting the scheme.
///
/// Managed-sentinel and unknown formats always return false; such accounts
/// authenticate through another verifier.
#[must_use]
pub fn verify(password: &str, stored: &str) -> bool {
    match detect_scheme(stored) {
        CredentialScheme::Cleartext => {
            constant_time_eq(password.as_bytes(), stored["{CLEARTEXT}".len()..].as_bytes())
        }
        CredentialScheme::Sha => verify_unsalted::<Sha1>(password, &stored["{SHA}".len()..]),
        CredentialScheme::Ssha => verify_salted::<Sha1>(password, &stored["{SSHA}".len()..]),
        CredentialScheme::Md5 => verify_unsalted::<Md5>(password, &stored["{MD5}".len()..]),
        CredentialScheme::Smd5 => verify_salted::<Md5>(password, &stored["{SMD5}".len()..]),
        CredentialScheme::LegacySha1 => {
            constant_time_eq(hash_legacy(password).as_bytes(), stored.as_bytes())
        }
        CredentialScheme::Sha256 => {
            constant_time_eq(hash_sha256(password).as_bytes(), stored.as_bytes())
        }
        CredentialScheme::DirectoryManaged
        | CredentialScheme::RemoteManaged
        | CredentialScheme::ExternalManaged
        | CredentialScheme::Unknown => false,
    }
}

/// Hash a password in the legacy format: SHA-1 over `secret || password`,
/// first 8 digest bytes, lowercase hex.
///
/// Kept only to produce values compatible with historical records; new
/// passwords should use a salted scheme.
#[must_use]
pub fn hash_legacy(password: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(LEGACY_SECRET);
    hasher.update(password.as_bytes());
    hex::encode(&hasher.finalize()[..8])
}

/// Hash a password as lowercase hex SHA-256.
#[must_use]
pub fn hash_sha256(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Encode a password into the stored format for the given scheme.
///
/// Salted schemes use a fresh 8-byte random salt. Managed-sentinel and
/// unknown schemes fall back to `{CLEARTEXT}` like the historical encoder.
#[must_use]
pub fn encode(password: &str, scheme: CredentialScheme) -> String {
    match scheme {
        CredentialScheme::Sha => {
            format!("{{SHA}}{}", STANDARD.encode(Sha1::digest(password.as_bytes())))
        }
        CredentialScheme::Ssha => format!("{{SSHA}}{}", encode_salted::<Sha1>(password)),
        CredentialScheme::Md5 => {
            format!("{{MD5}}{}", STANDARD.encode(Md5::digest(password.as_bytes())))
        }
        CredentialScheme::Smd5 => format!("{{SMD5}}{}", encode_salted::<Md5>(password)),
        CredentialScheme::LegacySha1 => hash_legacy(password),
        CredentialScheme::Sha256 => hash_sha256(password),
        _ => format!("{{CLEARTEXT}}{password}"),
    }
}

fn encode_salted<D: Digest>(password: &str) -> String {
    let salt: [u8; 8] = rand::rng().random();
    let mut hasher = D::new();
    hasher.update(password.as_bytes());
    hasher.update(salt);
    let digest = hasher.finalize();

    let mut combined = Vec::with_capacity(digest.len() + salt.len());
    combined.extend_from_slice(&digest);
    combined.extend_from_slice(&salt);
    STANDARD.encode(combined)
}

/// Verify against `base64(digest || salt)`: the digest portion is the
/// algorithm's native digest length, everything after it is the salt. That
/// split handles implementations that append variable-length salts.
fn verify_salted<D: Digest>(password: &str, encoded: &str) -> bool {
    let decoded = match STANDARD.decode(encoded) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(error = %e, "failed to decode stored salted hash");
            return false;
        }
    };

    let digest_len = <D as Digest>::output_size();
    if decoded.len() < digest_len {
        return false;
    }
    let (digest, salt) = decoded.split_at(digest_len);

    let mut hasher = D::new();
    hasher.update(password.as_bytes());
    hasher.update(salt);
    constant_time_eq(digest, &hasher.finalize())
}

fn verify_unsalted<D: Digest>(password: &str, encoded: &str) -> bool {
    let decoded = match STANDARD.decode(encoded) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(error = %e, "failed to decode stored hash");
            return false;
        }
    };
    constant_time_eq(&decoded, &D::digest(password.as_bytes()))
}

/// Length-first constant-time comparison. Unequal lengths short-circuit
/// without comparing bytes.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn detects_prefixed_schemes() {
        assert_eq!(detect_scheme("{SSHA}AAECAw=="), CredentialScheme::Ssha);
        assert_eq!(detect_scheme("{SHA}AAECAw=="), CredentialScheme::Sha);
        assert_eq!(detect_scheme("{SMD5}AAECAw=="), CredentialScheme::Smd5);
        assert_eq!(detect_scheme("{MD5}AAECAw=="), CredentialScheme::Md5);
        assert_eq!(detect_scheme("{CLEARTEXT}pw"), CredentialScheme::Cleartext);
        assert_eq!(detect_scheme("{LDAPUSER}"), CredentialScheme::DirectoryManaged);
        assert_eq!(detect_scheme("{REMOTEUSER}"), CredentialScheme::RemoteManaged);
        assert_eq!(detect_scheme("{COGNITOUSER}"), CredentialScheme::ExternalManaged);
    }

    #[test]
    fn detects_unprefixed_by_length() {
        assert_eq!(detect_scheme("0123456789abcdef"), CredentialScheme::LegacySha1);
        assert_eq!(
            detect_scheme(&"ab".repeat(32)),
            CredentialScheme::Sha256
        );
        // Wrong lengths or non-hex fall through to Unknown
        assert_eq!(detect_scheme("0123456789abcde"), CredentialScheme::Unknown);
        assert_eq!(detect_scheme("0123456789ABCDEF"), CredentialScheme::Unknown);
        assert_eq!(detect_scheme("not-a-hash"), CredentialScheme::Unknown);
        assert_eq!(detect_scheme(""), CredentialScheme::Unknown);
    }

    #[test]
    fn verify_round_trip_all_schemes() {
        let schemes = [
            CredentialScheme::Cleartext,
            CredentialScheme::Sha,
            CredentialScheme::Ssha,
            CredentialScheme::Md5,
            CredentialScheme::Smd5,
            CredentialScheme::LegacySha1,
            CredentialScheme::Sha256,
        ];
        for scheme in schemes {
            let stored = encode("hunter2", scheme);
            assert!(verify("hunter2", &stored), "accept for {scheme:?}: {stored}");
            assert!(!verify("hunter3", &stored), "reject for {scheme:?}: {stored}");
        }
    }

    #[test]
    fn encoded_value_detects_as_its_scheme() {
        assert_eq!(
            detect_scheme(&encode("pw", CredentialScheme::Ssha)),
            CredentialScheme::Ssha
        );
        assert_eq!(
            detect_scheme(&encode("pw", CredentialScheme::Sha256)),
            CredentialScheme::Sha256
        );
        assert_eq!(
            detect_scheme(&encode("pw", CredentialScheme::LegacySha1)),
            CredentialScheme::LegacySha1
        );
    }

    #[test]
    fn managed_sentinels_never_verify() {
        assert!(!verify("anything", "{LDAPUSER}"));
        assert!(!verify("anything", "{REMOTEUSER}"));
        assert!(!verify("anything", "{COGNITOUSER}"));
    }

    #[test]
    fn unknown_format_never_verifies() {
        assert!(!verify("pw", "definitely-not-a-hash"));
        assert!(!verify("pw", ""));
    }

    #[test]
    fn malformed_base64_fails_closed() {
        assert!(!verify("pw", "{SSHA}!!not-base64!!"));
        assert!(!verify("pw", "{SHA}!!not-base64!!"));
    }

    #[test]
    fn salted_verify_accepts_variable_salt_length() {
        // Hand-build an SSHA value with a 4-byte salt instead of our 8
        let salt = [9u8, 8, 7, 6];
        let mut hasher = Sha1::new();
        hasher.update(b"pw");
        hasher.update(salt);
        let digest = hasher.finalize();
        let mut combined = digest.to_vec();
        combined.extend_from_slice(&salt);
        let stored = format!("{{SSHA}}{}", STANDARD.encode(combined));

        assert!(verify("pw", &stored));
        assert!(!verify("wrong", &stored));
    }

    #[test]
    fn legacy_hash_is_16_hex_chars() {
        let h = hash_legacy("sysadmin");
        assert_eq!(h.len(), 16);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn scheme_names_parse_from_config() {
        assert_eq!(CredentialScheme::from_name("ssha"), Some(CredentialScheme::Ssha));
        assert_eq!(CredentialScheme::from_name("OLDSHA"), Some(CredentialScheme::LegacySha1));
        assert_eq!(CredentialScheme::from_name("bcrypt"), None);
    }

    #[test]
    fn local_verifiability() {
        assert!(CredentialScheme::Ssha.locally_verifiable());
        assert!(!CredentialScheme::ExternalManaged.locally_verifiable());
        assert!(!CredentialScheme::Unknown.locally_verifiable());
    }
}

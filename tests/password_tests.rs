//! Stored-credential compatibility tests
//!
//! Verifies against fixed values in every format a migrated user database
//! can contain, so a refactor of the hashing internals cannot silently
//! lock out existing accounts.

use identity_core::password::{CredentialScheme, detect_scheme, encode, verify};

/// Known vectors for the password "password", computed independently
#[test]
fn verifies_historical_stored_values() {
    let cases = [
        ("{CLEARTEXT}password", CredentialScheme::Cleartext),
        // base64(sha1("password"))
        ("{SHA}W6ph5Mm5Pz8GgiULbPgzG37mj9g=", CredentialScheme::Sha),
        // base64(md5("password"))
        ("{MD5}X03MO1qnZdYdgyfeuILPmQ==", CredentialScheme::Md5),
        // hex(sha256("password"))
        (
            "5e884898da28047151d0e56f8dc6292773603d0d6aabbdd62a11ef721d1542d8",
            CredentialScheme::Sha256,
        ),
    ];

    for (stored, expected_scheme) in cases {
        assert_eq!(detect_scheme(stored), expected_scheme, "scheme of {stored}");
        assert!(verify("password", stored), "accept {stored}");
        assert!(!verify("Password", stored), "reject wrong case for {stored}");
        assert!(!verify("", stored), "reject empty for {stored}");
    }
}

#[test]
fn salted_schemes_differ_per_encoding_but_both_verify() {
    for scheme in [CredentialScheme::Ssha, CredentialScheme::Smd5] {
        let first = encode("password", scheme);
        let second = encode("password", scheme);
        // Fresh salt every time
        assert_ne!(first, second, "{scheme:?} must salt");
        assert!(verify("password", &first));
        assert!(verify("password", &second));
        assert!(!verify("passw0rd", &first));
    }
}

#[test]
fn legacy_scheme_round_trips_through_detection() {
    let stored = encode("password", CredentialScheme::LegacySha1);
    assert_eq!(stored.len(), 16);
    assert_eq!(detect_scheme(&stored), CredentialScheme::LegacySha1);
    assert!(verify("password", &stored));
    assert!(!verify("password2", &stored));
}

#[test]
fn managed_accounts_never_pass_local_verification() {
    for stored in ["{LDAPUSER}", "{REMOTEUSER}", "{COGNITOUSER}"] {
        assert!(!detect_scheme(stored).locally_verifiable());
        assert!(!verify("password", stored));
        // Not even an empty password
        assert!(!verify("", stored));
    }
}

#[test]
fn truncated_and_padded_values_fail_closed() {
    // A stored value cut short during a botched migration
    assert!(!verify("password", "{SHA}W6ph5Mm5Pz8GgiULbPgz"));
    // Hex of the wrong length is not classified as a hash at all
    assert_eq!(
        detect_scheme("5e884898da28047151d0e56f8dc62927"),
        CredentialScheme::Unknown
    );
    assert!(!verify(
        "password",
        "5e884898da28047151d0e56f8dc62927"
    ));
}

//! LDAP metacharacter escaping
//!
//! Two distinct escape sets: search filters hex-escape per RFC 4515,
//! distinguished names backslash-escape per RFC 4514. Using the wrong one
//! is an injection hole, so both live here with their rules spelled out.

use std::fmt::Write;

/// Escape a value for embedding in a search filter (RFC 4515).
///
/// `*`, `(`, `)`, `\`, and NUL become `\xx` hex escapes, so user input can
/// never alter the filter structure. Non-ASCII characters are hex-escaped
/// byte by byte as RFC 4515 allows, which keeps the filter pure ASCII.
#[must_use]
pub fn escape_filter_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '*' => escaped.push_str("\\2a"),
            '(' => escaped.push_str("\\28"),
            ')' => escaped.push_str("\\29"),
            '\\' => escaped.push_str("\\5c"),
            '\0' => escaped.push_str("\\00"),
            c if c.is_ascii() => escaped.push(c),
            c => {
                let mut buf = [0u8; 4];
                for b in c.encode_utf8(&mut buf).bytes() {
                    let _ = write!(escaped, "\\{b:02x}");
                }
            }
        }
    }
    escaped
}

/// Escape an attribute value for embedding in a distinguished name
/// (RFC 4514).
///
/// Special characters are backslash-escaped; a leading space or `#` and a
/// trailing space additionally need escaping since they would otherwise
/// be trimmed by the server.
#[must_use]
pub fn escape_dn_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    let last = value.chars().count().saturating_sub(1);
    for (i, c) in value.chars().enumerate() {
        match c {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' => {
                escaped.push('\\');
                escaped.push(c);
            }
            '#' if i == 0 => escaped.push_str("\\#"),
            ' ' if i == 0 || i == last => escaped.push_str("\\ "),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn filter_escapes_metacharacters_as_hex() {
        assert_eq!(escape_filter_value("a*b(c)d\\e"), "a\\2ab\\28c\\29d\\5ce");
        assert_eq!(escape_filter_value("plain.name"), "plain.name");
        assert_eq!(escape_filter_value("nul\0byte"), "nul\\00byte");
    }

    #[test]
    fn filter_hex_escapes_non_ascii_bytes() {
        // "ö" is 0xc3 0xb6 in UTF-8; each byte gets its own escape
        assert_eq!(escape_filter_value("göran"), "g\\c3\\b6ran");
        assert_eq!(escape_filter_value("日本"), "\\e6\\97\\a5\\e6\\9c\\ac");
    }

    #[test]
    fn filter_escaping_defuses_injection() {
        // A classic filter-injection payload comes out inert
        let hostile = "*)(uid=admin";
        assert_eq!(escape_filter_value(hostile), "\\2a\\29\\28uid=admin");
    }

    #[test]
    fn dn_escapes_special_characters() {
        assert_eq!(escape_dn_value("Smith, John"), "Smith\\, John");
        assert_eq!(escape_dn_value("a+b=c"), "a\\+b\\=c");
        assert_eq!(escape_dn_value("quote\"back\\slash"), "quote\\\"back\\\\slash");
    }

    #[test]
    fn dn_escapes_leading_and_trailing_edges() {
        assert_eq!(escape_dn_value(" padded "), "\\ padded\\ ");
        assert_eq!(escape_dn_value("#hash"), "\\#hash");
        // Interior spaces and hashes stay untouched
        assert_eq!(escape_dn_value("a b#c"), "a b#c");
    }
}

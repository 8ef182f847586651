//! Cookie parsing and serialization utilities.
//!
//! Simple cookie parse and serialize utilities mostly based on the
//! node module <https://github.com/jshttp/cookie>.

use crate::tools::encoding::{decode_uri_component, encode_uri_component};
use std::collections::HashMap;

/// Options for parsing cookies.
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    /// Custom decode function. If not provided, URI decoding is used.
    pub decode: Option<fn(&str) -> String>,
}

/// Options for serializing cookies.
///
/// Unset attributes are omitted from the output, which also lets callers
/// layer their own options over a set of defaults with [`SerializeOptions::merged_over`].
#[derive(Debug, Clone, Default)]
pub struct SerializeOptions {
    /// Custom encode function. If not provided, URI encoding is used.
    pub encode: Option<fn(&str) -> String>,
    /// Max-Age in seconds.
    pub max_age: Option<i64>,
    pub domain: Option<String>,
    pub path: Option<String>,
    pub expires: Option<chrono::DateTime<chrono::Utc>>,
    pub http_only: Option<bool>,
    pub secure: Option<bool>,
    pub priority: Option<CookiePriority>,
    pub same_site: Option<SameSite>,
}

impl SerializeOptions {
    /// Returns `self` with every unset attribute taken from `defaults`.
    pub fn merged_over(self, defaults: SerializeOptions) -> SerializeOptions {
        SerializeOptions {
            encode: self.encode.or(defaults.encode),
            max_age: self.max_age.or(defaults.max_age),
            domain: self.domain.or(defaults.domain),
            path: self.path.or(defaults.path),
            expires: self.expires.or(defaults.expires),
            http_only: self.http_only.or(defaults.http_only),
            secure: self.secure.or(defaults.secure),
            priority: self.priority.or(defaults.priority),
            same_site: self.same_site.or(defaults.same_site),
        }
    }
}

/// Cookie priority levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookiePriority {
    Low,
    Medium,
    High,
}

/// SameSite attribute values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

/// Cookie serialization errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CookieError {
    #[error("invalid cookie name: {0}")]
    InvalidName(String),
    #[error("invalid cookie value: {0}")]
    InvalidValue(String),
    #[error("invalid domain: {0}")]
    InvalidDomain(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
}

/// Parses the given cookie header string into a HashMap.
///
/// The HashMap has the various cookies as keys (names) => values.
/// Only the first occurrence of a name is kept.
///
/// ```
/// use coddyspace_sdk::tools::cookie::cookie_parse;
///
/// let cookies = cookie_parse("foo=bar; baz=qux", None);
/// assert_eq!(cookies.get("foo"), Some(&"bar".to_string()));
/// assert_eq!(cookies.get("baz"), Some(&"qux".to_string()));
/// ```
pub fn cookie_parse(input: &str, options: Option<ParseOptions>) -> HashMap<String, String> {
    let mut result: HashMap<String, String> = HashMap::new();
    let decode = options
        .and_then(|o| o.decode)
        .unwrap_or(decode_uri_component as fn(&str) -> String);

    for pair in input.split(';') {
        let Some((key, val)) = pair.split_once('=') else {
            continue;
        };

        let key = key.trim();
        if key.is_empty() || result.contains_key(key) {
            continue;
        }

        let mut val = val.trim();
        if val.len() >= 2 && val.starts_with('"') && val.ends_with('"') {
            val = &val[1..val.len() - 1];
        }

        result.insert(key.to_string(), decode(val));
    }

    result
}

/// Serializes a name-value pair into a cookie string suitable for HTTP headers.
///
/// ```
/// use coddyspace_sdk::tools::cookie::{cookie_serialize, SerializeOptions};
///
/// let cookie = cookie_serialize("foo", "bar", None).unwrap();
/// assert_eq!(cookie, "foo=bar");
///
/// let opts = SerializeOptions {
///     http_only: Some(true),
///     secure: Some(true),
///     ..Default::default()
/// };
/// let cookie = cookie_serialize("foo", "bar", Some(opts)).unwrap();
/// assert_eq!(cookie, "foo=bar; HttpOnly; Secure");
/// ```
pub fn cookie_serialize(
    name: &str,
    val: &str,
    options: Option<SerializeOptions>,
) -> Result<String, CookieError> {
    let opts = options.unwrap_or_default();
    let encode = opts
        .encode
        .unwrap_or(encode_uri_component as fn(&str) -> String);

    if !is_valid_field_content(name) {
        return Err(CookieError::InvalidName(name.to_string()));
    }

    let value = encode(val);
    if !is_valid_field_content(&value) {
        return Err(CookieError::InvalidValue(val.to_string()));
    }

    let mut result = format!("{}={}", name, value);

    if let Some(max_age) = opts.max_age {
        result.push_str(&format!("; Max-Age={}", max_age));
    }

    if let Some(ref domain) = opts.domain {
        if !is_valid_field_content(domain) {
            return Err(CookieError::InvalidDomain(domain.clone()));
        }
        result.push_str(&format!("; Domain={}", domain));
    }

    if let Some(ref path) = opts.path {
        if !is_valid_field_content(path) {
            return Err(CookieError::InvalidPath(path.clone()));
        }
        result.push_str(&format!("; Path={}", path));
    }

    if let Some(expires) = opts.expires {
        result.push_str(&format!(
            "; Expires={}",
            expires.format("%a, %d %b %Y %H:%M:%S GMT")
        ));
    }

    if opts.http_only == Some(true) {
        result.push_str("; HttpOnly");
    }

    if opts.secure == Some(true) {
        result.push_str("; Secure");
    }

    match opts.priority {
        Some(CookiePriority::Low) => result.push_str("; Priority=Low"),
        Some(CookiePriority::Medium) => result.push_str("; Priority=Medium"),
        Some(CookiePriority::High) => result.push_str("; Priority=High"),
        None => {}
    }

    match opts.same_site {
        Some(SameSite::Strict) => result.push_str("; SameSite=Strict"),
        Some(SameSite::Lax) => result.push_str("; SameSite=Lax"),
        Some(SameSite::None) => result.push_str("; SameSite=None"),
        None => {}
    }

    Ok(result)
}

/// Checks if a string is valid field content per RFC 7230 sec 3.2.
///
/// field-content = field-vchar [ 1*( SP / HTAB ) field-vchar ]
/// field-vchar   = VCHAR / obs-text
/// obs-text      = %x80-FF
fn is_valid_field_content(s: &str) -> bool {
    s.chars().all(|c| {
        let code = c as u32;
        code == 0x09 || (0x20..=0x7E).contains(&code) || (0x80..=0xFF).contains(&code)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_cookie_parse() {
        let cookies = cookie_parse("foo=bar; baz=qux", None);
        assert_eq!(cookies.get("foo"), Some(&"bar".to_string()));
        assert_eq!(cookies.get("baz"), Some(&"qux".to_string()));
        assert!(cookie_parse("", None).is_empty());
    }

    #[test]
    fn test_cookie_parse_first_occurrence_wins() {
        let cookies = cookie_parse("a=1; junk; a=2; b=\"quoted value\"", None);
        assert_eq!(cookies.get("a"), Some(&"1".to_string()));
        assert_eq!(cookies.get("b"), Some(&"quoted value".to_string()));
    }

    #[test]
    fn test_cookie_parse_decodes_utf8() {
        let cookies = cookie_parse("name=caf%C3%A9%20bar", None);
        assert_eq!(cookies.get("name"), Some(&"café bar".to_string()));
    }

    #[test]
    fn test_cookie_serialize_attributes() {
        let opts = SerializeOptions {
            max_age: Some(3600),
            path: Some("/".to_string()),
            expires: Some(chrono::Utc.timestamp_opt(0, 0).unwrap()),
            http_only: Some(true),
            secure: Some(false),
            priority: Some(CookiePriority::High),
            same_site: Some(SameSite::Strict),
            ..Default::default()
        };
        let cookie = cookie_serialize("foo", "a b", Some(opts)).unwrap();
        assert_eq!(
            cookie,
            "foo=a%20b; Max-Age=3600; Path=/; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly; Priority=High; SameSite=Strict"
        );
    }

    #[test]
    fn test_cookie_serialize_invalid_name() {
        assert!(matches!(
            cookie_serialize("fo\no", "bar", None),
            Err(CookieError::InvalidName(_))
        ));
    }

    #[test]
    fn test_merged_over_keeps_explicit_values() {
        let defaults = SerializeOptions {
            secure: Some(true),
            http_only: Some(true),
            path: Some("/".to_string()),
            ..Default::default()
        };
        let merged = SerializeOptions {
            secure: Some(false),
            ..Default::default()
        }
        .merged_over(defaults);

        assert_eq!(merged.secure, Some(false));
        assert_eq!(merged.http_only, Some(true));
        assert_eq!(merged.path.as_deref(), Some("/"));
    }
}

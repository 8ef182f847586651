//! JWT token utilities

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde_json::{Map, Value};

/// Decoded JWT claims.
///
/// The raw claim map is kept as is; the accessors only pick the claims of
/// the expected JSON type, so an unexpected claim type never hides the others.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenPayload {
    claims: Map<String, Value>,
}

impl TokenPayload {
    /// Returns true when no claim was decoded at all.
    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    /// Token type (`admin` or `authRecord`).
    pub fn token_type(&self) -> Option<&str> {
        self.claims.get("type").and_then(Value::as_str)
    }

    /// Expiration timestamp in seconds.
    pub fn exp(&self) -> Option<f64> {
        self.claims.get("exp").and_then(Value::as_f64)
    }

    /// Collection ID (record tokens only).
    pub fn collection_id(&self) -> Option<&str> {
        self.claims.get("collectionId").and_then(Value::as_str)
    }

    /// Record or admin ID.
    pub fn id(&self) -> Option<&str> {
        self.claims.get("id").and_then(Value::as_str)
    }

    pub fn get(&self, claim: &str) -> Option<&Value> {
        self.claims.get(claim)
    }

    pub fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }
}

/// Returns JWT token's payload data.
///
/// Any decoding failure yields an empty payload.
pub fn get_token_payload(token: &str) -> TokenPayload {
    let mut parts = token.split('.');
    let payload_part = match (parts.next(), parts.next()) {
        (Some(_), Some(payload)) if !payload.is_empty() => payload,
        _ => return TokenPayload::default(),
    };

    // Accept both alphabets, with or without padding.
    let normalized: String = payload_part
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();

    let decoded = match URL_SAFE_NO_PAD.decode(normalized.as_bytes()) {
        Ok(d) => d,
        Err(_) => return TokenPayload::default(),
    };

    match serde_json::from_slice::<Value>(&decoded) {
        Ok(Value::Object(claims)) => TokenPayload { claims },
        _ => TokenPayload::default(),
    }
}

/// Checks whether a JWT token is expired or not.
///
/// Tokens without `exp` payload key are considered valid.
/// Tokens with empty payload (eg. invalid token strings) are considered expired.
pub fn is_token_expired(token: &str, expiration_threshold: i64) -> bool {
    let payload = get_token_payload(token);

    if payload.is_empty() {
        return true;
    }

    match payload.exp() {
        None => false,
        Some(exp) => exp - (expiration_threshold as f64) <= chrono::Utc::now().timestamp() as f64,
    }
}

/// Returns the `exp` claim as a UTC datetime, if present.
pub(crate) fn token_expiry(token: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    use chrono::TimeZone;

    let exp = get_token_payload(token).exp()?;
    chrono::Utc.timestamp_millis_opt((exp * 1000.0) as i64).single()
}

#[cfg(test)]
pub(crate) fn make_token(payload: serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string().as_bytes());
    format!("{}.{}.signature", header, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_token_payload_empty() {
        assert!(get_token_payload("").is_empty());
        assert!(get_token_payload("invalid").is_empty());
        assert!(get_token_payload("a.!!!.c").is_empty());
    }

    #[test]
    fn test_get_token_payload_claims() {
        let token = make_token(json!({"id": "123", "type": "admin", "exp": 1700000000}));
        let payload = get_token_payload(&token);

        assert_eq!(payload.id(), Some("123"));
        assert_eq!(payload.token_type(), Some("admin"));
        assert_eq!(payload.exp(), Some(1700000000.0));

        let payload = get_token_payload(&make_token(json!({"id": 42, "collectionId": "c1"})));
        assert!(!payload.is_empty());
        assert_eq!(payload.id(), None);
        assert_eq!(payload.get("id"), Some(&json!(42)));
        assert_eq!(payload.collection_id(), Some("c1"));
    }

    #[test]
    fn test_non_object_payload_is_empty() {
        let token = make_token(json!([1, 2, 3]));
        assert!(get_token_payload(&token).is_empty());
    }

    #[test]
    fn test_is_token_expired() {
        let now = chrono::Utc::now().timestamp();

        assert!(is_token_expired("", 0));
        assert!(is_token_expired("invalid.token", 0));
        assert!(is_token_expired(&make_token(json!({"exp": now - 10})), 0));
        assert!(!is_token_expired(&make_token(json!({"exp": now + 100})), 0));
        assert!(!is_token_expired(&make_token(json!({"id": "abc"})), 0));

        // claims of an unexpected type don't invalidate the token
        assert!(!is_token_expired(&make_token(json!({"id": 42, "exp": now + 3600})), 0));
        assert!(!is_token_expired(&make_token(json!({"type": 1, "exp": now + 3600})), 0));

        // the threshold shortens the remaining lifetime
        assert!(is_token_expired(&make_token(json!({"exp": now + 100})), 200));
    }
}

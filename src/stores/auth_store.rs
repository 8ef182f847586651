//! Auth store contract shared by every store implementation.

use crate::tools::cookie::{cookie_parse, cookie_serialize, CookieError, SameSite, SerializeOptions};
use crate::tools::dtos::AuthModel;
use crate::tools::jwt::{get_token_payload, is_token_expired, token_expiry};
use chrono::{TimeZone, Utc};
use serde_json::{json, Map, Value};

/// Default cookie name used by the cookie helpers.
pub const DEFAULT_COOKIE_KEY: &str = "pb_auth";

/// Cookies larger than this get their model trimmed.
const MAX_COOKIE_SIZE: usize = 4096;

/// Model fields kept in a trimmed cookie besides `id` and `email`.
const TRIMMED_EXTRA_FIELDS: [&str; 3] = ["collectionId", "username", "verified"];

/// Callback function type for auth store changes.
pub type OnStoreChangeFunc = Box<dyn Fn(&str, Option<&AuthModel>) + Send + Sync>;

/// Removes a previously registered change callback.
pub type RemoveListenerFunc = Box<dyn FnOnce() + Send>;

/// Holds the current token/model pair and notifies observers about changes.
pub trait AuthStore: Send + Sync {
    /// Retrieves the stored token (if any).
    fn token(&self) -> String;

    /// Retrieves the stored model (if any).
    fn model(&self) -> Option<AuthModel>;

    /// Replaces the stored state and notifies every observer,
    /// even if the values didn't change.
    fn save(&self, token: &str, model: Option<AuthModel>);

    /// Removes the stored token and model.
    fn clear(&self) {
        self.save("", None);
    }

    /// Registers a callback invoked on every store change.
    ///
    /// With `fire_immediately` the callback is also invoked once with the current state.
    /// Returns a function removing exactly this registration.
    fn on_change(&self, callback: OnStoreChangeFunc, fire_immediately: bool) -> RemoveListenerFunc;

    /// Loosely checks if the store has a valid token (existing and unexpired exp claim).
    fn is_valid(&self) -> bool {
        !is_token_expired(&self.token(), 0)
    }

    /// Checks whether the current store state is for admin authentication.
    fn is_admin(&self) -> bool {
        get_token_payload(&self.token()).token_type() == Some("admin")
    }

    /// Checks whether the current store state is for auth record authentication.
    fn is_auth_record(&self) -> bool {
        get_token_payload(&self.token()).token_type() == Some("authRecord")
    }

    /// Parses the cookie string and saves its token and model data.
    ///
    /// The loaded token is not validated. Callers relying on `is_valid` for
    /// permission checks should refresh the auth state afterwards.
    fn load_from_cookie(&self, cookie: &str, key: Option<&str>) {
        let key = key.unwrap_or(DEFAULT_COOKIE_KEY);
        let raw = cookie_parse(cookie, None).remove(key).unwrap_or_default();

        let data = match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };

        let token = data
            .get("token")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let model = data
            .get("model")
            .filter(|m| m.is_object())
            .and_then(|m| serde_json::from_value::<AuthModel>(m.clone()).ok());

        self.save(&token, model);
    }

    /// Exports the current store state as a cookie string.
    ///
    /// By default `Secure`, `HttpOnly`, `SameSite=Strict`, `Path=/` and
    /// `Expires` (the token expiration date) are set. When the result exceeds
    /// 4096 bytes the model is reduced to its identifying fields.
    fn export_to_cookie(
        &self,
        options: Option<SerializeOptions>,
        key: Option<&str>,
    ) -> Result<String, CookieError> {
        let key = key.unwrap_or(DEFAULT_COOKIE_KEY);
        let token = self.token();

        let defaults = SerializeOptions {
            secure: Some(true),
            http_only: Some(true),
            same_site: Some(SameSite::Strict),
            path: Some("/".to_string()),
            expires: token_expiry(&token).or_else(|| Utc.timestamp_opt(0, 0).single()),
            ..Default::default()
        };
        let options = options.unwrap_or_default().merged_over(defaults);

        let model = self
            .model()
            .and_then(|m| serde_json::to_value(m).ok())
            .unwrap_or(Value::Null);

        let result = cookie_serialize(
            key,
            &json!({"token": token, "model": model}).to_string(),
            Some(options.clone()),
        )?;

        if model.is_null() || result.len() <= MAX_COOKIE_SIZE {
            return Ok(result);
        }

        cookie_serialize(
            key,
            &json!({"token": token, "model": trimmed_model(&model)}).to_string(),
            Some(options),
        )
    }
}

fn trimmed_model(model: &Value) -> Value {
    let mut trimmed = Map::new();

    for field in ["id", "email"].into_iter().chain(TRIMMED_EXTRA_FIELDS) {
        if let Some(value) = model.get(field).filter(|v| !v.is_null()) {
            trimmed.insert(field.to_string(), value.clone());
        }
    }

    Value::Object(trimmed)
}

//! Send options and query parameters

use crate::tools::encoding::encode_uri_component;
use crate::tools::formdata::{fields_to_json, has_file_value, FormValue};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Identifies a request for auto-cancellation purposes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RequestKey {
    /// Derive the key from the HTTP method and path.
    #[default]
    Auto,
    /// Use an explicit key.
    Key(String),
    /// Opt this request out of auto-cancellation.
    Disabled,
}

impl RequestKey {
    /// Returns the effective key for a request, if any.
    pub fn resolve(&self, method: &str, path: &str) -> Option<String> {
        match self {
            RequestKey::Auto => Some(format!("{}{}", method, path)),
            // an empty key falls back to the derived one
            RequestKey::Key(key) if key.is_empty() => Some(format!("{}{}", method, path)),
            RequestKey::Key(key) => Some(key.clone()),
            RequestKey::Disabled => None,
        }
    }
}

impl From<&str> for RequestKey {
    fn from(value: &str) -> Self {
        RequestKey::Key(value.to_string())
    }
}

impl From<String> for RequestKey {
    fn from(value: String) -> Self {
        RequestKey::Key(value)
    }
}

impl From<Option<String>> for RequestKey {
    fn from(value: Option<String>) -> Self {
        value.map(RequestKey::Key).unwrap_or(RequestKey::Disabled)
    }
}

fn deserialize_request_key<'de, D>(deserializer: D) -> Result<RequestKey, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.into())
}

/// The body of a request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// A JSON document, sent as-is.
    Json(Value),
    /// Key/value fields. Converted to a multipart form when any field is a file,
    /// otherwise sent as a JSON object.
    Fields(Vec<(String, FormValue)>),
    /// An explicit multipart form.
    Multipart(Vec<(String, FormValue)>),
}

impl RequestBody {
    /// Applies the automatic form-data conversion.
    pub(crate) fn into_wire(self) -> RequestBody {
        match self {
            RequestBody::Fields(fields) if has_file_value(&fields) => {
                RequestBody::Multipart(fields)
            }
            RequestBody::Fields(fields) => RequestBody::Json(fields_to_json(&fields)),
            other => other,
        }
    }

    pub(crate) fn is_multipart(&self) -> bool {
        matches!(self, RequestBody::Multipart(_))
    }
}

impl From<Value> for RequestBody {
    fn from(value: Value) -> Self {
        RequestBody::Json(value)
    }
}

impl From<Vec<(String, FormValue)>> for RequestBody {
    fn from(fields: Vec<(String, FormValue)>) -> Self {
        RequestBody::Fields(fields)
    }
}

fn deserialize_body<'de, D>(deserializer: D) -> Result<Option<RequestBody>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(deserializer)?.map(RequestBody::Json))
}

/// Options for sending HTTP requests.
///
/// Can also be deserialized from a loose JSON object, in which case every
/// unknown key is forwarded as a query parameter.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOptions {
    /// HTTP method (GET, POST, PUT, PATCH, DELETE). Empty means GET.
    #[serde(default = "default_method")]
    pub method: String,

    /// Custom headers to send with the request.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// The body of the request.
    #[serde(default, deserialize_with = "deserialize_body")]
    pub body: Option<RequestBody>,

    /// Query parameters that will be appended to the request URL.
    #[serde(default)]
    pub query: BTreeMap<String, Value>,

    /// The request identifier that can be used to cancel pending requests.
    #[serde(default, deserialize_with = "deserialize_request_key")]
    pub request_key: RequestKey,

    /// Deprecated alias of `query`.
    #[serde(default)]
    pub params: BTreeMap<String, Value>,

    /// Deprecated, use `request_key: RequestKey::Disabled`.
    #[serde(default, rename = "$autoCancel")]
    pub auto_cancel: Option<bool>,

    /// Deprecated, use `request_key: RequestKey::Key(..)`.
    #[serde(default, rename = "$cancelKey")]
    pub cancel_key: Option<String>,

    /// Unknown options, sent as query parameters.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl SendOptions {
    fn with_method(method: &str) -> Self {
        Self {
            method: method.to_string(),
            ..Default::default()
        }
    }

    /// Creates new SendOptions with GET method.
    pub fn get() -> Self {
        Self::with_method("GET")
    }

    /// Creates new SendOptions with POST method.
    pub fn post() -> Self {
        Self::with_method("POST")
    }

    /// Creates new SendOptions with PATCH method.
    pub fn patch() -> Self {
        Self::with_method("PATCH")
    }

    /// Creates new SendOptions with PUT method.
    pub fn put() -> Self {
        Self::with_method("PUT")
    }

    /// Creates new SendOptions with DELETE method.
    pub fn delete() -> Self {
        Self::with_method("DELETE")
    }

    /// Sets the body of the request.
    pub fn with_body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Sets a query parameter.
    pub fn with_query(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.query.insert(key.to_string(), value.into());
        self
    }

    /// Sets a header.
    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.insert(key.to_string(), value.to_string());
        self
    }

    /// Sets the request key.
    pub fn with_request_key(mut self, key: impl Into<RequestKey>) -> Self {
        self.request_key = key.into();
        self
    }

    /// Opts the request out of auto-cancellation.
    pub fn without_auto_cancel(mut self) -> Self {
        self.request_key = RequestKey::Disabled;
        self
    }

    /// Resolves the backward-compatible aliases and unknown keys.
    ///
    /// Returns the normalized options together with the deprecated aliases
    /// that were used.
    pub(crate) fn normalize(mut self) -> (SendOptions, Vec<&'static str>) {
        let mut used = Vec::new();

        if self.method.is_empty() {
            self.method = default_method();
        }
        self.method = self.method.to_uppercase();

        let mut query = std::mem::take(&mut self.extra);
        query.append(&mut self.query);

        if !self.params.is_empty() {
            used.push("params");
            let mut merged = std::mem::take(&mut self.params);
            merged.append(&mut query);
            query = merged;
        }

        let auto_cancel = self.auto_cancel.take();
        let cancel_key = self.cancel_key.take();
        let query_auto_cancel = query.remove("$autoCancel");
        let query_cancel_key = query.remove("$cancelKey");

        if auto_cancel.is_some() || query_auto_cancel.is_some() {
            used.push("$autoCancel");
        }
        if cancel_key.is_some() || query_cancel_key.is_some() {
            used.push("$cancelKey");
        }

        if self.request_key == RequestKey::Auto {
            let disabled = auto_cancel == Some(false)
                || query_auto_cancel.as_ref() == Some(&Value::Bool(false));
            let key = cancel_key
                .filter(|k| !k.is_empty())
                .or_else(|| {
                    query_cancel_key
                        .as_ref()
                        .and_then(|v| v.as_str())
                        .filter(|k| !k.is_empty())
                        .map(str::to_string)
                });

            if disabled {
                self.request_key = RequestKey::Disabled;
            } else if let Some(key) = key {
                self.request_key = RequestKey::Key(key);
            }
        }

        self.query = query;
        self.body = self.body.map(RequestBody::into_wire);

        (self, used)
    }
}

/// Common options extending SendOptions with fields parameter.
#[derive(Debug, Clone, Default)]
pub struct CommonOptions {
    pub send: SendOptions,

    /// Comma-separated list of fields to include in the response.
    pub fields: Option<String>,
}

impl CommonOptions {
    /// Sets the fields to include in the response.
    pub fn with_fields(mut self, fields: &str) -> Self {
        self.fields = Some(fields.to_string());
        self
    }
}

impl From<SendOptions> for CommonOptions {
    fn from(send: SendOptions) -> Self {
        Self { send, fields: None }
    }
}

impl From<CommonOptions> for SendOptions {
    fn from(opts: CommonOptions) -> Self {
        let mut send = opts.send;
        if let Some(fields) = opts.fields {
            send.query.insert("fields".to_string(), Value::from(fields));
        }
        send
    }
}

/// Options for list operations.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub common: CommonOptions,
    pub sort: Option<String>,
    pub filter: Option<String>,
    pub skip_total: Option<bool>,
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sort(mut self, sort: &str) -> Self {
        self.sort = Some(sort.to_string());
        self
    }

    pub fn filter(mut self, filter: &str) -> Self {
        self.filter = Some(filter.to_string());
        self
    }

    pub fn skip_total(mut self) -> Self {
        self.skip_total = Some(true);
        self
    }

    pub fn request_key(mut self, key: impl Into<RequestKey>) -> Self {
        self.common.send.request_key = key.into();
        self
    }
}

impl From<ListOptions> for SendOptions {
    fn from(opts: ListOptions) -> Self {
        let mut send: SendOptions = opts.common.into();
        if let Some(sort) = opts.sort {
            send.query.insert("sort".to_string(), Value::from(sort));
        }
        if let Some(filter) = opts.filter {
            send.query.insert("filter".to_string(), Value::from(filter));
        }
        if let Some(skip_total) = opts.skip_total {
            send.query.insert("skipTotal".to_string(), Value::from(skip_total));
        }
        send
    }
}

/// Options for full list operations.
#[derive(Debug, Clone, Default)]
pub struct FullListOptions {
    pub list: ListOptions,

    /// Batch size for fetching. Defaults to 500.
    pub batch: Option<u32>,
}

impl FullListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch(mut self, batch: u32) -> Self {
        self.batch = Some(batch);
        self
    }

    pub fn filter(mut self, filter: &str) -> Self {
        self.list.filter = Some(filter.to_string());
        self
    }

    pub fn sort(mut self, sort: &str) -> Self {
        self.list.sort = Some(sort.to_string());
        self
    }
}

/// Options for single record operations.
#[derive(Debug, Clone, Default)]
pub struct RecordOptions {
    pub common: CommonOptions,

    /// Comma-separated list of relations to expand.
    pub expand: Option<String>,
}

impl RecordOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expand(mut self, expand: &str) -> Self {
        self.expand = Some(expand.to_string());
        self
    }
}

impl From<RecordOptions> for SendOptions {
    fn from(opts: RecordOptions) -> Self {
        let mut send: SendOptions = opts.common.into();
        if let Some(expand) = opts.expand {
            send.query.insert("expand".to_string(), Value::from(expand));
        }
        send
    }
}

/// Options for record list operations.
#[derive(Debug, Clone, Default)]
pub struct RecordListOptions {
    pub list: ListOptions,
    pub expand: Option<String>,
}

impl RecordListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expand(mut self, expand: &str) -> Self {
        self.expand = Some(expand.to_string());
        self
    }

    pub fn filter(mut self, filter: &str) -> Self {
        self.list.filter = Some(filter.to_string());
        self
    }

    pub fn sort(mut self, sort: &str) -> Self {
        self.list.sort = Some(sort.to_string());
        self
    }
}

impl From<RecordListOptions> for ListOptions {
    fn from(opts: RecordListOptions) -> Self {
        let mut list = opts.list;
        if let Some(expand) = opts.expand {
            list.common
                .send
                .query
                .insert("expand".to_string(), Value::from(expand));
        }
        list
    }
}

/// Options for file url generation.
#[derive(Debug, Clone, Default)]
pub struct FileOptions {
    /// Thumbnail size (e.g., "100x100").
    pub thumb: Option<String>,

    /// Whether to force download.
    pub download: Option<bool>,

    /// Additional query parameters.
    pub query: BTreeMap<String, Value>,
}

impl FileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn thumb(mut self, thumb: &str) -> Self {
        self.thumb = Some(thumb.to_string());
        self
    }

    pub fn download(mut self) -> Self {
        self.download = Some(true);
        self
    }

    pub(crate) fn into_query(self) -> BTreeMap<String, Value> {
        let mut query = self.query;
        if let Some(thumb) = self.thumb {
            query.insert("thumb".to_string(), Value::from(thumb));
        }
        if let Some(download) = self.download {
            query.insert("download".to_string(), Value::from(download));
        }
        // the server treats any present value as true
        if query.get("download") == Some(&Value::Bool(false)) {
            query.remove("download");
        }
        query
    }
}

/// Options for log stats.
#[derive(Debug, Clone, Default)]
pub struct LogStatsOptions {
    pub common: CommonOptions,
    pub filter: Option<String>,
}

impl LogStatsOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: &str) -> Self {
        self.filter = Some(filter.to_string());
        self
    }
}

impl From<LogStatsOptions> for SendOptions {
    fn from(opts: LogStatsOptions) -> Self {
        let mut send: SendOptions = opts.common.into();
        if let Some(filter) = opts.filter {
            send.query.insert("filter".to_string(), Value::from(filter));
        }
        send
    }
}

/// Serializes query parameters into a URL query string.
///
/// `null` values are skipped, arrays are repeated and objects are JSON encoded.
pub fn serialize_query_params(params: &BTreeMap<String, Value>) -> String {
    let mut result: Vec<String> = Vec::new();

    for (key, value) in params {
        let encoded_key = encode_uri_component(key);

        match value {
            Value::Null => {}
            Value::Array(items) => {
                for item in items {
                    if let Some(s) = prepare_query_param_value(item) {
                        result.push(format!("{}={}", encoded_key, s));
                    }
                }
            }
            other => {
                if let Some(s) = prepare_query_param_value(other) {
                    result.push(format!("{}={}", encoded_key, s));
                }
            }
        }
    }

    result.join("&")
}

fn prepare_query_param_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(encode_uri_component(s)),
        Value::Bool(_) | Value::Number(_) => Some(encode_uri_component(&value.to_string())),
        Value::Array(_) | Value::Object(_) => Some(encode_uri_component(&value.to_string())),
    }
}

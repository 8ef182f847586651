//! Data Transfer Objects (DTOs)

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Generic list result wrapper for paginated responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListResult<T> {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub per_page: u32,
    #[serde(default)]
    pub total_items: i64,
    #[serde(default)]
    pub total_pages: i64,
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

impl<T> Default for ListResult<T> {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 30,
            total_items: 0,
            total_pages: 0,
            items: Vec::new(),
        }
    }
}

/// Record model representing a collection record.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecordModel {
    pub id: String,
    pub collection_id: String,
    #[serde(default)]
    pub collection_name: String,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub updated: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expand: Option<HashMap<String, Value>>,
    #[serde(flatten)]
    pub data: HashMap<String, Value>,
}

impl RecordModel {
    /// Gets a field value from the record data.
    pub fn get<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Gets a string field value from the record data.
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.data
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }
}

/// Admin account model.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AdminModel {
    pub id: String,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub updated: String,
    #[serde(default)]
    pub avatar: i64,
    #[serde(default)]
    pub email: String,
}

/// The model held by an auth store.
///
/// Records are told apart from admins by their `collectionId`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum AuthModel {
    Record(RecordModel),
    Admin(AdminModel),
}

impl AuthModel {
    pub fn id(&self) -> &str {
        match self {
            AuthModel::Record(r) => &r.id,
            AuthModel::Admin(a) => &a.id,
        }
    }

    /// Returns the collection id for record models.
    pub fn collection_id(&self) -> Option<&str> {
        match self {
            AuthModel::Record(r) => Some(&r.collection_id),
            AuthModel::Admin(_) => None,
        }
    }

    /// Returns the collection name for record models.
    pub fn collection_name(&self) -> Option<&str> {
        match self {
            AuthModel::Record(r) => Some(&r.collection_name),
            AuthModel::Admin(_) => None,
        }
    }

    pub fn as_record(&self) -> Option<&RecordModel> {
        match self {
            AuthModel::Record(r) => Some(r),
            AuthModel::Admin(_) => None,
        }
    }

    pub fn as_admin(&self) -> Option<&AdminModel> {
        match self {
            AuthModel::Admin(a) => Some(a),
            AuthModel::Record(_) => None,
        }
    }
}

impl From<RecordModel> for AuthModel {
    fn from(record: RecordModel) -> Self {
        AuthModel::Record(record)
    }
}

impl From<AdminModel> for AuthModel {
    fn from(admin: AdminModel) -> Self {
        AuthModel::Admin(admin)
    }
}

/// Collection schema field.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SchemaField {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub system: bool,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub options: HashMap<String, Value>,
}

/// Collection model.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CollectionModel {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub collection_type: String,
    #[serde(default)]
    pub schema: Vec<SchemaField>,
    #[serde(default)]
    pub indexes: Vec<String>,
    #[serde(default)]
    pub system: bool,
    #[serde(default)]
    pub list_rule: Option<String>,
    #[serde(default)]
    pub view_rule: Option<String>,
    #[serde(default)]
    pub create_rule: Option<String>,
    #[serde(default)]
    pub update_rule: Option<String>,
    #[serde(default)]
    pub delete_rule: Option<String>,
    #[serde(default)]
    pub options: HashMap<String, Value>,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub updated: String,
}

/// Request log entry.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogRequestModel {
    pub id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub auth: String,
    #[serde(default)]
    pub remote_ip: String,
    #[serde(default)]
    pub user_ip: String,
    #[serde(default)]
    pub referer: String,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub meta: HashMap<String, Value>,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub updated: String,
}

/// Hourly request statistics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HourlyStats {
    pub total: u64,
    pub date: String,
}

/// Backup file info.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackupFileInfo {
    pub key: String,
    pub size: u64,
    pub modified: String,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthCheckResponse {
    pub code: u16,
    pub message: String,
    #[serde(default)]
    pub data: HashMap<String, Value>,
}

/// OAuth2 provider info returned by the auth methods list.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthProviderInfo {
    pub name: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub code_verifier: String,
    #[serde(default)]
    pub code_challenge: String,
    #[serde(default)]
    pub code_challenge_method: String,
    #[serde(default)]
    pub auth_url: String,
}

/// Available auth methods for a collection.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthMethodsList {
    #[serde(default)]
    pub username_password: bool,
    #[serde(default)]
    pub email_password: bool,
    #[serde(default)]
    pub auth_providers: Vec<AuthProviderInfo>,
}

/// Record auth response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordAuthResponse {
    /// The signed auth record.
    pub record: RecordModel,
    /// The record auth token.
    pub token: String,
    /// Auth meta data usually filled when OAuth2 is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<HashMap<String, Value>>,
}

/// Admin auth response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdminAuthResponse {
    pub admin: AdminModel,
    pub token: String,
}

/// A linked OAuth2 account of a record.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalAuthModel {
    pub id: String,
    #[serde(default)]
    pub record_id: String,
    #[serde(default)]
    pub collection_id: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub provider_id: String,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub updated: String,
}

/// Apple client secret response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppleClientSecret {
    pub secret: String,
}

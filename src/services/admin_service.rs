//! Admin Service

use crate::client_response_error::ClientResponseError;
use crate::services::crud_service::{with_body, with_method, CrudService};
use crate::tools::dtos::{AdminAuthResponse, AdminModel, AuthModel};
use crate::tools::options::{RecordOptions, RequestBody, SendOptions};
use crate::Client;
use serde_json::{json, Value};
use std::ops::Deref;
use std::sync::Arc;

const BASE_PATH: &str = "/api/admins";

/// Service for the admin API endpoints.
///
/// List and view handlers come from [`CrudService`]; `update` and `delete`
/// additionally keep the auth store in sync with the authenticated admin.
#[derive(Debug, Clone)]
pub struct AdminService {
    crud: CrudService<AdminModel>,
}

impl Deref for AdminService {
    type Target = CrudService<AdminModel>;

    fn deref(&self) -> &Self::Target {
        &self.crud
    }
}

impl AdminService {
    pub fn new(client: Arc<Client>) -> Self {
        Self {
            crud: CrudService::new(client, BASE_PATH),
        }
    }

    fn authenticated_admin_id(&self) -> Option<String> {
        match self.client().auth_store().model() {
            Some(AuthModel::Admin(admin)) => Some(admin.id),
            _ => None,
        }
    }

    /// Updates an admin and refreshes the stored model if it is the
    /// currently authenticated one.
    pub async fn update(
        &self,
        id: &str,
        body: impl Into<RequestBody>,
        options: Option<RecordOptions>,
    ) -> Result<AdminModel, ClientResponseError> {
        let item = self.crud.update(id, body, options).await?;

        if self.authenticated_admin_id().as_deref() == Some(item.id.as_str()) {
            let store = self.client().auth_store();
            store.save(&store.token(), Some(AuthModel::Admin(item.clone())));
        }

        Ok(item)
    }

    /// Deletes an admin and clears the auth store if it was the
    /// currently authenticated one.
    pub async fn delete(
        &self,
        id: &str,
        options: Option<SendOptions>,
    ) -> Result<bool, ClientResponseError> {
        let deleted = self.crud.delete(id, options).await?;

        if deleted && self.authenticated_admin_id().as_deref() == Some(id) {
            self.client().auth_store().clear();
        }

        Ok(deleted)
    }

    // ---------------------------------------------------------------
    // Auth handlers
    // ---------------------------------------------------------------

    async fn send_auth(
        &self,
        path: &str,
        options: SendOptions,
    ) -> Result<AdminAuthResponse, ClientResponseError> {
        let auth: AdminAuthResponse = self.client().send(path, options).await?;

        if !auth.token.is_empty() {
            self.client()
                .auth_store()
                .save(&auth.token, Some(AuthModel::Admin(auth.admin.clone())));
        }

        Ok(auth)
    }

    /// Authenticates an admin account by its email and password and
    /// saves the returned token and model in the auth store.
    pub async fn auth_with_password(
        &self,
        email: &str,
        password: &str,
        options: Option<RecordOptions>,
    ) -> Result<AdminAuthResponse, ClientResponseError> {
        let options = with_method(options.unwrap_or_default().into(), "POST");
        let options = with_body(
            options,
            json!({
                "identity": email,
                "password": password,
            }),
        );

        self.send_auth(&format!("{}/auth-with-password", BASE_PATH), options)
            .await
    }

    /// Refreshes the current admin authenticated instance and
    /// returns a new token and admin data.
    pub async fn auth_refresh(
        &self,
        options: Option<RecordOptions>,
    ) -> Result<AdminAuthResponse, ClientResponseError> {
        let options = with_method(options.unwrap_or_default().into(), "POST");
        self.send_auth(&format!("{}/auth-refresh", BASE_PATH), options)
            .await
    }

    /// Sends admin password reset request.
    pub async fn request_password_reset(
        &self,
        email: &str,
        options: Option<SendOptions>,
    ) -> Result<bool, ClientResponseError> {
        let options = with_method(options.unwrap_or_default(), "POST");
        let options = with_body(options, json!({ "email": email }));

        self.client()
            .send::<Value>(&format!("{}/request-password-reset", BASE_PATH), options)
            .await?;
        Ok(true)
    }

    /// Confirms admin password reset request.
    pub async fn confirm_password_reset(
        &self,
        reset_token: &str,
        password: &str,
        password_confirm: &str,
        options: Option<SendOptions>,
    ) -> Result<bool, ClientResponseError> {
        let options = with_method(options.unwrap_or_default(), "POST");
        let options = with_body(
            options,
            json!({
                "token": reset_token,
                "password": password,
                "passwordConfirm": password_confirm,
            }),
        );

        self.client()
            .send::<Value>(&format!("{}/confirm-password-reset", BASE_PATH), options)
            .await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{body_json, FakeHttp};
    use crate::transport::TransportError;

    const ADMIN: &str = r#"{"id":"a1","email":"root@example.com","avatar":3}"#;

    fn admin_client() -> (Arc<Client>, Arc<FakeHttp>) {
        let http = Arc::new(FakeHttp::with_handler(|request| async move {
            let body = if request.url.contains("/auth-") {
                format!(r#"{{"token":"tok","admin":{}}}"#, ADMIN)
            } else {
                ADMIN.to_string()
            };
            Ok::<_, TransportError>(FakeHttp::json(&request, 200, &body))
        }));
        let client = Client::builder("http://127.0.0.1:8090")
            .http_transport(http.clone())
            .build();
        (client, http)
    }

    #[tokio::test]
    async fn test_auth_with_password_saves_admin() {
        let (client, http) = admin_client();

        let auth = client
            .admins()
            .auth_with_password("root@example.com", "1234567890", None)
            .await
            .unwrap();

        assert_eq!(auth.token, "tok");
        assert_eq!(client.auth_store().token(), "tok");
        assert_eq!(client.auth_store().model().unwrap().id(), "a1");

        let request = http.last_request().unwrap();
        assert_eq!(request.method, "POST");
        assert!(request.url.ends_with("/api/admins/auth-with-password"));
        assert_eq!(
            body_json(&request),
            json!({"identity": "root@example.com", "password": "1234567890"})
        );
    }

    #[tokio::test]
    async fn test_update_syncs_authenticated_admin() {
        let (client, _http) = admin_client();
        let stale = AdminModel {
            id: "a1".to_string(),
            email: "old@example.com".to_string(),
            ..Default::default()
        };
        client.auth_store().save("tok", Some(AuthModel::Admin(stale)));

        client
            .admins()
            .update("a1", json!({"email": "root@example.com"}), None)
            .await
            .unwrap();

        let model = client.auth_store().model().unwrap();
        assert_eq!(model.as_admin().unwrap().email, "root@example.com");
        assert_eq!(client.auth_store().token(), "tok");
    }

    #[tokio::test]
    async fn test_delete_clears_only_matching_admin() {
        let (client, _http) = admin_client();
        let admin = AdminModel {
            id: "a1".to_string(),
            ..Default::default()
        };
        client.auth_store().save("tok", Some(AuthModel::Admin(admin)));

        assert!(client.admins().delete("other", None).await.unwrap());
        assert_eq!(client.auth_store().token(), "tok");

        assert!(client.admins().delete("a1", None).await.unwrap());
        assert!(client.auth_store().token().is_empty());
        assert!(client.auth_store().model().is_none());
    }
}

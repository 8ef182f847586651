//! Collection Service

use crate::client_response_error::ClientResponseError;
use crate::services::crud_service::{with_body, with_method, CrudService};
use crate::tools::dtos::CollectionModel;
use crate::tools::options::SendOptions;
use crate::Client;
use serde_json::{json, Value};
use std::ops::Deref;
use std::sync::Arc;

/// Service for collection API endpoints.
#[derive(Debug, Clone)]
pub struct CollectionService {
    crud: CrudService<CollectionModel>,
}

impl Deref for CollectionService {
    type Target = CrudService<CollectionModel>;

    fn deref(&self) -> &Self::Target {
        &self.crud
    }
}

impl CollectionService {
    pub fn new(client: Arc<Client>) -> Self {
        Self {
            crud: CrudService::new(client, "/api/collections"),
        }
    }

    /// Imports the provided collections.
    ///
    /// If `delete_missing` is true, all local collections and schema fields
    /// that are not present in the imported configuration WILL BE DELETED
    /// (including their related records data)!
    pub async fn import(
        &self,
        collections: &[CollectionModel],
        delete_missing: bool,
        options: Option<SendOptions>,
    ) -> Result<bool, ClientResponseError> {
        let options = with_method(options.unwrap_or_default(), "PUT");
        let options = with_body(
            options,
            json!({
                "collections": collections,
                "deleteMissing": delete_missing,
            }),
        );

        self.client()
            .send::<Value>(&format!("{}/import", self.base_crud_path()), options)
            .await?;
        Ok(true)
    }
}

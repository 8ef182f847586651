//! Generic CRUD operations over a REST collection path.

use crate::client_response_error::ClientResponseError;
use crate::tools::dtos::ListResult;
use crate::tools::encoding::encode_uri_component;
use crate::tools::options::{
    FullListOptions, ListOptions, RecordOptions, RequestBody, RequestKey, SendOptions,
};
use crate::Client;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::marker::PhantomData;
use std::sync::Arc;

const DEFAULT_BATCH: u32 = 500;

/// Applies `method` unless the caller already picked one.
pub(crate) fn with_method(mut options: SendOptions, method: &str) -> SendOptions {
    if options.method.is_empty() {
        options.method = method.to_string();
    }
    options
}

/// Applies `body` unless the caller already provided one.
pub(crate) fn with_body(mut options: SendOptions, body: impl Into<RequestBody>) -> SendOptions {
    if options.body.is_none() {
        options.body = Some(body.into());
    }
    options
}

/// List/view/create/update/delete handlers of a single resource path,
/// decoding items as `M`.
pub struct CrudService<M> {
    client: Arc<Client>,
    base_path: String,
    _model: PhantomData<fn() -> M>,
}

impl<M> Clone for CrudService<M> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            base_path: self.base_path.clone(),
            _model: PhantomData,
        }
    }
}

impl<M> std::fmt::Debug for CrudService<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrudService")
            .field("base_path", &self.base_path)
            .finish()
    }
}

impl<M: DeserializeOwned> CrudService<M> {
    pub fn new(client: Arc<Client>, base_path: impl Into<String>) -> Self {
        Self {
            client,
            base_path: base_path.into(),
            _model: PhantomData,
        }
    }

    /// Returns the base path for CRUD operations.
    pub fn base_crud_path(&self) -> &str {
        &self.base_path
    }

    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    pub(crate) fn item_path(&self, id: &str) -> String {
        format!("{}/{}", self.base_path, encode_uri_component(id))
    }

    /// Returns all list items, fetched in batches (500 per request by default).
    pub async fn get_full_list(
        &self,
        options: Option<FullListOptions>,
    ) -> Result<Vec<M>, ClientResponseError> {
        let options = options.unwrap_or_default();
        let batch = match options.batch {
            Some(0) | None => DEFAULT_BATCH,
            Some(batch) => batch,
        };

        let mut send: SendOptions = options.list.into();
        send.query.entry("skipTotal".to_string()).or_insert(json!(1));

        let mut result = Vec::new();
        let mut page = 1;

        loop {
            let list = self.get_list_with(page, batch, send.clone()).await?;
            let fetched = list.items.len();
            result.extend(list.items);

            if fetched as u32 != list.per_page || fetched == 0 {
                break;
            }
            page += 1;
        }

        Ok(result)
    }

    /// Returns paginated items list.
    pub async fn get_list(
        &self,
        page: u32,
        per_page: u32,
        options: Option<ListOptions>,
    ) -> Result<ListResult<M>, ClientResponseError> {
        self.get_list_with(page, per_page, options.unwrap_or_default().into())
            .await
    }

    async fn get_list_with(
        &self,
        page: u32,
        per_page: u32,
        options: SendOptions,
    ) -> Result<ListResult<M>, ClientResponseError> {
        let mut options = with_method(options, "GET");
        options.query.entry("page".to_string()).or_insert(json!(page));
        options
            .query
            .entry("perPage".to_string())
            .or_insert(json!(per_page));

        self.client.send(&self.base_path, options).await
    }

    /// Returns the first item matching `filter`.
    ///
    /// Fails with a 404 error when nothing matches, for consistency with
    /// [`Self::get_one`].
    pub async fn get_first_list_item(
        &self,
        filter: &str,
        options: Option<ListOptions>,
    ) -> Result<M, ClientResponseError> {
        let mut options: SendOptions = options.unwrap_or_default().into();
        if options.request_key == RequestKey::Auto {
            options.request_key =
                RequestKey::Key(format!("one_by_filter_{}_{}", self.base_path, filter));
        }
        options
            .query
            .entry("filter".to_string())
            .or_insert(json!(filter));
        options
            .query
            .entry("skipTotal".to_string())
            .or_insert(json!(1));

        let list = self.get_list_with(1, 1, options).await?;

        list.items.into_iter().next().ok_or_else(|| {
            ClientResponseError::not_found(
                &self.client.build_url(&self.base_path),
                "The requested resource wasn't found.",
            )
        })
    }

    /// Returns a single item by its id.
    pub async fn get_one(
        &self,
        id: &str,
        options: Option<RecordOptions>,
    ) -> Result<M, ClientResponseError> {
        if id.is_empty() {
            return Err(ClientResponseError::not_found(
                &self.client.build_url(&format!("{}/", self.base_path)),
                "Missing required record id.",
            ));
        }

        let options = with_method(options.unwrap_or_default().into(), "GET");
        self.client.send(&self.item_path(id), options).await
    }

    /// Creates a new item.
    pub async fn create(
        &self,
        body: impl Into<RequestBody>,
        options: Option<RecordOptions>,
    ) -> Result<M, ClientResponseError> {
        let options = with_method(options.unwrap_or_default().into(), "POST");
        let options = with_body(options, body);
        self.client.send(&self.base_path, options).await
    }

    /// Updates an existing item by its id.
    pub async fn update(
        &self,
        id: &str,
        body: impl Into<RequestBody>,
        options: Option<RecordOptions>,
    ) -> Result<M, ClientResponseError> {
        let options = with_method(options.unwrap_or_default().into(), "PATCH");
        let options = with_body(options, body);
        self.client.send(&self.item_path(id), options).await
    }

    /// Deletes an existing item by its id.
    pub async fn delete(
        &self,
        id: &str,
        options: Option<SendOptions>,
    ) -> Result<bool, ClientResponseError> {
        let options = with_method(options.unwrap_or_default(), "DELETE");
        self.client
            .send::<Value>(&self.item_path(id), options)
            .await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{body_json, FakeHttp};
    use crate::tools::dtos::RecordModel;
    use crate::transport::HttpRequest;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn page_of(request: &HttpRequest) -> u32 {
        let url = url::Url::parse(&request.url).unwrap();
        url.query_pairs()
            .find(|(k, _)| k == "page")
            .and_then(|(_, v)| v.parse().ok())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_get_full_list_fetches_until_short_page() {
        let http = Arc::new(FakeHttp::with_handler(|request| async move {
            let page = page_of(&request);
            let items: Vec<Value> = match page {
                1 | 2 => (0..2).map(|i| json!({"id": format!("{}-{}", page, i), "collectionId": "c"})).collect(),
                _ => vec![json!({"id": "3-0", "collectionId": "c"})],
            };
            let body = json!({"page": page, "perPage": 2, "items": items}).to_string();
            Ok::<_, crate::transport::TransportError>(FakeHttp::json(&request, 200, &body))
        }));
        let client = Client::builder("http://127.0.0.1:8090")
            .http_transport(http.clone())
            .build();
        let crud: CrudService<RecordModel> = CrudService::new(client, "/api/collections/posts/records");

        let items = crud
            .get_full_list(Some(FullListOptions::new().batch(2).sort("-created")))
            .await
            .unwrap();

        assert_eq!(items.len(), 5);
        assert_eq!(items[4].id, "3-0");

        let requests = http.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests[0].url.contains("skipTotal=1"));
        assert!(requests[0].url.contains("perPage=2"));
        assert!(requests[0].url.contains("sort=-created"));
    }

    #[tokio::test]
    async fn test_get_list_query_wins_over_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/collections/posts/records"))
            .and(query_param("page", "7"))
            .and(query_param("perPage", "10"))
            .and(query_param("filter", "a>1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "page": 7, "perPage": 10, "totalItems": 0, "totalPages": 0, "items": []
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = Client::new(&server.uri());
        let crud: CrudService<RecordModel> = CrudService::new(client, "/api/collections/posts/records");

        let mut options = ListOptions::new().filter("a>1");
        options.common.send.query.insert("page".to_string(), json!(7));

        let list = crud.get_list(1, 10, Some(options)).await.unwrap();
        assert_eq!(list.page, 7);
    }

    #[tokio::test]
    async fn test_get_first_list_item_not_found() {
        let http = Arc::new(FakeHttp::with_handler(|request| async move {
            Ok::<_, crate::transport::TransportError>(FakeHttp::json(
                &request,
                200,
                r#"{"page":1,"perPage":1,"items":[]}"#,
            ))
        }));
        let client = Client::builder("http://127.0.0.1:8090")
            .http_transport(http.clone())
            .build();
        let crud: CrudService<RecordModel> = CrudService::new(client, "/api/admins");

        let err = crud.get_first_list_item("email='x'", None).await.unwrap_err();
        assert_eq!(err.status, 404);
        assert_eq!(err.message, "The requested resource wasn't found.");

        let request = http.last_request().unwrap();
        assert!(request.url.contains("filter=email%3D'x'"));
        assert!(request.url.contains("skipTotal=1"));
        assert!(request.url.contains("perPage=1"));
    }

    #[tokio::test]
    async fn test_item_operations_encode_id() {
        let (client, http, _sse) = crate::testutil::fake_client();
        let crud: CrudService<Value> = CrudService::new(client, "/api/collections/posts/records");

        crud.create(json!({"title": "a"}), None).await.unwrap();
        crud.update("a/b", json!({"title": "b"}), None).await.unwrap();
        assert!(crud.delete("a/b", None).await.unwrap());

        let requests = http.requests();
        assert_eq!(requests[0].method, "POST");
        assert_eq!(body_json(&requests[0]), json!({"title": "a"}));
        assert_eq!(requests[1].method, "PATCH");
        assert!(requests[1].url.ends_with("/records/a%2Fb"));
        assert_eq!(requests[2].method, "DELETE");

        let err = crud.get_one("", None).await.unwrap_err();
        assert_eq!(err.status, 404);
        assert_eq!(http.requests().len(), 3);
    }
}

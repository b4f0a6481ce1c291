//! Firestore REST API client.
//!
//! - Token caching with refresh margin (or anonymous access for the emulator)
//! - HTTP client tuning (pooling, timeouts)
//! - Exponential backoff with jitter on idempotent reads
//! - Observability (tracing spans, metrics)

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gcp_auth::{CustomServiceAccount, TokenProvider};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use tracing::{debug, info_span, Instrument};

use crate::error::{FirestoreError, FirestoreResult};
use crate::metrics::{record_precondition_conflict, record_request};
use crate::retry::RetryConfig;
use crate::token_cache::{TokenCache, TokenSource};
use crate::types::{
    BatchWriteRequest, BatchWriteResponse, Document, Fields, ListDocumentsResponse,
    RunQueryRequest, RunQueryResponse, StructuredQuery, Write,
};

// =============================================================================
// Configuration
// =============================================================================

/// Firestore client configuration.
#[derive(Debug, Clone)]
pub struct FirestoreConfig {
    pub project_id: String,
    /// Usually "(default)"
    pub database_id: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub retry: RetryConfig,
    /// `host:port` of a local emulator; requests go there unauthenticated
    pub emulator_host: Option<String>,
}

impl FirestoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> FirestoreResult<Self> {
        let project_id = std::env::var("GCP_PROJECT_ID")
            .or_else(|_| std::env::var("FIREBASE_PROJECT_ID"))
            .map_err(|_| {
                FirestoreError::auth_error(
                    "GCP_PROJECT_ID or FIREBASE_PROJECT_ID must be set to access Firestore",
                )
            })?;

        if project_id.is_empty() {
            return Err(FirestoreError::auth_error(
                "GCP_PROJECT_ID or FIREBASE_PROJECT_ID cannot be empty",
            ));
        }

        let connect_timeout_secs: u64 = std::env::var("FIRESTORE_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        Ok(Self {
            project_id,
            database_id: std::env::var("FIRESTORE_DATABASE_ID")
                .unwrap_or_else(|_| "(default)".to_string()),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            retry: RetryConfig::from_env(),
            emulator_host: std::env::var("FIRESTORE_EMULATOR_HOST")
                .ok()
                .filter(|h| !h.is_empty()),
        })
    }

    fn documents_root(&self) -> String {
        format!(
            "projects/{}/databases/{}/documents",
            self.project_id, self.database_id
        )
    }
}

// =============================================================================
// Client
// =============================================================================

/// Firestore REST API client. Cheap to clone.
#[derive(Clone)]
pub struct FirestoreClient {
    http: Client,
    config: FirestoreConfig,
    base_url: String,
    token_cache: Arc<TokenCache>,
}

impl FirestoreClient {
    /// Create a client using service account credentials, or the emulator if configured.
    pub async fn new(config: FirestoreConfig) -> FirestoreResult<Self> {
        let (source, origin) = match &config.emulator_host {
            Some(host) => (TokenSource::Anonymous, format!("http://{}", host)),
            None => (
                TokenSource::Provider(Self::create_auth_provider()?),
                "https://firestore.googleapis.com".to_string(),
            ),
        };
        Self::with_token_source(config, source, &origin)
    }

    /// Create a client against an explicit origin (e.g. `http://127.0.0.1:8080`).
    pub fn with_token_source(
        config: FirestoreConfig,
        source: TokenSource,
        origin: &str,
    ) -> FirestoreResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("story-firestore/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(FirestoreError::Network)?;

        let base_url = format!(
            "{}/v1/{}",
            origin.trim_end_matches('/'),
            config.documents_root()
        );

        Ok(Self {
            http,
            config,
            base_url,
            token_cache: Arc::new(TokenCache::new(source)),
        })
    }

    fn create_auth_provider() -> FirestoreResult<Arc<dyn TokenProvider>> {
        let service_account = CustomServiceAccount::from_env().map_err(|e| {
            FirestoreError::auth_error(format!("Failed to load service account: {}", e))
        })?;

        match service_account {
            Some(sa) => Ok(Arc::new(sa)),
            None => Err(FirestoreError::auth_error(
                "GOOGLE_APPLICATION_CREDENTIALS not set. \
                 Set it to the path of your service account JSON file.",
            )),
        }
    }

    /// Create from environment variables.
    pub async fn from_env() -> FirestoreResult<Self> {
        Self::new(FirestoreConfig::from_env()?).await
    }

    fn document_url(&self, collection: &str, doc_id: &str) -> String {
        format!("{}/{}/{}", self.base_url, collection, doc_id)
    }

    /// Full resource name, as used in batch writes.
    pub fn full_document_name(&self, collection: &str, doc_id: &str) -> String {
        format!("{}/{}/{}", self.config.documents_root(), collection, doc_id)
    }

    // =========================================================================
    // Transport
    // =========================================================================

    fn is_access_token_expired(body: &str) -> bool {
        body.contains("ACCESS_TOKEN_EXPIRED") || body.contains("\"UNAUTHENTICATED\"")
    }

    fn build<B: Serialize + ?Sized>(
        &self,
        method: &Method,
        url: &str,
        body: Option<&B>,
        token: Option<&str>,
    ) -> RequestBuilder {
        let mut request = self.http.request(method.clone(), url);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        request
    }

    /// Send an authorized request, refreshing the token once if it expired mid-flight.
    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
    ) -> FirestoreResult<Response> {
        let token = self.token_cache.get_token().await?;
        let response = self.build(&method, url, body, token.as_deref()).send().await?;

        if response.status() != StatusCode::UNAUTHORIZED || self.token_cache.is_anonymous() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        if !Self::is_access_token_expired(&text) {
            return Err(FirestoreError::from_http_status(
                401,
                format!("{} failed: {}", url, text),
            ));
        }

        debug!("Firestore access token expired, refreshing");
        self.token_cache.invalidate().await;
        let token = self.token_cache.get_token().await?;
        Ok(self.build(&method, url, body, token.as_deref()).send().await?)
    }

    async fn error_from(response: Response, url: &str) -> FirestoreError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        FirestoreError::from_http_status(status, format!("{} failed: {}", url, body))
    }

    // =========================================================================
    // CRUD Operations
    // =========================================================================

    /// Get a document. `Ok(None)` when it does not exist.
    pub async fn get_document(
        &self,
        collection: &str,
        doc_id: &str,
    ) -> FirestoreResult<Option<Document>> {
        let url = self.document_url(collection, doc_id);

        let url = url.as_str();
        self.execute_request("get_document", collection, Some(doc_id), async {
            self.with_retry("get_document", || async move {
                let response = self.send::<()>(Method::GET, url, None).await?;
                match response.status() {
                    StatusCode::OK => Ok(Some(response.json::<Document>().await?)),
                    StatusCode::NOT_FOUND => Ok(None),
                    _ => Err(Self::error_from(response, url).await),
                }
            })
            .await
        })
        .await
    }

    /// Create a document; fails with `AlreadyExists` if the id is taken.
    pub async fn create_document(
        &self,
        collection: &str,
        doc_id: &str,
        fields: Fields,
    ) -> FirestoreResult<Document> {
        let url = format!(
            "{}/{}?documentId={}",
            self.base_url,
            collection,
            urlencoding::encode(doc_id)
        );
        let body = Document::new(fields);

        self.execute_request("create_document", collection, Some(doc_id), async {
            let response = self.send(Method::POST, &url, Some(&body)).await?;
            match response.status() {
                StatusCode::OK | StatusCode::CREATED => Ok(response.json::<Document>().await?),
                StatusCode::CONFLICT => Err(FirestoreError::AlreadyExists(format!(
                    "{}/{}",
                    collection, doc_id
                ))),
                _ => Err(Self::error_from(response, &url).await),
            }
        })
        .await
    }

    /// Merge-update a document (creates it when absent and no precondition is given).
    pub async fn update_document(
        &self,
        collection: &str,
        doc_id: &str,
        fields: Fields,
        update_mask: Option<Vec<String>>,
    ) -> FirestoreResult<Document> {
        self.patch("update_document", collection, doc_id, fields, update_mask, None)
            .await
    }

    /// Update with optimistic concurrency control on `updateTime`.
    ///
    /// Returns `PreconditionFailed` if the document changed since it was read.
    pub async fn update_document_with_precondition(
        &self,
        collection: &str,
        doc_id: &str,
        fields: Fields,
        update_mask: Option<Vec<String>>,
        update_time: Option<&str>,
    ) -> FirestoreResult<Document> {
        let result = self
            .patch(
                "update_document_precondition",
                collection,
                doc_id,
                fields,
                update_mask,
                update_time,
            )
            .await;

        if matches!(&result, Err(e) if e.is_precondition_failed()) {
            record_precondition_conflict(collection);
        }
        result
    }

    async fn patch(
        &self,
        operation: &str,
        collection: &str,
        doc_id: &str,
        fields: Fields,
        update_mask: Option<Vec<String>>,
        update_time: Option<&str>,
    ) -> FirestoreResult<Document> {
        let mut params: Vec<String> = update_mask
            .unwrap_or_default()
            .iter()
            .map(|f| format!("updateMask.fieldPaths={}", urlencoding::encode(f)))
            .collect();
        if let Some(ts) = update_time {
            params.push(format!(
                "currentDocument.updateTime={}",
                urlencoding::encode(ts)
            ));
        }

        let mut url = self.document_url(collection, doc_id);
        if !params.is_empty() {
            url = format!("{}?{}", url, params.join("&"));
        }
        let body = Document::new(fields);

        self.execute_request(operation, collection, Some(doc_id), async {
            let response = self.send(Method::PATCH, &url, Some(&body)).await?;
            match response.status() {
                StatusCode::OK => Ok(response.json::<Document>().await?),
                StatusCode::PRECONDITION_FAILED | StatusCode::CONFLICT => {
                    let text = response.text().await.unwrap_or_default();
                    Err(FirestoreError::PreconditionFailed(text))
                }
                // A stale updateTime on a vanished document also surfaces as 404
                StatusCode::NOT_FOUND if update_time.is_some() => Err(
                    FirestoreError::PreconditionFailed(format!("{}/{} missing", collection, doc_id)),
                ),
                StatusCode::NOT_FOUND => Err(FirestoreError::not_found(format!(
                    "{}/{}",
                    collection, doc_id
                ))),
                StatusCode::BAD_REQUEST => {
                    let text = response.text().await.unwrap_or_default();
                    if text.contains("FAILED_PRECONDITION") {
                        Err(FirestoreError::PreconditionFailed(text))
                    } else {
                        Err(FirestoreError::request_failed(format!("{} failed: {}", url, text)))
                    }
                }
                _ => Err(Self::error_from(response, &url).await),
            }
        })
        .await
    }

    /// List one page of documents in a collection.
    pub async fn list_documents(
        &self,
        collection: &str,
        page_size: Option<u32>,
        page_token: Option<&str>,
    ) -> FirestoreResult<ListDocumentsResponse> {
        let mut params = Vec::new();
        if let Some(size) = page_size {
            params.push(format!("pageSize={}", size));
        }
        if let Some(token) = page_token {
            params.push(format!("pageToken={}", urlencoding::encode(token)));
        }
        let mut url = format!("{}/{}", self.base_url, collection);
        if !params.is_empty() {
            url = format!("{}?{}", url, params.join("&"));
        }

        let url = url.as_str();
        self.execute_request("list_documents", collection, None, async {
            self.with_retry("list_documents", || async move {
                let response = self.send::<()>(Method::GET, url, None).await?;
                match response.status() {
                    StatusCode::OK => Ok(response.json::<ListDocumentsResponse>().await?),
                    _ => Err(Self::error_from(response, url).await),
                }
            })
            .await
        })
        .await
    }

    /// Execute a batch write. Each write is applied atomically on its own.
    pub async fn batch_write(&self, writes: Vec<Write>) -> FirestoreResult<BatchWriteResponse> {
        if writes.is_empty() {
            return Ok(BatchWriteResponse::empty());
        }
        if writes.len() > 500 {
            return Err(FirestoreError::request_failed(
                "Batch write exceeds 500 document limit",
            ));
        }

        let url = format!("{}:batchWrite", self.base_url);
        let request = BatchWriteRequest { writes };

        self.execute_request("batch_write", "batch", None, async {
            let response = self.send(Method::POST, &url, Some(&request)).await?;
            match response.status() {
                StatusCode::OK => {
                    let batch: BatchWriteResponse = response.json().await?;
                    batch.check_for_errors()?;
                    Ok(batch)
                }
                _ => Err(Self::error_from(response, &url).await),
            }
        })
        .await
    }

    /// Run a structured query under `parent_path` ("" for the database root).
    pub async fn run_query(
        &self,
        parent_path: &str,
        query: StructuredQuery,
    ) -> FirestoreResult<Vec<Document>> {
        let url = if parent_path.is_empty() {
            format!("{}:runQuery", self.base_url)
        } else {
            format!("{}/{}:runQuery", self.base_url, parent_path)
        };
        let request = RunQueryRequest {
            structured_query: query,
        };
        let label = if parent_path.is_empty() { "(root)" } else { parent_path };

        let (url, request) = (url.as_str(), &request);
        self.execute_request("run_query", label, None, async {
            self.with_retry("run_query", || async move {
                let response = self.send(Method::POST, url, Some(request)).await?;
                match response.status() {
                    StatusCode::OK => {
                        let rows: Vec<RunQueryResponse> = response.json().await?;
                        Ok(rows.into_iter().filter_map(|r| r.document).collect())
                    }
                    _ => Err(Self::error_from(response, url).await),
                }
            })
            .await
        })
        .await
    }

    /// Execute with the configured transport retry policy.
    pub async fn with_retry<T, F, Fut>(&self, operation: &str, op: F) -> FirestoreResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = FirestoreResult<T>>,
    {
        crate::retry::with_retry(&self.config.retry, operation, op).await
    }

    /// Wrap a request in a tracing span and record its metrics.
    async fn execute_request<T, F>(
        &self,
        operation: &str,
        collection: &str,
        doc_id: Option<&str>,
        fut: F,
    ) -> FirestoreResult<T>
    where
        F: Future<Output = FirestoreResult<T>>,
    {
        let span = info_span!(
            "firestore_request",
            operation = %operation,
            collection = %collection,
            doc_id = doc_id.unwrap_or("")
        );

        let start = Instant::now();
        let result = fut.instrument(span).await;
        let status = match &result {
            Ok(_) => 200,
            Err(e) => e.http_status().unwrap_or(500),
        };
        record_request(operation, status, start.elapsed().as_millis() as f64);

        result
    }
}

// =============================================================================
// Tests
// =============================================================================

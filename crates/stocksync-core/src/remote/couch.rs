//! CouchDB-compatible HTTP client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use super::{RemoteDocument, RemoteEntry, RemoteStore};
use crate::config::RemoteConfig;
use crate::error::{Error, Result};
use crate::models::{Collection, Document, Fields};
use crate::util::compact_text;

const PING_TIMEOUT: Duration = Duration::from_secs(3);

/// [`RemoteStore`] backed by a CouchDB server.
///
/// Each collection lives in its own database named `{database}_{collection}`.
#[derive(Clone)]
pub struct CouchClient {
    base_url: String,
    database: String,
    username: String,
    password: String,
    client: reqwest::Client,
    ping_client: reqwest::Client,
}

impl std::fmt::Debug for CouchClient {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("CouchClient")
            .field("base_url", &self.base_url)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl CouchClient {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        config.validate()?;

        let mut builder = reqwest::Client::builder();
        if let Some(seconds) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(seconds));
        }
        let client = builder
            .build()
            .map_err(|error| Error::Config(format!("failed to build HTTP client: {error}")))?;
        let ping_client = reqwest::Client::builder()
            .timeout(PING_TIMEOUT)
            .build()
            .map_err(|error| Error::Config(format!("failed to build HTTP client: {error}")))?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            database: config.database.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            client,
            ping_client,
        })
    }

    /// Remote database backing `collection`.
    #[must_use]
    pub fn database_name(&self, collection: Collection) -> String {
        format!("{}_{}", self.database, collection.name())
    }

    fn database_url(&self, collection: Collection) -> String {
        format!(
            "{}/{}",
            self.base_url,
            urlencoding::encode(&self.database_name(collection))
        )
    }

    fn document_url(&self, collection: Collection, id: &str) -> String {
        format!(
            "{}/{}",
            self.database_url(collection),
            urlencoding::encode(id)
        )
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        request
            .basic_auth(&self.username, Some(&self.password))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|error| Error::Unreachable(error.to_string()))
    }
}

#[async_trait]
impl RemoteStore for CouchClient {
    async fn ensure_collection(&self, collection: Collection) -> Result<()> {
        let response = self
            .send(self.client.put(self.database_url(collection)))
            .await?;
        match response.status() {
            status if status.is_success() => {
                tracing::info!("Created remote database {}", self.database_name(collection));
                Ok(())
            }
            StatusCode::PRECONDITION_FAILED => Ok(()),
            _ => Err(error_for(response, &self.database_name(collection)).await),
        }
    }

    /// Lists `_all_docs?include_docs=true`. Tombstones show up only when the
    /// server keeps deleted rows in that listing; stock CouchDB omits them and
    /// needs `_changes?include_docs=true` to report deletions.
    async fn fetch_all(&self, collection: Collection) -> Result<Vec<RemoteEntry>> {
        let url = format!("{}/_all_docs?include_docs=true", self.database_url(collection));
        let response = self.send(self.client.get(url)).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(error_for(response, &self.database_name(collection)).await);
        }

        let listing: AllDocsResponse = response
            .json()
            .await
            .map_err(|error| Error::Remote(format!("invalid _all_docs payload: {error}")))?;
        Ok(listing.rows.into_iter().filter_map(AllDocsRow::into_entry).collect())
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<RemoteDocument>> {
        let response = self
            .send(self.client.get(self.document_url(collection, id)))
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(error_for(response, &target(collection, id)).await);
        }

        let body: Value = response
            .json()
            .await
            .map_err(|error| Error::Remote(format!("invalid document payload: {error}")))?;
        match parse_document(id, body, None) {
            Some(RemoteEntry::Live(document)) => Ok(Some(document)),
            Some(RemoteEntry::Tombstone { .. }) => Ok(None),
            None => Err(Error::Remote(format!(
                "{}: document without revision",
                target(collection, id)
            ))),
        }
    }

    async fn put(
        &self,
        collection: Collection,
        document: &Document,
        revision: Option<&str>,
    ) -> Result<String> {
        let mut body = document.fields.clone();
        body.retain(|key, _| !key.starts_with('_'));
        if let Some(revision) = revision {
            body.insert("_rev".into(), Value::String(revision.to_string()));
        }
        write_document(self, collection, &document.id, &body).await
    }

    async fn mark_deleted(&self, collection: Collection, id: &str) -> Result<()> {
        let current = self
            .get(collection, id)
            .await?
            .ok_or_else(|| Error::NotFound(target(collection, id)))?;

        let mut body = Fields::new();
        body.insert("_id".into(), Value::String(id.to_string()));
        body.insert("_rev".into(), Value::String(current.revision));
        body.insert("_deleted".into(), Value::Bool(true));
        write_document(self, collection, id, &body).await?;
        Ok(())
    }

    async fn ping(&self) -> bool {
        let request = self
            .ping_client
            .get(format!("{}/", self.base_url))
            .basic_auth(&self.username, Some(&self.password));
        match request.send().await {
            Ok(response) => response.status().is_success(),
            Err(error) => {
                tracing::debug!("Remote ping failed: {error}");
                false
            }
        }
    }
}

async fn write_document(
    client: &CouchClient,
    collection: Collection,
    id: &str,
    body: &Fields,
) -> Result<String> {
    let response = client
        .send(client.client.put(client.document_url(collection, id)).json(body))
        .await?;
    if !response.status().is_success() {
        return Err(error_for(response, &target(collection, id)).await);
    }

    let written: WriteResponse = response
        .json()
        .await
        .map_err(|error| Error::Remote(format!("invalid write response: {error}")))?;
    Ok(written.rev)
}

fn target(collection: Collection, id: &str) -> String {
    format!("{collection}/{id}")
}

#[derive(Debug, Deserialize)]
struct WriteResponse {
    rev: String,
}

#[derive(Debug, Deserialize)]
struct AllDocsResponse {
    #[serde(default)]
    rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
struct AllDocsRow {
    id: Option<String>,
    value: Option<RowValue>,
    doc: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RowValue {
    rev: String,
    #[serde(default)]
    deleted: bool,
}

impl AllDocsRow {
    fn into_entry(self) -> Option<RemoteEntry> {
        let id = self.id?;
        if id.starts_with("_design/") {
            return None;
        }
        let value = self.value;

        if value.as_ref().is_some_and(|value| value.deleted) {
            let revision = value.map(|value| value.rev)?;
            return Some(RemoteEntry::Tombstone { id, revision });
        }

        match self.doc {
            Some(doc @ Value::Object(_)) => {
                parse_document(&id, doc, value.map(|value| value.rev))
            }
            _ => {
                tracing::debug!("Skipping _all_docs row {id} without a document");
                None
            }
        }
    }
}

/// Split a CouchDB document body into revision, deletion flag and domain fields.
fn parse_document(id: &str, body: Value, fallback_rev: Option<String>) -> Option<RemoteEntry> {
    let Value::Object(mut map) = body else {
        return None;
    };
    let revision = match map.remove("_rev") {
        Some(Value::String(revision)) => revision,
        _ => fallback_rev?,
    };
    let deleted = map.get("_deleted").and_then(Value::as_bool).unwrap_or(false);
    let id = match map.get("_id") {
        Some(Value::String(doc_id)) => doc_id.clone(),
        _ => id.to_string(),
    };

    if deleted {
        return Some(RemoteEntry::Tombstone { id, revision });
    }

    map.retain(|key, _| !key.starts_with('_'));
    Some(RemoteEntry::Live(RemoteDocument {
        id,
        revision,
        fields: map,
    }))
}

#[derive(Debug, Deserialize)]
struct CouchErrorBody {
    error: Option<String>,
    reason: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<CouchErrorBody>(body) {
        match (payload.error, payload.reason) {
            (Some(error), Some(reason)) => {
                return format!("{}: {} ({})", error.trim(), reason.trim(), status.as_u16());
            }
            (Some(message), None) | (None, Some(message)) => {
                return format!("{} ({})", message.trim(), status.as_u16());
            }
            (None, None) => {}
        }
    }

    let compact = compact_text(body);
    if compact.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", compact, status.as_u16())
    }
}

async fn error_for(response: Response, target: &str) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = parse_api_error(status, &body);

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::AuthFailed(message),
        StatusCode::NOT_FOUND => Error::NotFound(target.to_string()),
        StatusCode::CONFLICT => Error::Conflict(target.to_string()),
        _ => Error::Remote(format!("{target}: {message}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::header::AUTHORIZATION;
    use axum::http::HeaderMap;
    use axum::routing::get;
    use axum::{Json, Router};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    // base64("admin:admin")
    const ADMIN_AUTH: &str = "Basic YWRtaW46YWRtaW4=";

    struct StoredDoc {
        seq: u64,
        fields: Fields,
        deleted: bool,
    }

    impl StoredDoc {
        fn rev(&self) -> String {
            format!("{}-fake", self.seq)
        }
    }

    /// Just enough of CouchDB's HTTP API for the client.
    #[derive(Clone, Default)]
    struct FakeCouch {
        databases: Arc<Mutex<HashMap<String, HashMap<String, StoredDoc>>>>,
    }

    type Reply = (StatusCode, Json<Value>);

    fn reply(status: StatusCode, body: Value) -> Reply {
        (status, Json(body))
    }

    fn unauthorized(headers: &HeaderMap) -> Option<Reply> {
        let authorized =
            headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok()) == Some(ADMIN_AUTH);
        (!authorized).then(|| {
            reply(
                StatusCode::UNAUTHORIZED,
                json!({"error": "unauthorized", "reason": "Name or password is incorrect."}),
            )
        })
    }

    fn missing_db() -> Reply {
        reply(
            StatusCode::NOT_FOUND,
            json!({"error": "not_found", "reason": "Database does not exist."}),
        )
    }

    async fn welcome() -> Reply {
        reply(StatusCode::OK, json!({"couchdb": "Welcome"}))
    }

    async fn create_db(
        State(state): State<FakeCouch>,
        Path(db): Path<String>,
        headers: HeaderMap,
    ) -> Reply {
        if let Some(denied) = unauthorized(&headers) {
            return denied;
        }
        let mut databases = state.databases.lock().unwrap();
        if databases.contains_key(&db) {
            return reply(
                StatusCode::PRECONDITION_FAILED,
                json!({"error": "file_exists", "reason": "The database could not be created."}),
            );
        }
        databases.insert(db, HashMap::new());
        reply(StatusCode::CREATED, json!({"ok": true}))
    }

    async fn all_docs(
        State(state): State<FakeCouch>,
        Path(db): Path<String>,
        headers: HeaderMap,
    ) -> Reply {
        if let Some(denied) = unauthorized(&headers) {
            return denied;
        }
        let databases = state.databases.lock().unwrap();
        let Some(docs) = databases.get(&db) else {
            return missing_db();
        };
        let mut rows: Vec<Value> = docs
            .iter()
            .map(|(id, doc)| {
                if doc.deleted {
                    json!({"id": id, "key": id, "value": {"rev": doc.rev(), "deleted": true}, "doc": null})
                } else {
                    let mut body = doc.fields.clone();
                    body.insert("_id".into(), json!(id));
                    body.insert("_rev".into(), json!(doc.rev()));
                    json!({"id": id, "key": id, "value": {"rev": doc.rev()}, "doc": body})
                }
            })
            .collect();
        rows.push(json!({
            "id": "_design/views",
            "key": "_design/views",
            "value": {"rev": "1-x"},
            "doc": {"_id": "_design/views", "_rev": "1-x", "views": {}}
        }));
        reply(StatusCode::OK, json!({"total_rows": rows.len(), "rows": rows}))
    }

    async fn get_doc(
        State(state): State<FakeCouch>,
        Path((db, id)): Path<(String, String)>,
        headers: HeaderMap,
    ) -> Reply {
        if let Some(denied) = unauthorized(&headers) {
            return denied;
        }
        let databases = state.databases.lock().unwrap();
        let Some(docs) = databases.get(&db) else {
            return missing_db();
        };
        match docs.get(&id) {
            Some(doc) if !doc.deleted => {
                let mut body = doc.fields.clone();
                body.insert("_id".into(), json!(id));
                body.insert("_rev".into(), json!(doc.rev()));
                reply(StatusCode::OK, Value::Object(body))
            }
            Some(_) => reply(
                StatusCode::NOT_FOUND,
                json!({"error": "not_found", "reason": "deleted"}),
            ),
            None => reply(
                StatusCode::NOT_FOUND,
                json!({"error": "not_found", "reason": "missing"}),
            ),
        }
    }

    async fn put_doc(
        State(state): State<FakeCouch>,
        Path((db, id)): Path<(String, String)>,
        headers: HeaderMap,
        Json(mut body): Json<Fields>,
    ) -> Reply {
        if let Some(denied) = unauthorized(&headers) {
            return denied;
        }
        let mut databases = state.databases.lock().unwrap();
        let Some(docs) = databases.get_mut(&db) else {
            return missing_db();
        };

        let given_rev = body
            .remove("_rev")
            .and_then(|rev| rev.as_str().map(String::from));
        let deleted = body.get("_deleted").and_then(Value::as_bool).unwrap_or(false);
        body.retain(|key, _| !key.starts_with('_'));

        let seq = match docs.get(&id) {
            Some(existing) if existing.deleted && given_rev.is_none() => existing.seq + 1,
            Some(existing) if given_rev.as_deref() == Some(existing.rev().as_str()) => {
                existing.seq + 1
            }
            None if given_rev.is_none() => 1,
            _ => {
                return reply(
                    StatusCode::CONFLICT,
                    json!({"error": "conflict", "reason": "Document update conflict."}),
                )
            }
        };
        let stored = StoredDoc {
            seq,
            fields: body,
            deleted,
        };
        let rev = stored.rev();
        docs.insert(id.clone(), stored);
        reply(StatusCode::CREATED, json!({"ok": true, "id": id, "rev": rev}))
    }

    async fn spawn_fake() -> (String, FakeCouch) {
        let state = FakeCouch::default();
        let app = Router::new()
            .route("/", get(welcome))
            .route("/{db}", axum::routing::put(create_db))
            .route("/{db}/_all_docs", get(all_docs))
            .route("/{db}/{id}", get(get_doc).put(put_doc))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), state)
    }

    fn config(url: &str) -> RemoteConfig {
        RemoteConfig {
            url: url.to_string(),
            database: "offlinefirstdb".to_string(),
            username: "admin".to_string(),
            password: "admin".to_string(),
            request_timeout_secs: Some(5),
        }
    }

    fn business(id: &str, name: &str) -> Document {
        let mut fields = Fields::new();
        fields.insert("name".into(), json!(name));
        Document::new(id, fields)
    }

    #[test]
    fn debug_redacts_password() {
        let client = CouchClient::new(&config("http://localhost:5984")).unwrap();
        let debug = format!("{client:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("password: \"admin\""));
        assert_eq!(
            client.database_name(Collection::Articles),
            "offlinefirstdb_articles"
        );
    }

    #[test]
    fn api_errors_prefer_couch_reason() {
        let message = parse_api_error(
            StatusCode::BAD_REQUEST,
            r#"{"error":"bad_request","reason":"Invalid rev format"}"#,
        );
        assert_eq!(message, "bad_request: Invalid rev format (400)");
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, ""), "HTTP 502");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_database_lists_as_empty_until_created() {
        let (url, _state) = spawn_fake().await;
        let client = CouchClient::new(&config(&url)).unwrap();

        assert!(client.fetch_all(Collection::Businesses).await.unwrap().is_empty());
        client.ensure_collection(Collection::Businesses).await.unwrap();
        client.ensure_collection(Collection::Businesses).await.unwrap();
        assert!(client.fetch_all(Collection::Businesses).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn put_get_and_revision_conflicts() {
        let (url, _state) = spawn_fake().await;
        let client = CouchClient::new(&config(&url)).unwrap();
        client.ensure_collection(Collection::Businesses).await.unwrap();

        let first = client
            .put(Collection::Businesses, &business("b1", "Acme"), None)
            .await
            .unwrap();
        let fetched = client.get(Collection::Businesses, "b1").await.unwrap().unwrap();
        assert_eq!(fetched.revision, first);
        assert_eq!(fetched.fields.get("name"), Some(&json!("Acme")));

        let stale = client
            .put(Collection::Businesses, &business("b1", "Acme Ltd"), None)
            .await;
        assert!(matches!(stale, Err(Error::Conflict(_))));

        let second = client
            .put(Collection::Businesses, &business("b1", "Acme Ltd"), Some(&first))
            .await
            .unwrap();
        assert_ne!(first, second);
        assert!(client.get(Collection::Businesses, "zz").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn mark_deleted_leaves_a_tombstone() {
        let (url, _state) = spawn_fake().await;
        let client = CouchClient::new(&config(&url)).unwrap();
        client.ensure_collection(Collection::Businesses).await.unwrap();
        let deleted_rev = client
            .put(Collection::Businesses, &business("b1", "Acme"), None)
            .await
            .unwrap();
        let live_rev = client
            .put(Collection::Businesses, &business("b2", "Bolt Co"), None)
            .await
            .unwrap();

        client.mark_deleted(Collection::Businesses, "b1").await.unwrap();
        assert!(client.get(Collection::Businesses, "b1").await.unwrap().is_none());

        let mut entries = client.fetch_all(Collection::Businesses).await.unwrap();
        entries.sort_by(|a, b| a.id().cmp(b.id()));
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_tombstone());
        assert_eq!(entries[0].id(), "b1");
        assert_ne!(entries[0].revision(), deleted_rev);
        assert!(matches!(&entries[1], RemoteEntry::Live(doc) if doc.id == "b2"));
        assert_eq!(entries[1].revision(), live_rev);

        let missing = client.mark_deleted(Collection::Businesses, "nope").await;
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ids_are_percent_encoded() {
        let (url, _state) = spawn_fake().await;
        let client = CouchClient::new(&config(&url)).unwrap();
        client.ensure_collection(Collection::Businesses).await.unwrap();

        client
            .put(Collection::Businesses, &business("a b/c", "Spaced"), None)
            .await
            .unwrap();
        let fetched = client.get(Collection::Businesses, "a b/c").await.unwrap();
        assert_eq!(fetched.map(|doc| doc.id), Some("a b/c".to_string()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejected_credentials_are_auth_failures() {
        let (url, _state) = spawn_fake().await;
        let mut bad = config(&url);
        bad.password = "wrong".to_string();
        let client = CouchClient::new(&bad).unwrap();

        let result = client.fetch_all(Collection::Businesses).await;
        assert!(matches!(result, Err(Error::AuthFailed(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn closed_port_is_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = CouchClient::new(&config(&format!("http://{addr}"))).unwrap();
        let result = client.fetch_all(Collection::Businesses).await;
        assert!(matches!(result, Err(Error::Unreachable(_))));
        assert!(!client.ping().await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ping_gives_up_on_a_silent_server() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let silent = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let client = CouchClient::new(&config(&format!("http://{addr}"))).unwrap();
        let started = std::time::Instant::now();
        let reachable = client.ping().await;
        let elapsed = started.elapsed();
        silent.abort();

        assert!(!reachable);
        assert!(elapsed >= Duration::from_secs(2), "returned after {elapsed:?}");
        assert!(elapsed < Duration::from_secs(10), "returned after {elapsed:?}");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ping_reports_live_server() {
        let (url, _state) = spawn_fake().await;
        let client = CouchClient::new(&config(&url)).unwrap();
        assert!(client.ping().await);
    }
}

//! # 🚀 THE PUSH PIPELINE
//!
//! 🎬 COLD OPEN: INT. CLOUD STORAGE BUCKET, 3:47 AM
//!
//! The documents are ready. They've been normalized, prefixed, truncated and
//! coerced. All that's left is the handshake. Three phases, strictly in order,
//! no skipping, no shuffling, no "I'll just commit real quick first":
//!
//! ```text
//!   1. OPEN    POST  /organizations/{org}/files          → { uploadUri, fileId }
//!   2. UPLOAD  PUT   <uploadUri path>?<signed params>     (octet-stream, no bearer)
//!   3. COMMIT  PUT   /sources/{source}/documents/batch?fileId=...
//! ```
//!
//! The phase types enforce the order: a [`FileContainer`] only comes out of
//! phase 1, an `UploadedFile` only comes out of phase 2, and phase 3 eats the
//! `UploadedFile`. The compiler is the bouncer here.
//!
//! ⏳ Between upload and commit the blob may not be visible yet. We wait a short
//! settle delay, then commit, and if the remote says "what file?" (404/409/412)
//! or the wire drops, we retry the commit with exponential backoff. Commit is
//! idempotent on the remote side, so a premature one costs us a retry and nothing else.
//!
//! 💀 Any phase failure aborts the whole push. Nothing is retried across phases.
//! The caller reruns the entire handshake. 🦆

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::app_config::PushConfig;
use crate::documents::{DOCUMENT_ID_KEY, Document};
use crate::error::RemoteError;
use crate::remote::{RemoteBody, RemoteClient, RemoteRequest};

/// 🎬 The closed set of batch actions that actually make it end-to-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchAction {
    AddOrUpdate,
}

impl BatchAction {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchAction::AddOrUpdate => "addOrUpdate",
        }
    }
}

impl FromStr for BatchAction {
    type Err = RemoteError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "addOrUpdate" => Ok(BatchAction::AddOrUpdate),
            other => Err(RemoteError::validation(format!(
                "invalid or no batch action detected: '{other}'"
            ))),
        }
    }
}

/// 📦 The full batch as uploaded in phase 2.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchPayload {
    #[serde(rename = "addOrUpdate")]
    pub add_or_update: Vec<Value>,
    pub delete: Vec<Value>,
}

impl BatchPayload {
    pub fn len(&self) -> usize {
        self.add_or_update.len() + self.delete.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 🪣 Phase 1's answer: a pre-signed upload target and the id to commit later.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FileContainer {
    #[serde(rename = "uploadUri")]
    pub upload_uri: String,
    #[serde(rename = "fileId")]
    pub file_id: String,
}

/// ✅ Proof that phase 2 finished. Only `upload` can make one.
#[derive(Debug)]
struct UploadedFile {
    file_id: String,
}

/// 🚀 Pushes batches into one source using the three-phase handshake.
#[derive(Debug, Clone)]
pub struct PushPipeline<'a> {
    client: &'a RemoteClient,
    config: PushConfig,
}

impl<'a> PushPipeline<'a> {
    pub fn new(client: &'a RemoteClient, config: PushConfig) -> Self {
        Self { client, config }
    }

    /// 📦 Push documents as `addOrUpdate` operations.
    ///
    /// Documents carrying a `documentId` become `{documentId, data, permissions: {}}`;
    /// documents without one ride along unchanged.
    pub async fn save_objects(&self, documents: Vec<Document>) -> Result<RemoteBody, RemoteError> {
        let payload = BatchPayload {
            add_or_update: documents
                .into_iter()
                .map(|document| package_operation(document.into_object(), DOCUMENT_ID_KEY))
                .collect(),
            delete: Vec::new(),
        };
        self.batch(payload).await
    }

    /// 🎬 Lower-level variant: every object names its own action under `action_key`.
    ///
    /// Every action is validated before anything touches the network.
    pub async fn batch_objects(
        &self,
        objects: Vec<Map<String, Value>>,
        id_key: &str,
        action_key: &str,
    ) -> Result<RemoteBody, RemoteError> {
        let mut payload = BatchPayload::default();

        // 🚦 one bad action fails the whole batch before a single byte is sent
        for mut object in objects {
            let action = object
                .remove(action_key)
                .as_ref()
                .and_then(Value::as_str)
                .unwrap_or_default()
                .parse::<BatchAction>()?;

            match action {
                BatchAction::AddOrUpdate => {
                    payload.add_or_update.push(package_operation(object, id_key));
                }
            }
        }

        self.batch(payload).await
    }

    /// 🔄 The handshake. Open, upload, commit. In that order, every time.
    pub async fn batch(&self, payload: BatchPayload) -> Result<RemoteBody, RemoteError> {
        info!("🚀 pushing a batch of {} operation(s)", payload.len());

        let container = self.open().await?;
        // 🔒 no UploadedFile, no commit. the types keep the order honest.
        let uploaded = self.upload(container, &payload).await?;
        let committed = self.commit(uploaded).await?;

        debug!("✅ batch committed, the remote is ingesting it asynchronously");
        Ok(committed)
    }

    /// 🗑️ Ask the remote to forget everything indexed before now.
    pub async fn clear_index(&self) -> Result<RemoteBody, RemoteError> {
        let ordering_id = next_ordering_id();
        info!("🗑️ clearing every document older than ordering id {}", ordering_id);
        self.client
            .request(
                RemoteRequest::new(Method::DELETE, self.client.context().older_than_url())
                    .param("orderingId", ordering_id),
            )
            .await
    }

    async fn open(&self) -> Result<FileContainer, RemoteError> {
        let body = self
            .client
            .request(RemoteRequest::new(Method::POST, self.client.context().files_url()))
            .await?;
        let container: FileContainer = serde_json::from_value(body.into_json())
            .map_err(|e| RemoteError::Decode(format!("file container: {e}")))?;
        debug!("📦 phase 1 done: opened file container {}", container.file_id);
        Ok(container)
    }

    async fn upload(
        &self,
        container: FileContainer,
        payload: &BatchPayload,
    ) -> Result<UploadedFile, RemoteError> {
        // ✍️ the signature lives in the query string, keep it byte for byte
        let (target, signed_params) = split_upload_uri(&container.upload_uri)?;
        let body = serde_json::to_value(payload)
            .map_err(|e| RemoteError::validation(format!("could not encode batch: {e}")))?;

        self.client
            .request(
                RemoteRequest::new(Method::PUT, target)
                    .params(signed_params)
                    .body(body)
                    .blob_upload(),
            )
            .await?;

        debug!("📤 phase 2 done: uploaded {} operation(s)", payload.len());
        Ok(UploadedFile {
            file_id: container.file_id,
        })
    }

    async fn commit(&self, uploaded: UploadedFile) -> Result<RemoteBody, RemoteError> {
        // 😴 give the storage side a moment to make the blob visible
        let settle = self.config.settle_delay();
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }

        let max_attempts = self.config.commit_max_attempts.max(1);
        // -- 🔁 same fileId every time, the upload is not repeated
        let mut attempt: u32 = 1;
        loop {
            let outcome = self
                .client
                .request(
                    RemoteRequest::new(Method::PUT, self.client.context().batch_commit_url())
                        .param("fileId", uploaded.file_id.as_str()),
                )
                .await;

            match outcome {
                Ok(body) => {
                    debug!("📬 phase 3 done on attempt {}", attempt);
                    return Ok(body);
                }
                Err(err) if attempt < max_attempts && blob_not_ready_yet(&err) => {
                    let backoff = self.config.commit_backoff(attempt);
                    warn!(
                        "⏳ commit attempt {}/{} for file {} failed ({}), retrying in {:?}",
                        attempt, max_attempts, uploaded.file_id, err, backoff
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                // 💀 out of attempts, or a failure no amount of waiting fixes
                Err(err) => return Err(err),
            }
        }
    }
}

/// 📦 `{documentId, data, permissions}` when the identifier is there, the object itself when it isn't.
fn package_operation(mut object: Map<String, Value>, id_key: &str) -> Value {
    let Some(identifier) = object.get(id_key).and_then(identifier_text) else {
        return Value::Object(object);
    };

    // 🧹 the identifier moves up a level, it does not stay in data
    object.remove(id_key);
    object.remove(DOCUMENT_ID_KEY);

    let mut operation = Map::new();
    operation.insert(DOCUMENT_ID_KEY.to_string(), Value::String(identifier));
    operation.insert("data".to_string(), Value::Object(object));
    operation.insert("permissions".to_string(), Value::Object(Map::new()));
    Value::Object(operation)
}

fn identifier_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// 🔪 Split a pre-signed URL into (scheme+host+path, signed query params).
fn split_upload_uri(upload_uri: &str) -> Result<(String, Vec<(String, Value)>), RemoteError> {
    let mut url = Url::parse(upload_uri)
        .map_err(|e| RemoteError::Decode(format!("upload uri '{upload_uri}': {e}")))?;

    let params = url
        .query_pairs()
        .map(|(key, value)| (key.into_owned(), Value::String(value.into_owned())))
        .collect();

    url.set_query(None);
    url.set_fragment(None);
    Ok((url.to_string(), params))
}

/// ⏳ Failures that smell like "the blob isn't visible yet" or "the wire hiccuped".
fn blob_not_ready_yet(err: &RemoteError) -> bool {
    // 🕳️ an Unreachable reports its hosts' status and transience, so it lands here too
    err.is_transient() || matches!(err.status(), Some(404 | 409 | 412))
}

static LAST_ORDERING_ID: AtomicU64 = AtomicU64::new(0);

/// 🕰️ Current time in milliseconds, nudged forward so it always beats the previous one.
fn next_ordering_id() -> u64 {
    let now = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default();
    let mut previous = LAST_ORDERING_ID.load(Ordering::Relaxed);
    loop {
        let candidate = now.max(previous + 1);
        match LAST_ORDERING_ID.compare_exchange_weak(
            previous,
            candidate,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return candidate,
            Err(actual) => previous = actual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_config::RemoteConfig;
    use serde_json::json;
    use wiremock::matchers::{any, body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn the_client_for(server: &MockServer) -> RemoteClient {
        let mut config = RemoteConfig::new("acme", "acme-src", "the-key");
        config.push_base_url = server.uri();
        RemoteClient::new(&config).expect("💀 test client should build")
    }

    fn the_impatient_config() -> PushConfig {
        PushConfig {
            settle_delay_ms: 0,
            commit_max_attempts: 3,
            commit_initial_backoff_ms: 1,
            commit_max_backoff_ms: 5,
        }
    }

    async fn mount_open(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/organizations/acme/files"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "uploadUri": format!("{}/bucket/blob-1?X-Amz-Expires=300&X-Amz-Signature=s%2Fig", server.uri()),
                "fileId": "file-1"
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    fn the_documents() -> Vec<Document> {
        (1..=3)
            .map(|n| {
                let mut object = Map::new();
                object.insert("documentId".to_string(), json!(format!("https://site/node/{n}")));
                object.insert("search_api_id".to_string(), json!(format!("entity:node/{n}:en")));
                Document::from_object(object)
            })
            .collect()
    }

    #[test]
    fn the_one_where_only_add_or_update_gets_past_the_door() {
        assert_eq!("addOrUpdate".parse::<BatchAction>().ok(), Some(BatchAction::AddOrUpdate));
        assert!(matches!("delete".parse::<BatchAction>(), Err(RemoteError::Validation(_))));
        assert!(matches!("".parse::<BatchAction>(), Err(RemoteError::Validation(_))));
    }

    #[test]
    fn the_one_where_documents_get_wrapped_in_data_and_permissions() {
        let mut object = Map::new();
        object.insert("documentId".to_string(), json!("https://site/about"));
        object.insert("cvx_title".to_string(), json!("About"));

        assert_eq!(
            package_operation(object, DOCUMENT_ID_KEY),
            json!({
                "documentId": "https://site/about",
                "data": {"cvx_title": "About"},
                "permissions": {}
            })
        );
    }

    #[test]
    fn the_one_where_a_missing_identifier_is_tolerated() {
        let mut object = Map::new();
        object.insert("cvx_title".to_string(), json!("Nameless"));
        assert_eq!(package_operation(object, DOCUMENT_ID_KEY), json!({"cvx_title": "Nameless"}));
    }

    #[test]
    fn the_one_where_the_presigned_url_is_split_in_two() -> anyhow::Result<()> {
        let (target, params) = split_upload_uri(
            "https://bucket.s3.amazonaws.com/path/to/blob?X-Amz-Expires=300&X-Amz-Signature=s%2Fig",
        )?;
        assert_eq!(target, "https://bucket.s3.amazonaws.com/path/to/blob");
        assert_eq!(
            params,
            vec![
                ("X-Amz-Expires".to_string(), json!("300")),
                ("X-Amz-Signature".to_string(), json!("s/ig")),
            ]
        );
        Ok(())
    }

    #[test]
    fn the_one_where_ordering_ids_only_go_up() {
        let first = next_ordering_id();
        let second = next_ordering_id();
        let third = next_ordering_id();
        assert!(second > first);
        assert!(third > second);
    }

    #[tokio::test]
    async fn the_one_where_three_documents_take_exactly_three_calls_in_order() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        mount_open(&server).await;
        Mock::given(method("PUT"))
            .and(path("/bucket/blob-1"))
            .and(query_param("X-Amz-Signature", "s/ig"))
            .and(query_param("X-Amz-Expires", "300"))
            .and(header("Content-Type", "application/octet-stream"))
            .and(body_json(json!({
                "addOrUpdate": [
                    {"documentId": "https://site/node/1", "data": {"search_api_id": "entity:node/1:en"}, "permissions": {}},
                    {"documentId": "https://site/node/2", "data": {"search_api_id": "entity:node/2:en"}, "permissions": {}},
                    {"documentId": "https://site/node/3", "data": {"search_api_id": "entity:node/3:en"}, "permissions": {}},
                ],
                "delete": []
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/organizations/acme/sources/acme-src/documents/batch"))
            .and(query_param("fileId", "file-1"))
            .and(header("Authorization", "Bearer the-key"))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({"orderingId": 1})))
            .expect(1)
            .mount(&server)
            .await;

        let client = the_client_for(&server);
        let outcome = PushPipeline::new(&client, the_impatient_config())
            .save_objects(the_documents())
            .await?;
        assert_eq!(outcome, RemoteBody::Json(json!({"orderingId": 1})));

        let received = server.received_requests().await.unwrap_or_default();
        let the_sequence: Vec<(String, String)> = received
            .iter()
            .map(|r| (r.method.to_string(), r.url.path().to_string()))
            .collect();
        assert_eq!(
            the_sequence,
            vec![
                ("POST".to_string(), "/organizations/acme/files".to_string()),
                ("PUT".to_string(), "/bucket/blob-1".to_string()),
                ("PUT".to_string(), "/organizations/acme/sources/acme-src/documents/batch".to_string()),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_failed_upload_never_reaches_commit() {
        let server = MockServer::start().await;
        mount_open(&server).await;
        Mock::given(method("PUT"))
            .and(path("/bucket/blob-1"))
            .respond_with(ResponseTemplate::new(403).set_body_string("<Error>SignatureDoesNotMatch</Error>"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/organizations/acme/sources/acme-src/documents/batch"))
            .respond_with(ResponseTemplate::new(202))
            .expect(0)
            .mount(&server)
            .await;

        let client = the_client_for(&server);
        let err = PushPipeline::new(&client, the_impatient_config())
            .save_objects(the_documents())
            .await
            .expect_err("a rejected upload must abort the push");
        assert_eq!(err.status(), Some(403));
    }

    #[tokio::test]
    async fn the_one_where_commit_waits_for_the_blob_to_show_up() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        mount_open(&server).await;
        Mock::given(method("PUT"))
            .and(path("/bucket/blob-1"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/organizations/acme/sources/acme-src/documents/batch"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "File not found"})))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/organizations/acme/sources/acme-src/documents/batch"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let client = the_client_for(&server);
        PushPipeline::new(&client, the_impatient_config())
            .save_objects(the_documents())
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_commit_gives_up_after_the_last_attempt() {
        let server = MockServer::start().await;
        mount_open(&server).await;
        Mock::given(method("PUT"))
            .and(path("/bucket/blob-1"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/organizations/acme/sources/acme-src/documents/batch"))
            .respond_with(ResponseTemplate::new(404))
            .expect(3)
            .mount(&server)
            .await;

        let client = the_client_for(&server);
        let err = PushPipeline::new(&client, the_impatient_config())
            .save_objects(the_documents())
            .await
            .expect_err("three strikes and the commit is out");
        assert_eq!(err.status(), Some(404));
    }

    #[tokio::test]
    async fn the_one_where_a_bad_action_is_caught_before_any_network_call() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let mut good = Map::new();
        good.insert("objectAction".to_string(), json!("addOrUpdate"));
        good.insert("objectID".to_string(), json!("a"));
        let mut bad = Map::new();
        bad.insert("objectAction".to_string(), json!("partialUpdate"));
        bad.insert("objectID".to_string(), json!("b"));

        let client = the_client_for(&server);
        let err = PushPipeline::new(&client, the_impatient_config())
            .batch_objects(vec![good, bad], "objectID", "objectAction")
            .await
            .expect_err("partialUpdate is not on the list");
        assert!(matches!(err, RemoteError::Validation(_)));
    }

    #[tokio::test]
    async fn the_one_where_batch_objects_strip_the_action_and_copy_the_id() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        mount_open(&server).await;
        Mock::given(method("PUT"))
            .and(path("/bucket/blob-1"))
            .and(body_json(json!({
                "addOrUpdate": [
                    {"documentId": "42", "data": {"title": "x"}, "permissions": {}}
                ],
                "delete": []
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/organizations/acme/sources/acme-src/documents/batch"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let mut object = Map::new();
        object.insert("objectAction".to_string(), json!("addOrUpdate"));
        object.insert("objectID".to_string(), json!(42));
        object.insert("title".to_string(), json!("x"));

        let client = the_client_for(&server);
        PushPipeline::new(&client, the_impatient_config())
            .batch_objects(vec![object], "objectID", "objectAction")
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_clear_index_sends_a_fresh_ordering_id_every_time() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/organizations/acme/sources/acme-src/documents/olderthan"))
            .respond_with(ResponseTemplate::new(202))
            .expect(2)
            .mount(&server)
            .await;

        let client = the_client_for(&server);
        let pipeline = PushPipeline::new(&client, the_impatient_config());
        let before = u64::try_from(chrono::Utc::now().timestamp_millis())?;
        pipeline.clear_index().await?;
        pipeline.clear_index().await?;

        let ordering_ids: Vec<u64> = server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter_map(|r| {
                r.url
                    .query_pairs()
                    .find(|(k, _)| k == "orderingId")
                    .and_then(|(_, v)| v.parse().ok())
            })
            .collect();

        assert_eq!(ordering_ids.len(), 2);
        assert!(ordering_ids[0] >= before);
        assert!(ordering_ids[1] > ordering_ids[0]);
        Ok(())
    }
}

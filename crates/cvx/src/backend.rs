//! 🎛️ Backend: the one object callers actually hold.
//!
//! It owns the [`RemoteClient`] and the config, and hands out short-lived
//! pipelines, schema managers and search engines that borrow it. Index maintenance
//! errors bubble up with context attached; search errors follow `search.fail_open`.
//!
//! 🧠 `DocumentAlter` hooks run after normalization and before the push, in
//! registration order. They get the whole chunk plus the items it came from. 🦆

use anyhow::Context;
use tracing::info;

use crate::app_config::AppConfig;
use crate::documents::{Document, DocumentNormalizer, IndexableItem};
use crate::pipeline::PushPipeline;
use crate::query::{QueryCompiler, SearchQuery};
use crate::remote::RemoteClient;
use crate::schema::{FieldDescriptor, FieldSchemaManager};
use crate::search::{SearchEngine, SearchResults};

/// 🪝 Last chance to touch documents before they leave the building.
///
/// `documents[i]` was built from `items[i]`.
pub trait DocumentAlter: Send + Sync {
    fn alter(&self, documents: &mut [Document], items: &[IndexableItem]);
}

impl<F> DocumentAlter for F
where
    F: Fn(&mut [Document], &[IndexableItem]) + Send + Sync,
{
    fn alter(&self, documents: &mut [Document], items: &[IndexableItem]) {
        self(documents, items)
    }
}

pub struct Backend {
    client: RemoteClient,
    config: AppConfig,
    normalizer: DocumentNormalizer,
    alters: Vec<Box<dyn DocumentAlter>>,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("client", &self.client)
            .field("alters", &self.alters.len())
            .finish_non_exhaustive()
    }
}

impl Backend {
    /// 🔌 Validate credentials and build the client. No network traffic yet.
    pub fn connect(config: AppConfig) -> anyhow::Result<Self> {
        let client = RemoteClient::new(&config.remote)
            .context("💀 Backend could not connect: the remote client refused to start")?;
        let normalizer = DocumentNormalizer::new(&config.indexing);
        Ok(Self {
            client,
            config,
            normalizer,
            alters: Vec::new(),
        })
    }

    pub fn with_alter(mut self, alter: impl DocumentAlter + 'static) -> Self {
        self.alters.push(Box::new(alter));
        self
    }

    pub fn client(&self) -> &RemoteClient {
        &self.client
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn pipeline(&self) -> PushPipeline<'_> {
        PushPipeline::new(&self.client, self.config.push.clone())
    }

    pub fn schema(&self) -> FieldSchemaManager<'_> {
        FieldSchemaManager::new(&self.client)
    }

    /// 🏗️ Make sure the back-reference field exists. Safe to run on every deploy.
    pub async fn provision(&self) -> anyhow::Result<()> {
        let id_field = FieldDescriptor::new(
            self.config.indexing.id_field.as_str(),
            "Search API ID field",
            "string",
        );
        self.schema()
            .ensure_fields(std::slice::from_ref(&id_field))
            .await
            .with_context(|| format!("💀 Could not provision the '{}' field", id_field.name))?;
        info!("🏗️ field '{}' is provisioned", id_field.name);
        Ok(())
    }

    /// 📦 Normalize, alter, push. Returns the ids of every item that was sent.
    ///
    /// Items are pushed in chunks of `indexing.max_batch_size_docs`. A failed chunk stops
    /// the run; chunks already committed stay committed.
    pub async fn index_items(&self, items: &[IndexableItem]) -> anyhow::Result<Vec<String>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let pipeline = self.pipeline();
        // 🧱 a zero chunk size would never make progress
        let chunk_size = self.config.indexing.max_batch_size_docs.max(1);
        let mut indexed = Vec::with_capacity(items.len());

        for (chunk_number, chunk) in items.chunks(chunk_size).enumerate() {
            let mut documents: Vec<Document> =
                chunk.iter().map(|item| self.normalizer.normalize(item)).collect();
            // 🪝 hooks in registration order, each sees the previous one's edits
            for alter in &self.alters {
                alter.alter(&mut documents, chunk);
            }

            pipeline.save_objects(documents).await.with_context(|| {
                format!(
                    "💀 Push of chunk #{} ({} item(s)) failed. Rerun the indexing; the whole handshake starts over.",
                    chunk_number + 1,
                    chunk.len()
                )
            })?;

            // ✅ only committed chunks count as indexed
            indexed.extend(chunk.iter().map(|item| item.item_id.clone()));
        }

        info!("📦 indexed {} item(s)", indexed.len());
        Ok(indexed)
    }

    /// 🗑️ Remove everything from the source.
    pub async fn delete_all_items(&self) -> anyhow::Result<()> {
        self.pipeline()
            .clear_index()
            .await
            .context("💀 Could not clear the index")?;
        Ok(())
    }

    /// 🔍 Compile, execute, decompile.
    pub async fn search(&self, query: &SearchQuery) -> anyhow::Result<SearchResults> {
        let schema = self.schema();
        let engine = SearchEngine::new(
            &self.client,
            &schema,
            QueryCompiler::from_config(&self.config.indexing, &self.config.search),
            self.config.indexing.id_field.as_str(),
        )
        .fail_open(self.config.search.fail_open);

        let results = engine.search(query).await.context("💀 Search failed")?;
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_config::{IndexingConfig, PushConfig, RemoteConfig, SearchConfig};
    use crate::documents::ItemField;
    use serde_json::{Value, json};
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn the_config_for(server: &MockServer) -> AppConfig {
        let mut remote = RemoteConfig::new("acme", "acme-src", "the-key");
        remote.push_base_url = server.uri();
        remote.platform_base_url = server.uri();
        AppConfig {
            remote,
            indexing: IndexingConfig {
                base_url: "https://www.example.com".to_string(),
                max_batch_size_docs: 2,
                ..IndexingConfig::default()
            },
            push: PushConfig {
                settle_delay_ms: 0,
                commit_max_attempts: 2,
                commit_initial_backoff_ms: 1,
                commit_max_backoff_ms: 2,
            },
            search: SearchConfig::default(),
        }
    }

    async fn mount_the_push_protocol(server: &MockServer, pushes: u64) {
        Mock::given(method("POST"))
            .and(path("/organizations/acme/files"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "uploadUri": format!("{}/bucket/blob?sig=1", server.uri()),
                "fileId": "file-1"
            })))
            .expect(pushes)
            .mount(server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/bucket/blob"))
            .respond_with(ResponseTemplate::new(200))
            .expect(pushes)
            .mount(server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/organizations/acme/sources/acme-src/documents/batch"))
            .respond_with(ResponseTemplate::new(202))
            .expect(pushes)
            .mount(server)
            .await;
    }

    fn the_item(n: u32) -> IndexableItem {
        IndexableItem {
            item_id: format!("entity:node/{n}:en"),
            path: None,
            entity_id: Some(n.to_string()),
            fields: vec![ItemField::new("title", "text", vec![json!(format!("Node {n}"))])],
        }
    }

    #[tokio::test]
    async fn the_one_where_five_items_ride_in_three_chunks() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        mount_the_push_protocol(&server, 3).await;

        let backend = Backend::connect(the_config_for(&server))?;
        let items: Vec<IndexableItem> = (1..=5).map(the_item).collect();
        let indexed = backend.index_items(&items).await?;

        assert_eq!(
            indexed,
            (1..=5).map(|n| format!("entity:node/{n}:en")).collect::<Vec<_>>()
        );
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_nothing_to_index_means_no_calls() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        mount_the_push_protocol(&server, 0).await;

        let backend = Backend::connect(the_config_for(&server))?;
        assert!(backend.index_items(&[]).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_alter_hook_gets_the_last_word() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        mount_the_push_protocol(&server, 1).await;

        let backend = Backend::connect(the_config_for(&server))?.with_alter(
            |documents: &mut [Document], items: &[IndexableItem]| {
                for (document, item) in documents.iter_mut().zip(items) {
                    document.insert("cvx_origin", Value::String(format!("altered:{}", item.item_id)));
                }
            },
        );
        backend.index_items(&[the_item(9)]).await?;

        let uploads = server.received_requests().await.unwrap_or_default();
        let upload = uploads
            .iter()
            .find(|r| r.url.path() == "/bucket/blob")
            .expect("the upload should have happened");
        let payload: Value = serde_json::from_slice(&upload.body)?;
        assert_eq!(
            payload["addOrUpdate"][0],
            json!({
                "documentId": "https://www.example.com/node/9",
                "data": {
                    "documentType": "WebPage",
                    "sourceType": "Push",
                    "search_api_id": "entity:node/9:en",
                    "cvx_title": "Node 9",
                    "cvx_origin": "altered:entity:node/9:en"
                },
                "permissions": {}
            })
        );
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_failed_push_carries_context() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/organizations/acme/files"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "bad key"})))
            .mount(&server)
            .await;

        let backend = Backend::connect(the_config_for(&server))?;
        let err = backend
            .index_items(&[the_item(1)])
            .await
            .expect_err("a 401 must not be swallowed");
        assert!(err.to_string().contains("chunk #1"));
        assert!(err.chain().any(|cause| cause.to_string().contains("bad key")));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_provision_shrugs_at_an_existing_field() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/organizations/acme/indexes/fields/batch/create"))
            .respond_with(ResponseTemplate::new(412).set_body_json(json!({"message": "already exists"})))
            .expect(1)
            .mount(&server)
            .await;

        Backend::connect(the_config_for(&server))?.provision().await?;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_delete_all_sends_olderthan() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path_regex(r"^/organizations/acme/sources/acme-src/documents/olderthan$"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        Backend::connect(the_config_for(&server))?.delete_all_items().await?;
        Ok(())
    }

    #[test]
    fn the_one_where_a_blank_key_never_connects() {
        let config = AppConfig {
            remote: RemoteConfig::new("acme", "acme-src", ""),
            indexing: IndexingConfig::default(),
            push: PushConfig::default(),
            search: SearchConfig::default(),
        };
        assert!(Backend::connect(config).is_err());
    }
}

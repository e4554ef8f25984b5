//! 🔧 App Configuration: the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." (every developer, 3am) 🦆
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of.
//!
//! 🧠 Knowledge graph:
//! - `RemoteConfig` → credentials + endpoints, becomes a `ClientContext`
//! - `IndexingConfig` → field prefix, back-reference field, document identity
//! - `PushConfig` → commit readiness knobs for the three-phase push
//! - `SearchConfig` → fail-open switch, facet defaults, source scoping

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

/// 📦 The AppConfig: one struct to rule them all, one struct to find them,
/// one struct to bring them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// 📡 Who we are and where the remote lives. The only section without defaults.
    pub remote: RemoteConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

/// 📡 Credentials and endpoints for the remote search service.
///
/// `organization_id`, `source_id` and `api_key` must be non-empty; that is checked
/// when the `ClientContext` is built, not here, so a config file can be loaded and
/// inspected even when it is half-written. Like a draft email. Don't hit send yet.
#[derive(Deserialize, Clone)]
pub struct RemoteConfig {
    #[serde(default)]
    pub organization_id: String,
    #[serde(default)]
    pub source_id: String,
    #[serde(default)]
    pub api_key: String,
    /// 🔧 Explicit push host. When absent it is derived from organization + source.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_push_base_url")]
    pub push_base_url: String,
    #[serde(default = "default_platform_base_url")]
    pub platform_base_url: String,
    /// 📎 Extra headers merged over the defaults on every non-blob request.
    #[serde(default)]
    pub extra_headers: BTreeMap<String, String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

// 🎭 manual Debug so the api key never shows up in a `{:#?}` log line.
// Secrets in logs are how incident reports get a second page.
impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("organization_id", &self.organization_id)
            .field("source_id", &self.source_id)
            .field("api_key", &"--- hidden ---")
            .field("host", &self.host)
            .field("push_base_url", &self.push_base_url)
            .field("platform_base_url", &self.platform_base_url)
            .field("extra_headers", &self.extra_headers.keys().collect::<Vec<_>>())
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

fn default_push_base_url() -> String {
    "https://push.cloud.coveo.com/v1".to_string()
}

fn default_platform_base_url() -> String {
    "https://platform.cloud.coveo.com/rest".to_string()
}

// 📡 10s to shake hands, 30s to finish talking. We will wait, but not forever.
fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl RemoteConfig {
    /// 🏗️ Minimal config for the three required credentials, everything else defaulted.
    pub fn new(
        organization_id: impl Into<String>,
        source_id: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            organization_id: organization_id.into(),
            source_id: source_id.into(),
            api_key: api_key.into(),
            host: None,
            push_base_url: default_push_base_url(),
            platform_base_url: default_platform_base_url(),
            extra_headers: BTreeMap::new(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// 📦 How generic items become indexable documents.
#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    /// 🏷️ Prepended to every indexed field name. Keeps our fields out of everyone else's way.
    #[serde(default = "default_field_prefix")]
    pub field_prefix: String,
    /// 🔙 The back-reference field carried by every document.
    #[serde(default = "default_id_field")]
    pub id_field: String,
    #[serde(default = "default_document_type")]
    pub document_type: String,
    #[serde(default = "default_source_type")]
    pub source_type: String,
    /// 🌐 Scheme + host prepended to an item's path to build its `documentId`.
    #[serde(default)]
    pub base_url: String,
    /// 📦 Items per push. Bigger sets are split into several three-phase pushes.
    #[serde(default = "default_max_batch_size_docs")]
    pub max_batch_size_docs: usize,
}

fn default_field_prefix() -> String {
    "cvx_".to_string()
}

fn default_id_field() -> String {
    "search_api_id".to_string()
}

fn default_document_type() -> String {
    "WebPage".to_string()
}

fn default_source_type() -> String {
    "Push".to_string()
}

// 📦 1000 docs: a round number, chosen by staring at it until it felt right.
fn default_max_batch_size_docs() -> usize {
    1000
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            field_prefix: default_field_prefix(),
            id_field: default_id_field(),
            document_type: default_document_type(),
            source_type: default_source_type(),
            base_url: String::new(),
            max_batch_size_docs: default_max_batch_size_docs(),
        }
    }
}

/// ⏳ Commit readiness knobs.
///
/// After the upload PUT returns, the blob is not always visible to the ingestion
/// service yet. We wait `settle_delay_ms`, then commit, and retry the commit with
/// exponential backoff when the remote says it can't see the file (yet).
#[derive(Debug, Deserialize, Clone)]
pub struct PushConfig {
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_commit_max_attempts")]
    pub commit_max_attempts: u32,
    #[serde(default = "default_commit_initial_backoff_ms")]
    pub commit_initial_backoff_ms: u64,
    #[serde(default = "default_commit_max_backoff_ms")]
    pub commit_max_backoff_ms: u64,
}

fn default_settle_delay_ms() -> u64 {
    500
}

fn default_commit_max_attempts() -> u32 {
    5
}

fn default_commit_initial_backoff_ms() -> u64 {
    250
}

fn default_commit_max_backoff_ms() -> u64 {
    4000
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            commit_max_attempts: default_commit_max_attempts(),
            commit_initial_backoff_ms: default_commit_initial_backoff_ms(),
            commit_max_backoff_ms: default_commit_max_backoff_ms(),
        }
    }
}

impl PushConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// 🔄 Backoff before commit attempt number `attempt` (1-based retries), capped.
    pub fn commit_backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        let millis = self
            .commit_initial_backoff_ms
            .saturating_mul(factor)
            .min(self.commit_max_backoff_ms);
        Duration::from_millis(millis)
    }
}

/// 🔍 Search behavior.
#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    /// 🛟 When true, any search failure degrades to an empty result set.
    #[serde(default = "default_fail_open")]
    pub fail_open: bool,
    #[serde(default = "default_facet_limit")]
    pub default_facet_limit: u32,
    /// 🎯 The generic field name that means "sort by relevance".
    #[serde(default = "default_relevance_field")]
    pub relevance_field: String,
    /// 📎 When set, every query is scoped to this source with a fixed advanced-query fragment.
    #[serde(default)]
    pub source_name: Option<String>,
}

fn default_fail_open() -> bool {
    true
}

fn default_facet_limit() -> u32 {
    100
}

fn default_relevance_field() -> String {
    "search_api_relevance".to_string()
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            fail_open: default_fail_open(),
            default_facet_limit: default_facet_limit(),
            relevance_field: default_relevance_field(),
            source_name: None,
        }
    }
}

/// 🚀 Load the config: from a file, from env vars, or from the sheer power of hoping.
///
/// 🔧 Merges environment variables (CVX_*, nested with `__`) with an optional TOML file.
///   - `config_file_name` is None  → env vars only.
///   - `config_file_name` is Some  → env vars + TOML file, merged. TOML wins on conflicts.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    // 🏗️ Env vars are the base layer. CVX_REMOTE__API_KEY → remote.api_key.
    let config = Figment::new().merge(Env::prefixed("CVX_").split("__"));

    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (CVX_*). \
             The file exists in our hearts, but apparently not on disk.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (CVX_*). \
                 No file was provided, this one's all on the environment. Classic."
            .to_string(),
    };

    config.extract().context(context_msg)
}

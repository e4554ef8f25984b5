//! 🪪 ClientContext: the passport every remote call travels with.
//!
//! Built once, validated once, never mutated. If any of the three credentials is
//! empty we refuse to be born, long before a single packet gets embarrassed on the wire.

use std::collections::BTreeMap;

use crate::app_config::RemoteConfig;
use crate::error::RemoteError;

/// 🔒 Credentials plus resolved endpoints. Shared read-only by everything built from a client.
#[derive(Clone)]
pub struct ClientContext {
    organization_id: String,
    source_id: String,
    api_key: String,
    host: String,
    push_base_url: String,
    platform_base_url: String,
    extra_headers: BTreeMap<String, String>,
}

// 🎭 manual Debug: the api key is on a need-to-know basis and Debug does not need to know.
impl std::fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientContext")
            .field("organization_id", &self.organization_id)
            .field("source_id", &self.source_id)
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

impl ClientContext {
    /// 🚀 Validate and freeze the remote config.
    ///
    /// # Errors
    /// 💀 `RemoteError::Validation` when organization id, source id or api key is blank.
    pub fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
        require("an organization id", &config.organization_id)?;
        require("a source id", &config.source_id)?;
        require("an api key", &config.api_key)?;

        let push_base_url = config.push_base_url.trim_end_matches('/').to_string();
        let host = match config.host.as_deref().map(str::trim) {
            Some(explicit) if !explicit.is_empty() => explicit.to_string(),
            // 🧭 derived deterministically: same org + source, same host. Every time.
            _ => format!(
                "{}/organizations/{}/sources/{}/",
                push_base_url, config.organization_id, config.source_id
            ),
        };

        Ok(Self {
            organization_id: config.organization_id.clone(),
            source_id: config.source_id.clone(),
            api_key: config.api_key.clone(),
            host,
            push_base_url,
            platform_base_url: config.platform_base_url.trim_end_matches('/').to_string(),
            extra_headers: config.extra_headers.clone(),
        })
    }

    pub fn organization_id(&self) -> &str {
        &self.organization_id
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub(crate) fn api_key(&self) -> &str {
        &self.api_key
    }

    /// 📡 The resolved push host for this source (explicit or derived).
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn extra_headers(&self) -> &BTreeMap<String, String> {
        &self.extra_headers
    }

    /// 📦 Phase 1 of the push protocol: where file containers are opened.
    pub fn files_url(&self) -> String {
        format!("{}/organizations/{}/files", self.push_base_url, self.organization_id)
    }

    /// 📦 Phase 3 of the push protocol: where an uploaded container is committed.
    pub fn batch_commit_url(&self) -> String {
        format!("{}/documents/batch", self.host.trim_end_matches('/'))
    }

    /// 🗑️ "Delete everything older than" lives here.
    pub fn older_than_url(&self) -> String {
        format!("{}/documents/olderthan", self.host.trim_end_matches('/'))
    }

    /// 🔍 The search endpoint.
    pub fn search_url(&self) -> String {
        format!("{}/search/v2", self.platform_base_url)
    }

    /// 🏷️ Base for the field schema API, scoped to the organization.
    pub fn fields_base_url(&self) -> String {
        format!("{}/organizations/{}", self.platform_base_url, self.organization_id)
    }
}

fn require(what: &str, value: &str) -> Result<(), RemoteError> {
    if value.trim().is_empty() {
        return Err(RemoteError::validation(format!(
            "the remote search client requires {what}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_the_host_is_derived_from_org_and_source() -> anyhow::Result<()> {
        let context = ClientContext::new(&RemoteConfig::new("acme", "acme-src", "key"))?;

        assert_eq!(
            context.host(),
            "https://push.cloud.coveo.com/v1/organizations/acme/sources/acme-src/"
        );
        assert_eq!(
            context.files_url(),
            "https://push.cloud.coveo.com/v1/organizations/acme/files"
        );
        assert_eq!(
            context.batch_commit_url(),
            "https://push.cloud.coveo.com/v1/organizations/acme/sources/acme-src/documents/batch"
        );
        assert_eq!(
            context.older_than_url(),
            "https://push.cloud.coveo.com/v1/organizations/acme/sources/acme-src/documents/olderthan"
        );
        assert_eq!(context.search_url(), "https://platform.cloud.coveo.com/rest/search/v2");
        assert_eq!(
            context.fields_base_url(),
            "https://platform.cloud.coveo.com/rest/organizations/acme"
        );
        Ok(())
    }

    #[test]
    fn the_one_where_an_explicit_host_wins() -> anyhow::Result<()> {
        let mut config = RemoteConfig::new("acme", "acme-src", "key");
        config.host = Some("http://localhost:4010/sources/custom/".to_string());
        let context = ClientContext::new(&config)?;

        assert_eq!(context.host(), "http://localhost:4010/sources/custom/");
        assert_eq!(
            context.batch_commit_url(),
            "http://localhost:4010/sources/custom/documents/batch"
        );
        Ok(())
    }

    #[test]
    fn the_one_where_missing_credentials_fail_fast() {
        for (org, src, key) in [("", "s", "k"), ("o", "  ", "k"), ("o", "s", "")] {
            let verdict = ClientContext::new(&RemoteConfig::new(org, src, key));
            assert!(
                matches!(verdict, Err(RemoteError::Validation(_))),
                "blank credential ({org:?}, {src:?}, {key:?}) should be a validation error"
            );
        }
    }

    #[test]
    fn the_one_where_debug_keeps_the_secret() -> anyhow::Result<()> {
        let context = ClientContext::new(&RemoteConfig::new("acme", "src", "hunter2"))?;
        assert!(!format!("{context:?}").contains("hunter2"));
        Ok(())
    }
}

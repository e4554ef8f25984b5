//! 🏷️ Field Schema Manager: what the remote index knows about our fields.
//!
//! 🎬 *[a facet request walks up to the index. "are you facetable?" asks the bouncer.
//! the field checks its pockets. `facet: false`. "not tonight, pal."]*
//!
//! Two jobs:
//! 1. Provision fields in bulk (create / update / delete). One field is just a bulk of one.
//! 2. Read back the USER-origin field list so the search side knows which facet
//!    requests are legal.
//!
//! 🧠 Knowledge graph:
//! - Type mapping is fixed and total: boolean/string/text → STRING, date → DATE,
//!   integer → LONG_64, anything else → STRING. It never fails. It just shrugs.
//! - 412 on create means "already exists" and is treated as success by `ensure_fields`.
//! - `SchemaReader` is the seam the search engine sees, so tests can hand it a fake. 🦆

use std::collections::HashSet;

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::RemoteError;
use crate::remote::{RemoteBody, RemoteClient, RemoteRequest};

const FIELD_PAGE: &str = "/indexes/page/fields";
const FIELD_BATCH: &str = "/indexes/fields/batch";
const FIELDS_PER_PAGE: u64 = 100;

/// 📐 The remote's own vocabulary for field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteFieldType {
    #[serde(rename = "STRING")]
    String,
    #[serde(rename = "DATE")]
    Date,
    #[serde(rename = "LONG_64")]
    Long64,
}

impl RemoteFieldType {
    /// 🔄 Generic type name → remote type. Unknown types land on STRING, the safe couch to crash on.
    pub fn from_generic(generic: &str) -> Self {
        match generic {
            "boolean" | "string" | "text" => RemoteFieldType::String,
            "date" => RemoteFieldType::Date,
            "integer" => RemoteFieldType::Long64,
            _ => RemoteFieldType::String,
        }
    }
}

/// 📦 One field as we ask the remote to create or update it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub field_type: RemoteFieldType,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, generic_type: &str) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            field_type: RemoteFieldType::from_generic(generic_type),
        }
    }
}

/// 📜 One field as the remote describes it back to us.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteField {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type", default)]
    pub field_type: Option<String>,
    #[serde(default)]
    pub facet: bool,
    #[serde(rename = "multiValueFacet", default)]
    pub multi_value_facet: bool,
}

impl RemoteField {
    pub fn is_facetable(&self) -> bool {
        self.facet || self.multi_value_facet
    }
}

#[derive(Debug, Deserialize, Default)]
struct FieldPage {
    #[serde(default)]
    items: Vec<RemoteField>,
    #[serde(rename = "totalPages", default)]
    total_pages: u64,
}

/// 🔍 The capability the search engine needs from the schema: "which fields can I facet on?"
#[async_trait]
pub trait SchemaReader: Send + Sync {
    /// 📋 Names of every field currently marked facetable or multi-value-facetable.
    async fn facetable_field_names(&self) -> Result<HashSet<String>, RemoteError>;
}

/// 🏷️ Bulk field provisioning and lookup against the remote schema API.
#[derive(Debug, Clone, Copy)]
pub struct FieldSchemaManager<'a> {
    client: &'a RemoteClient,
}

impl<'a> FieldSchemaManager<'a> {
    pub fn new(client: &'a RemoteClient) -> Self {
        Self { client }
    }

    fn base(&self) -> String {
        self.client.context().fields_base_url()
    }

    /// 📋 Every USER-origin field, following pagination until the remote runs out of pages.
    pub async fn load_user_fields(&self) -> Result<Vec<RemoteField>, RemoteError> {
        let mut fields = Vec::new();
        let mut page: u64 = 0;

        loop {
            let body = self
                .client
                .request(
                    RemoteRequest::new(Method::GET, self.base())
                        .path(FIELD_PAGE)
                        .param("origin", "USER")
                        .param("page", page)
                        .param("perPage", FIELDS_PER_PAGE),
                )
                .await?;

            let parsed: FieldPage = match body.into_json() {
                // 🤷 an empty body is an empty page
                Value::Null => FieldPage::default(),
                json => serde_json::from_value(json)
                    .map_err(|e| RemoteError::Decode(format!("field page: {e}")))?,
            };
            trace!("🏷️ field page {} brought {} fields", page, parsed.items.len());
            fields.extend(parsed.items);

            // 📄 pages are zero-based, totalPages is a count
            page += 1;
            if page >= parsed.total_pages {
                break;
            }
        }

        Ok(fields)
    }

    /// 🎯 Only the fields that may appear in a facet request.
    pub async fn load_facetable_fields(&self) -> Result<Vec<RemoteField>, RemoteError> {
        Ok(self
            .load_user_fields()
            .await?
            .into_iter()
            .filter(RemoteField::is_facetable)
            .collect())
    }

    /// 🏗️ Create fields in bulk.
    pub async fn create(&self, fields: &[FieldDescriptor]) -> Result<RemoteBody, RemoteError> {
        self.send_bulk(Method::POST, "create", fields).await
    }

    /// 🔧 Update fields in bulk.
    pub async fn update(&self, fields: &[FieldDescriptor]) -> Result<RemoteBody, RemoteError> {
        self.send_bulk(Method::PUT, "update", fields).await
    }

    /// 🏗️ Single-field create, which is just a bulk of one wearing a trench coat.
    pub async fn create_field(&self, field: &FieldDescriptor) -> Result<RemoteBody, RemoteError> {
        self.create(std::slice::from_ref(field)).await
    }

    /// 🗑️ Delete fields by name. The names ride along as one comma-joined query param.
    pub async fn delete<S: AsRef<str>>(&self, names: &[S]) -> Result<RemoteBody, RemoteError> {
        let joined = names.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(",");
        debug!("🗑️ deleting fields: {}", joined);
        self.client
            .request(
                RemoteRequest::new(Method::DELETE, self.base())
                    .path(format!("{FIELD_BATCH}/delete"))
                    .param("fields", joined),
            )
            .await
    }

    /// ✅ Create the fields, shrugging off 412 ("already exists"). Any other failure is real.
    pub async fn ensure_fields(&self, fields: &[FieldDescriptor]) -> Result<(), RemoteError> {
        // 🚫 nothing to provision, no call
        if fields.is_empty() {
            return Ok(());
        }
        match self.create(fields).await {
            Ok(_) => {
                debug!("🏗️ provisioned {} field(s)", fields.len());
                Ok(())
            }
            Err(err) if err.is_already_exists() => {
                debug!("✅ fields already exist, nothing to provision: {}", err);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn send_bulk(
        &self,
        method: Method,
        action: &str,
        fields: &[FieldDescriptor],
    ) -> Result<RemoteBody, RemoteError> {
        let body = serde_json::to_value(fields)
            .map_err(|e| RemoteError::validation(format!("could not encode fields: {e}")))?;
        self.client
            .request(
                RemoteRequest::new(method, self.base())
                    .path(format!("{FIELD_BATCH}/{action}"))
                    .body(body),
            )
            .await
    }
}

#[async_trait]
impl SchemaReader for FieldSchemaManager<'_> {
    async fn facetable_field_names(&self) -> Result<HashSet<String>, RemoteError> {
        Ok(self
            .load_facetable_fields()
            .await?
            .into_iter()
            .map(|field| field.name)
            .collect())
    }
}

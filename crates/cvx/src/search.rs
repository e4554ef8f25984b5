//! # 🔍 THE SEARCH ENGINE
//!
//! 🎬 COLD OPEN: EXT. THE REMOTE SEARCH ENDPOINT, IT'S DOWN AGAIN
//!
//! The page still has to render. Nobody wants a stack trace where the results
//! should be. So by default, when the remote sulks, we return an empty result set
//! and log a warning. Callers who'd rather know flip `search.fail_open` off.
//!
//! Flow per call:
//! 1. facets requested? fetch the facetable-field snapshot (fresh, every time)
//! 2. compile the query ([`QueryCompiler`])
//! 3. POST it with `organizationId`
//! 4. decompile: hits → item ids + scores, groupBy results → facet buckets
//!
//! Hits without the back-reference field are strangers that wandered into our
//! results. They are dropped. 🦆

use std::collections::{BTreeMap, HashSet};

use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};

use crate::documents::scalar_to_string;
use crate::error::RemoteError;
use crate::query::{QueryCompiler, SearchQuery, WireQuery};
use crate::remote::{RemoteClient, RemoteRequest};
use crate::schema::SchemaReader;

/// 🎯 One hit, re-associated with the generic item that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultItem {
    pub item_id: String,
    pub score: f64,
}

/// 📊 One facet bucket: a quoted filter literal and how many results carry it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacetBucket {
    pub filter: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchResults {
    pub items: Vec<ResultItem>,
    /// `None` when counting was skipped or the remote reported zero.
    pub result_count: Option<u64>,
    /// Keyed by the unprefixed field name.
    pub facets: BTreeMap<String, Vec<FacetBucket>>,
}

impl SearchResults {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// 🔍 Compiles, executes and decompiles searches against one source.
pub struct SearchEngine<'a> {
    client: &'a RemoteClient,
    schema: &'a dyn SchemaReader,
    compiler: QueryCompiler,
    id_field: String,
    fail_open: bool,
}

impl<'a> SearchEngine<'a> {
    pub fn new(
        client: &'a RemoteClient,
        schema: &'a dyn SchemaReader,
        compiler: QueryCompiler,
        id_field: impl Into<String>,
    ) -> Self {
        Self {
            client,
            schema,
            compiler,
            id_field: id_field.into(),
            fail_open: true,
        }
    }

    pub fn fail_open(mut self, fail_open: bool) -> Self {
        self.fail_open = fail_open;
        self
    }

    pub fn compiler(&self) -> &QueryCompiler {
        &self.compiler
    }

    /// 🔍 Run a search. With fail-open on, this never returns `Err`.
    pub async fn search(&self, query: &SearchQuery) -> Result<SearchResults, RemoteError> {
        match self.try_search(query).await {
            Ok(results) => Ok(results),
            Err(err) if self.fail_open => {
                warn!("🛟 search failed, degrading to an empty result set: {}", err);
                Ok(SearchResults::default())
            }
            Err(err) => Err(err),
        }
    }

    async fn try_search(&self, query: &SearchQuery) -> Result<SearchResults, RemoteError> {
        // 📋 schema lookup only when there's a facet to check, never cached
        let facetable: Option<HashSet<String>> = if query.facets.is_empty() {
            None
        } else {
            Some(self.schema.facetable_field_names().await?)
        };

        let wire = self.compiler.compile(query, facetable.as_ref());
        let raw = self.execute(&wire).await?;
        Ok(self.decompile(&raw, query.skip_result_count))
    }

    /// 📡 POST a compiled query. Errors surface as-is; fail-open lives one level up.
    pub async fn execute(&self, wire: &WireQuery) -> Result<Value, RemoteError> {
        let body = serde_json::to_value(wire)
            .map_err(|e| RemoteError::validation(format!("could not encode query: {e}")))?;
        let context = self.client.context();

        let response = self
            .client
            .request(
                RemoteRequest::new(Method::POST, context.search_url())
                    .param("organizationId", context.organization_id())
                    .body(body),
            )
            .await?;
        Ok(response.into_json())
    }

    /// 🔄 Raw payload → generic results.
    pub fn decompile(&self, raw: &Value, skip_result_count: bool) -> SearchResults {
        let mut results = SearchResults::default();

        // 🔢 zero reads as "no count", same as skipping
        if !skip_result_count {
            results.result_count = raw
                .get("totalCountFiltered")
                .and_then(Value::as_u64)
                .filter(|total| *total > 0);
        }

        let hits = raw.get("results").and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default();
        for hit in hits {
            let Some(item_id) = hit
                .get("raw")
                .and_then(|fields| fields.get(&self.id_field))
                .and_then(scalar_to_string)
            else {
                debug!("🕵️ dropping a hit without '{}', it isn't one of ours", self.id_field);
                continue;
            };
            results.items.push(ResultItem {
                item_id,
                score: hit.get("score").and_then(Value::as_f64).unwrap_or_default(),
            });
        }

        let groups = raw.get("groupByResults").and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default();
        for group in groups {
            let Some(field) = group.get("field").and_then(Value::as_str) else {
                continue;
            };
            let buckets: Vec<FacetBucket> = group
                .get("values")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default()
                .iter()
                .filter_map(|bucket| {
                    let value = scalar_to_string(bucket.get("value")?)?;
                    Some(FacetBucket {
                        filter: format!("\"{value}\""),
                        count: bucket.get("numberOfResults").and_then(Value::as_u64).unwrap_or_default(),
                    })
                })
                .collect();

            // 👻 a facet with no buckets is not worth a key
            if !buckets.is_empty() {
                results
                    .facets
                    .entry(self.compiler.unprefixed(field).to_string())
                    .or_default()
                    .extend(buckets);
            }
        }

        results
    }
}

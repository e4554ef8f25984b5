//! 🧮 QueryCompiler: generic query in, remote wire query out.
//!
//! 🎬 COLD OPEN: INT. TRANSLATION BOOTH, THE UN OF SEARCH ENGINES
//!
//! On one side: a tidy tree of conditions, a list of sorts, some facet wishes.
//! On the other: a remote that only speaks `@field==value` and `relevancy`.
//! The compiler sits in the booth with headphones on and translates, one leaf at a time.
//!
//! ```text
//!   color IN [red, blue]           →  @f.color=(red,blue)
//!   status NOT IN [draft, archived]→  (@f.status<>draft AND @f.status<>archived)
//!   type = article                 →  @f.type==article
//!   group(AND, a, group(OR, b, c)) →  (a AND (b OR c))
//!   sort relevance DESC            →  relevancy
//! ```
//!
//! 🧠 Every group wraps its children in parentheses, so the nesting depth of the
//! output matches the depth of the tree. Empty groups vanish. Empty keywords vanish.
//! Facets the schema doesn't know about vanish. Nothing here ever fails. 🦆

use std::collections::HashSet;

use serde::Serialize;
use tracing::debug;

use crate::app_config::{IndexingConfig, SearchConfig};
use crate::query::{Condition, ConditionGroup, ConditionNode, ConditionValue, FacetRequest, Operator, SearchQuery, SortDirection};

/// 📊 One facet as the remote wants it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupByRequest {
    pub field: String,
    #[serde(rename = "maximumNumberOfValues")]
    pub maximum_number_of_values: u32,
}

/// 📡 The body POSTed to the search endpoint. Empty parts are left out entirely.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct WireQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aq: Option<String>,
    #[serde(rename = "sortCriteria", skip_serializing_if = "Option::is_none")]
    pub sort_criteria: Option<String>,
    #[serde(rename = "groupBy", skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<GroupByRequest>,
}

impl WireQuery {
    pub fn set_keywords(&mut self, keywords: &str) {
        if !keywords.trim().is_empty() {
            self.q = Some(keywords.to_string());
        }
    }

    /// ➕ AND a fragment onto the advanced query, or replace it outright when `replace` is set.
    pub fn add_advanced_query(&mut self, fragment: &str, replace: bool) {
        if fragment.is_empty() {
            return;
        }
        self.aq = match self.aq.take() {
            Some(existing) if !replace => Some(format!("{existing} AND {fragment}")),
            _ => Some(fragment.to_string()),
        };
    }

    pub fn set_sorts(&mut self, criteria: String) {
        if !criteria.is_empty() {
            self.sort_criteria = Some(criteria);
        }
    }
}

/// 🧮 Compiles `SearchQuery` into `WireQuery`. Pure, no I/O.
#[derive(Debug, Clone)]
pub struct QueryCompiler {
    field_prefix: String,
    relevance_field: String,
    default_facet_limit: u32,
    source_name: Option<String>,
}

impl QueryCompiler {
    pub fn new(field_prefix: impl Into<String>) -> Self {
        let defaults = SearchConfig::default();
        Self {
            field_prefix: field_prefix.into(),
            relevance_field: defaults.relevance_field,
            default_facet_limit: defaults.default_facet_limit,
            source_name: None,
        }
    }

    pub fn from_config(indexing: &IndexingConfig, search: &SearchConfig) -> Self {
        Self {
            field_prefix: indexing.field_prefix.clone(),
            relevance_field: search.relevance_field.clone(),
            default_facet_limit: search.default_facet_limit,
            source_name: search.source_name.clone().filter(|name| !name.trim().is_empty()),
        }
    }

    pub fn with_source_name(mut self, source_name: impl Into<String>) -> Self {
        self.source_name = Some(source_name.into());
        self
    }

    pub fn field_prefix(&self) -> &str {
        &self.field_prefix
    }

    /// 🏷️ `color` → `cvx_color`
    pub fn prefixed(&self, field: &str) -> String {
        format!("{}{}", self.field_prefix, field)
    }

    /// 🏷️ `cvx_color` or `@cvx_color` → `color`. Names without the prefix come back untouched.
    pub fn unprefixed<'s>(&self, remote_field: &'s str) -> &'s str {
        let bare = remote_field.strip_prefix('@').unwrap_or(remote_field);
        bare.strip_prefix(self.field_prefix.as_str()).unwrap_or(bare)
    }

    fn field_token(&self, field: &str) -> String {
        format!("@{}", self.prefixed(field))
    }

    /// 🔄 The whole translation. `facetable` is the schema snapshot; `None` means
    /// none was fetched, so no facet survives.
    pub fn compile(&self, query: &SearchQuery, facetable: Option<&HashSet<String>>) -> WireQuery {
        let mut wire = WireQuery::default();

        if let Some(keywords) = query.keywords.as_deref() {
            wire.set_keywords(keywords);
        }

        // 🎯 pin the query to our source first, user conditions get AND-ed after
        if let Some(source_name) = self.source_name.as_deref() {
            wire.add_advanced_query(&format!("@source==\"{source_name}\""), false);
        }
        wire.add_advanced_query(&self.compile_group(&query.conditions), false);

        wire.set_sorts(self.compile_sorts(&query.sorts));

        if let Some(facetable) = facetable {
            wire.group_by = self.compile_facets(&query.facets, facetable);
        }

        wire
    }

    /// 🌳 Recursive descent over a group. Empty groups (and groups of empty groups) compile to "".
    pub fn compile_group(&self, group: &ConditionGroup) -> String {
        let compiled: Vec<String> = group
            .children()
            .iter()
            .map(|node| match node {
                ConditionNode::Leaf(condition) => self.compile_condition(condition),
                ConditionNode::Group(nested) => self.compile_group(nested),
            })
            .filter(|fragment| !fragment.is_empty())
            .collect();

        // 👻 nothing survived, so the group never happened
        if compiled.is_empty() {
            return String::new();
        }
        format!("({})", compiled.join(&format!(" {} ", group.conjunction())))
    }

    /// 🍃 One leaf. Total over the closed operator set.
    pub fn compile_condition(&self, condition: &Condition) -> String {
        let token = self.field_token(condition.field());

        match (condition.operator(), condition.value()) {
            (Operator::Equals, ConditionValue::Single(value)) => format!("{token}=={value}"),
            (Operator::NotEquals, ConditionValue::Single(value)) => format!("{token}<>{value}"),
            (Operator::In, ConditionValue::Set(values)) => format!("{token}=({})", values.join(",")),
            // 🔀 no native NOT IN on the remote, so spell it out leaf by leaf
            (Operator::NotIn, ConditionValue::Set(values)) => format!(
                "({})",
                values
                    .iter()
                    .map(|value| format!("{token}<>{value}"))
                    .collect::<Vec<_>>()
                    .join(" AND ")
            ),
            // ⚠️ shapes are checked by Condition::new, so these can't be built
            (Operator::Equals | Operator::NotEquals, ConditionValue::Set(values)) => {
                format!("{token}=({})", values.join(","))
            }
            (Operator::In | Operator::NotIn, ConditionValue::Single(value)) => {
                format!("{token}=={value}")
            }
        }
    }

    /// ↕️ `[(title, ASC), (relevance, DESC)]` → `@cvx_title ascending,relevancy`
    pub fn compile_sorts(&self, sorts: &[(String, SortDirection)]) -> String {
        sorts
            .iter()
            .map(|(field, direction)| {
                if *field == self.relevance_field {
                    // the remote only ranks relevance one way
                    "relevancy".to_string()
                } else {
                    let order = match direction {
                        SortDirection::Ascending => "ascending",
                        SortDirection::Descending => "descending",
                    };
                    format!("{} {}", self.field_token(field), order)
                }
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    /// 📊 Keep only the facets the schema snapshot says are facetable.
    pub fn compile_facets(
        &self,
        facets: &[FacetRequest],
        facetable: &HashSet<String>,
    ) -> Vec<GroupByRequest> {
        facets
            .iter()
            .filter_map(|facet| {
                let prefixed = self.prefixed(&facet.field);
                if !facetable.contains(&prefixed) {
                    debug!("📊 dropping facet '{}': not facetable in the remote schema", facet.field);
                    return None;
                }
                Some(GroupByRequest {
                    field: format!("@{prefixed}"),
                    // 0 means "no preference", same as unset
                    maximum_number_of_values: facet
                        .limit
                        .filter(|limit| *limit > 0)
                        .unwrap_or(self.default_facet_limit),
                })
            })
            .collect()
    }
}

//! 🔍 The generic query model: keywords, a boolean condition tree, facet requests and sorts.
//!
//! 🎬 *[a condition walks in holding the operator "LIKE". the constructor looks it up and down.
//! "we don't serve your kind here." the condition leaves. nobody compiles anything wrong tonight.]*
//!
//! 🧠 Operators are a closed set. A condition can only be built with `=`, `<>`, `IN` or
//! `NOT IN`, and the value has to fit the operator (one value for `=`/`<>`, a non-empty
//! list for `IN`/`NOT IN`). Anything else is a validation error at construction time, so
//! the compiler in [`compiler`] never has to guess. 🦆

pub mod compiler;

use std::fmt;
use std::str::FromStr;

use crate::error::RemoteError;

pub use compiler::{GroupByRequest, QueryCompiler, WireQuery};

/// 🔗 How the children of a group are joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Conjunction {
    #[default]
    And,
    Or,
}

impl fmt::Display for Conjunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conjunction::And => f.write_str("AND"),
            Conjunction::Or => f.write_str("OR"),
        }
    }
}

impl FromStr for Conjunction {
    type Err = RemoteError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "AND" => Ok(Conjunction::And),
            "OR" => Ok(Conjunction::Or),
            other => Err(RemoteError::validation(format!("unknown conjunction '{other}'"))),
        }
    }
}

/// ⚖️ The four comparisons the remote query language can express for us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
    In,
    NotIn,
}

impl Operator {
    fn wants_a_set(self) -> bool {
        matches!(self, Operator::In | Operator::NotIn)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operator::Equals => "=",
            Operator::NotEquals => "<>",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
        })
    }
}

impl FromStr for Operator {
    type Err = RemoteError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.split_whitespace().collect::<Vec<_>>().join(" ").to_ascii_uppercase();
        match normalized.as_str() {
            "=" => Ok(Operator::Equals),
            "<>" | "!=" => Ok(Operator::NotEquals),
            "IN" => Ok(Operator::In),
            "NOT IN" => Ok(Operator::NotIn),
            _ => Err(RemoteError::validation(format!(
                "unsupported filter operator '{raw}'"
            ))),
        }
    }
}

/// 📦 One value or a list of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionValue {
    Single(String),
    Set(Vec<String>),
}

impl From<&str> for ConditionValue {
    fn from(value: &str) -> Self {
        ConditionValue::Single(value.to_string())
    }
}

impl From<String> for ConditionValue {
    fn from(value: String) -> Self {
        ConditionValue::Single(value)
    }
}

impl From<Vec<String>> for ConditionValue {
    fn from(values: Vec<String>) -> Self {
        ConditionValue::Set(values)
    }
}

impl From<Vec<&str>> for ConditionValue {
    fn from(values: Vec<&str>) -> Self {
        ConditionValue::Set(values.into_iter().map(str::to_string).collect())
    }
}

/// 🍃 A validated leaf: `{field, operator, value}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    field: String,
    operator: Operator,
    value: ConditionValue,
}

impl Condition {
    /// 🔒 The only door in. Checks the field, and that the value's shape fits the operator.
    pub fn new(
        field: impl Into<String>,
        operator: Operator,
        value: impl Into<ConditionValue>,
    ) -> Result<Self, RemoteError> {
        let field = field.into();
        let value = value.into();

        if field.trim().is_empty() {
            return Err(RemoteError::validation("a filter condition needs a field name"));
        }

        match (&value, operator.wants_a_set()) {
            (ConditionValue::Single(_), false) => {}
            (ConditionValue::Set(values), true) if !values.is_empty() => {}
            (ConditionValue::Set(_), true) => {
                return Err(RemoteError::validation(format!(
                    "'{field} {operator}' needs at least one value"
                )));
            }
            (ConditionValue::Single(_), true) => {
                return Err(RemoteError::validation(format!(
                    "'{field} {operator}' needs a list of values"
                )));
            }
            (ConditionValue::Set(_), false) => {
                return Err(RemoteError::validation(format!(
                    "'{field} {operator}' takes exactly one value"
                )));
            }
        }

        Ok(Self { field, operator, value })
    }

    /// 🎯 Like `new`, but the operator arrives as text (from a form, a CLI flag, a config file).
    pub fn parse(
        field: impl Into<String>,
        operator: &str,
        value: impl Into<ConditionValue>,
    ) -> Result<Self, RemoteError> {
        Self::new(field, operator.parse()?, value)
    }

    pub fn equals(field: impl Into<String>, value: impl Into<String>) -> Result<Self, RemoteError> {
        Self::new(field, Operator::Equals, ConditionValue::Single(value.into()))
    }

    pub fn not_equals(field: impl Into<String>, value: impl Into<String>) -> Result<Self, RemoteError> {
        Self::new(field, Operator::NotEquals, ConditionValue::Single(value.into()))
    }

    pub fn one_of<I, S>(field: impl Into<String>, values: I) -> Result<Self, RemoteError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values = values.into_iter().map(Into::into).collect::<Vec<_>>();
        Self::new(field, Operator::In, ConditionValue::Set(values))
    }

    pub fn none_of<I, S>(field: impl Into<String>, values: I) -> Result<Self, RemoteError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values = values.into_iter().map(Into::into).collect::<Vec<_>>();
        Self::new(field, Operator::NotIn, ConditionValue::Set(values))
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn value(&self) -> &ConditionValue {
        &self.value
    }
}

/// 🌳 A node in the condition tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionNode {
    Leaf(Condition),
    Group(ConditionGroup),
}

/// 🌳 A group of conditions (and nested groups) joined by one conjunction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConditionGroup {
    conjunction: Conjunction,
    children: Vec<ConditionNode>,
}

impl ConditionGroup {
    pub fn new(conjunction: Conjunction) -> Self {
        Self {
            conjunction,
            children: Vec::new(),
        }
    }

    pub fn and() -> Self {
        Self::new(Conjunction::And)
    }

    pub fn or() -> Self {
        Self::new(Conjunction::Or)
    }

    pub fn with(mut self, condition: Condition) -> Self {
        self.children.push(ConditionNode::Leaf(condition));
        self
    }

    pub fn with_group(mut self, group: ConditionGroup) -> Self {
        self.children.push(ConditionNode::Group(group));
        self
    }

    pub fn push(&mut self, node: ConditionNode) {
        self.children.push(node);
    }

    pub fn conjunction(&self) -> Conjunction {
        self.conjunction
    }

    pub fn children(&self) -> &[ConditionNode] {
        &self.children
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

/// ↕️ Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl FromStr for SortDirection {
    type Err = RemoteError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ASC" | "ASCENDING" => Ok(SortDirection::Ascending),
            "DESC" | "DESCENDING" => Ok(SortDirection::Descending),
            other => Err(RemoteError::validation(format!("unknown sort direction '{other}'"))),
        }
    }
}

/// 📊 "Give me up to `limit` buckets for `field`." `None` means the configured default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacetRequest {
    pub field: String,
    pub limit: Option<u32>,
}

impl FacetRequest {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// 🔍 Everything a caller can ask of a search.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchQuery {
    pub keywords: Option<String>,
    pub conditions: ConditionGroup,
    pub facets: Vec<FacetRequest>,
    /// Ordered. The first entry is the primary sort.
    pub sorts: Vec<(String, SortDirection)>,
    pub skip_result_count: bool,
}

impl SearchQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keywords(mut self, keywords: impl Into<String>) -> Self {
        self.keywords = Some(keywords.into());
        self
    }

    pub fn filter(mut self, conditions: ConditionGroup) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn facet(mut self, facet: FacetRequest) -> Self {
        self.facets.push(facet);
        self
    }

    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sorts.push((field.into(), direction));
        self
    }

    pub fn skip_result_count(mut self) -> Self {
        self.skip_result_count = true;
        self
    }
}

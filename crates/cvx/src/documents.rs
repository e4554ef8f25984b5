//! 📦 Document Item Normalizer: turning generic items into flat, indexable objects.
//!
//! ---
//!
//! 🎬 COLD OPEN: INT. CUSTOMS DESK, THE BORDER BETWEEN "CMS" AND "CLOUD INDEX"
//!
//! An item arrives. It has a title that is 40,000 characters long (someone pasted
//! a novel). It has a date written as "2024-03-01 12:00:00". It has a boolean field
//! whose only value is `false`, and an integer field holding the string "42".
//! Customs stamps every one of them into something the remote index can swallow.
//!
//! ---
//!
//! 🧠 Rules of the desk:
//! - falsy values (null, false, 0, "", "0", empty lists) are dropped before anything else
//! - text longer than 10,000 characters is trimmed then cut to exactly 10,000. Never an error
//! - integer/duration/decimal use "add zero" semantics: numbers stay, numeric text parses,
//!   leading digits win, anything else becomes 0
//! - boolean becomes `true` (the falsy ones never made it this far)
//! - date becomes epoch seconds; numeric dates pass through as numbers
//! - one surviving value collapses to a scalar, zero values omit the field, more stay a list 🦆

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Deserialize;
use serde_json::{Map, Number, Value};
use tracing::{debug, warn};

use crate::app_config::IndexingConfig;

/// 📏 Text longer than this gets trimmed and truncated.
pub const MAX_TEXT_CHARS: usize = 10_000;

pub const DOCUMENT_ID_KEY: &str = "documentId";
pub const DOCUMENT_TYPE_KEY: &str = "documentType";
pub const SOURCE_TYPE_KEY: &str = "sourceType";

/// 🏷️ The declared type of a generic field, which decides how its values are coerced.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum DeclaredType {
    Text,
    String,
    Uri,
    Integer,
    Duration,
    Decimal,
    Boolean,
    Date,
    /// 🎭 Anything we don't recognize. Values pass through untouched.
    Other(String),
}

impl From<String> for DeclaredType {
    fn from(raw: String) -> Self {
        DeclaredType::from(raw.as_str())
    }
}

impl From<&str> for DeclaredType {
    fn from(raw: &str) -> Self {
        match raw {
            "text" => DeclaredType::Text,
            "string" => DeclaredType::String,
            "uri" => DeclaredType::Uri,
            "integer" => DeclaredType::Integer,
            "duration" => DeclaredType::Duration,
            "decimal" => DeclaredType::Decimal,
            "boolean" => DeclaredType::Boolean,
            "date" => DeclaredType::Date,
            other => DeclaredType::Other(other.to_string()),
        }
    }
}

/// 📎 One field of a generic item: its identifier, declared type, and raw values.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ItemField {
    pub identifier: String,
    #[serde(rename = "type")]
    pub declared_type: DeclaredType,
    #[serde(default)]
    pub values: Vec<Value>,
}

impl ItemField {
    pub fn new(identifier: impl Into<String>, declared_type: impl Into<DeclaredType>, values: Vec<Value>) -> Self {
        Self {
            identifier: identifier.into(),
            declared_type: declared_type.into(),
            values,
        }
    }
}

/// 🎯 A generic item handed to us by the surrounding system.
///
/// `item_id` is what search hits get mapped back to. `path` (an alias like `/about`)
/// or `entity_id` (used as `/node/{entity_id}`) builds the stable `documentId`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IndexableItem {
    pub item_id: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub fields: Vec<ItemField>,
}

/// 📦 A flat, ready-to-push document: field name → scalar or list, plus the reserved keys.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    fields: Map<String, Value>,
}

impl Document {
    pub fn from_object(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.fields.insert(key.into(), value)
    }

    pub fn document_id(&self) -> Option<&str> {
        self.fields.get(DOCUMENT_ID_KEY).and_then(Value::as_str)
    }

    pub fn as_object(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_object(self) -> Map<String, Value> {
        self.fields
    }
}

/// 🛂 The customs desk itself. Built from `IndexingConfig`.
#[derive(Debug, Clone)]
pub struct DocumentNormalizer {
    field_prefix: String,
    id_field: String,
    document_type: String,
    source_type: String,
    base_url: String,
}

impl DocumentNormalizer {
    pub fn new(config: &IndexingConfig) -> Self {
        Self {
            field_prefix: config.field_prefix.clone(),
            id_field: config.id_field.clone(),
            document_type: config.document_type.clone(),
            source_type: config.source_type.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    /// 🔄 Generic item → flat document.
    pub fn normalize(&self, item: &IndexableItem) -> Document {
        // 🏷️ reserved keys go in first
        let mut document = Document::default();
        document.insert(DOCUMENT_TYPE_KEY, Value::String(self.document_type.clone()));
        document.insert(SOURCE_TYPE_KEY, Value::String(self.source_type.clone()));
        document.insert(DOCUMENT_ID_KEY, Value::String(self.document_id_for(item)));
        // 🔙 always a single scalar, never a list
        document.insert(self.id_field.clone(), Value::String(item.item_id.clone()));

        for field in &item.fields {
            let key = format!("{}{}", self.field_prefix, field.identifier);
            // 🔒 reserved keys were stamped above and nobody gets to overwrite them
            if self.is_reserved(&key) {
                warn!(
                    "⚠️ item {}: field '{}' lands on reserved key '{}', skipping it",
                    item.item_id, field.identifier, key
                );
                continue;
            }
            if let Some(value) = normalize_field(field) {
                document.insert(key, value);
            }
        }

        document
    }

    /// 🔙 Recover the originating item id from a document (or a raw search hit's field map).
    pub fn item_id_of(&self, fields: &Map<String, Value>) -> Option<String> {
        scalar_to_string(fields.get(&self.id_field)?)
    }

    fn is_reserved(&self, key: &str) -> bool {
        key == self.id_field
            || [DOCUMENT_ID_KEY, DOCUMENT_TYPE_KEY, SOURCE_TYPE_KEY].contains(&key)
    }

    fn document_id_for(&self, item: &IndexableItem) -> String {
        // 🛣️ alias wins, then the entity id, then the item id as a last resort
        let path = match item.path.as_deref().filter(|alias| !alias.is_empty()) {
            Some(alias) => alias.to_string(),
            None => format!(
                "/node/{}",
                item.entity_id.as_deref().unwrap_or(item.item_id.as_str())
            ),
        };
        format!("{}{}", self.base_url, path)
    }
}

/// 🧹 Coerce, filter and collapse the values of one field. `None` means "omit the field".
pub fn normalize_field(field: &ItemField) -> Option<Value> {
    let mut values: Vec<Value> = field
        .values
        .iter()
        .filter(|value| !is_falsy(value))
        .filter_map(|value| coerce(&field.declared_type, value))
        .collect();

    // 📦 one value stays a scalar, several become a list
    match values.len() {
        0 => None,
        1 => values.pop(),
        _ => Some(Value::Array(values)),
    }
}

fn coerce(declared_type: &DeclaredType, value: &Value) -> Option<Value> {
    match declared_type {
        DeclaredType::Text | DeclaredType::String | DeclaredType::Uri => {
            Some(Value::String(truncate_text(scalar_to_text(value))))
        }
        DeclaredType::Integer | DeclaredType::Duration | DeclaredType::Decimal => {
            Some(add_zero(value))
        }
        // falsy booleans were filtered out already
        DeclaredType::Boolean => Some(Value::Bool(true)),
        DeclaredType::Date => coerce_date(value),
        DeclaredType::Other(_) => Some(value.clone()),
    }
}

/// 🕳️ The values that don't survive the first filter.
fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty() || s == "0",
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

/// ✂️ Over the limit: trim, then cut to exactly `MAX_TEXT_CHARS` characters.
pub fn truncate_text(text: String) -> String {
    if text.chars().count() <= MAX_TEXT_CHARS {
        return text;
    }
    text.trim().chars().take(MAX_TEXT_CHARS).collect()
}

fn scalar_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) | Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub(crate) fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => items.first().and_then(scalar_to_string),
        Value::Null | Value::Object(_) => None,
    }
}

/// ➕ `0 + value`: numbers stay, numeric text parses, leading digits win, everything else is 0.
fn add_zero(value: &Value) -> Value {
    match value {
        Value::Number(n) => Value::Number(n.clone()),
        Value::Bool(b) => Value::from(i64::from(*b)),
        Value::String(s) => parse_leading_number(s),
        _ => Value::from(0),
    }
}

fn parse_leading_number(text: &str) -> Value {
    let trimmed = text.trim();
    if let Ok(int) = trimmed.parse::<i64>() {
        return Value::from(int);
    }
    if let Some(float) = trimmed.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(float);
    }

    // 🔍 longest numeric-looking prefix: optional sign, digits, at most one dot
    let mut end = 0;
    let mut seen_dot = false;
    for (idx, ch) in trimmed.char_indices() {
        let ok = ch.is_ascii_digit()
            || (idx == 0 && (ch == '-' || ch == '+'))
            || (ch == '.' && !seen_dot);
        if !ok {
            break;
        }
        seen_dot |= ch == '.';
        end = idx + ch.len_utf8();
    }
    let prefix = trimmed[..end].trim_end_matches('.');
    if let Ok(int) = prefix.parse::<i64>() {
        return Value::from(int);
    }
    prefix
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::from(0))
}

fn coerce_date(value: &Value) -> Option<Value> {
    match value {
        Value::Number(n) => Some(Value::Number(n.clone())),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.parse::<f64>().is_ok() {
                return Some(parse_leading_number(trimmed));
            }
            match parse_epoch_seconds(trimmed) {
                Some(seconds) => Some(Value::from(seconds)),
                None => {
                    debug!("📅 dropping unparseable date value '{}'", trimmed);
                    None
                }
            }
        }
        _ => None,
    }
}

/// 📅 A handful of common date spellings → epoch seconds (naive ones are read as UTC).
pub fn parse_epoch_seconds(text: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Some(dt.timestamp());
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc().timestamp());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp())
}

//! Connector operation types
//!
//! Values exchanged with a resource: object identifiers, attribute sets,
//! update deltas, search filters and pages.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifier of an object on a resource, qualified by the attribute that holds it.
///
/// The engine addresses objects by the external side of a provision's key
/// mapping, so two uids with the same value but different attributes are
/// different objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Uid {
    attribute_name: String,
    value: String,
}

impl Uid {
    pub fn new(attribute_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute_name: attribute_name.into(),
            value: value.into(),
        }
    }

    /// Attribute holding the identifier (`uid`, `dn`, `id`, ...).
    pub fn attribute_name(&self) -> &str {
        &self.attribute_name
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl std::fmt::Display for Uid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.attribute_name, self.value)
    }
}

/// Attributes of one object, keyed by name.
///
/// Ordered, so snapshots, audit payloads and reports render the same way
/// on every run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeSet {
    #[serde(flatten)]
    attributes: BTreeMap<String, AttributeValue>,
}

impl AttributeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite one attribute.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.insert(name.into(), value.into());
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    /// Value of a single-valued text attribute.
    pub fn get_string(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(AttributeValue::as_string)
    }

    /// Text values of an attribute, single or multi-valued.
    pub fn get_strings(&self, name: &str) -> Option<Vec<&str>> {
        self.get(name).map(AttributeValue::as_strings)
    }

    pub fn has(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<AttributeValue> {
        self.attributes.remove(name)
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.attributes.iter()
    }

    /// Copy every attribute of `other` over this set.
    pub fn merge(&mut self, other: &AttributeSet) {
        for (name, value) in other.iter() {
            self.attributes.insert(name.clone(), value.clone());
        }
    }
}

/// Attribute value as it travels through JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Null,
    String(String),
    Integer(i64),
    Boolean(bool),
    Float(f64),
    /// Multi-valued attribute.
    Array(Vec<AttributeValue>),
}

impl AttributeValue {
    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Text values; a single string yields one element, non-text values none.
    pub fn as_strings(&self) -> Vec<&str> {
        match self {
            AttributeValue::String(s) => vec![s.as_str()],
            AttributeValue::Array(values) => {
                values.iter().filter_map(AttributeValue::as_string).collect()
            }
            _ => Vec::new(),
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            AttributeValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Text form of a scalar, used for correlation and filtering.
    pub fn to_text(&self) -> Option<String> {
        match self {
            AttributeValue::String(s) => Some(s.clone()),
            AttributeValue::Integer(i) => Some(i.to_string()),
            AttributeValue::Boolean(b) => Some(b.to_string()),
            AttributeValue::Float(f) => Some(f.to_string()),
            AttributeValue::Null | AttributeValue::Array(_) => None,
        }
    }

    fn texts(&self) -> Vec<String> {
        match self {
            AttributeValue::Array(values) => {
                values.iter().filter_map(AttributeValue::to_text).collect()
            }
            scalar => scalar.to_text().into_iter().collect(),
        }
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::String(s)
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::String(s.to_string())
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        AttributeValue::Integer(i)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Boolean(b)
    }
}

impl<T: Into<AttributeValue>> From<Vec<T>> for AttributeValue {
    fn from(values: Vec<T>) -> Self {
        AttributeValue::Array(values.into_iter().map(Into::into).collect())
    }
}

/// Modification of an existing object.
///
/// Cleared attributes are removed before replaced ones are written, so an
/// attribute both cleared and replaced ends up with the new value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeDelta {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub replace: BTreeMap<String, AttributeValue>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clear: Vec<String>,
}

impl AttributeDelta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delta overwriting every attribute of `attrs` and leaving the others alone.
    pub fn replacing(attrs: &AttributeSet) -> Self {
        Self {
            replace: attrs
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
            clear: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_replace(
        mut self,
        name: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.replace.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_clear(mut self, name: impl Into<String>) -> Self {
        self.clear.push(name.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.replace.is_empty() && self.clear.is_empty()
    }

    pub fn apply_to(&self, attrs: &mut AttributeSet) {
        for name in &self.clear {
            attrs.remove(name);
        }
        for (name, value) in &self.replace {
            attrs.set(name.clone(), value.clone());
        }
    }
}

/// Search filter, also used as the reconciliation filter of a task.
///
/// Serialized with a `type` tag:
/// `{"type": "starts_with", "attribute": "uid", "value": "a"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Filter {
    Equals { attribute: String, value: String },
    StartsWith { attribute: String, value: String },
    /// Attribute set to a non-null value.
    Present { attribute: String },
    And { filters: Vec<Filter> },
    Or { filters: Vec<Filter> },
    Not { filter: Box<Filter> },
}

impl Filter {
    pub fn equals(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Equals {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn starts_with(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::StartsWith {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn present(attribute: impl Into<String>) -> Self {
        Filter::Present {
            attribute: attribute.into(),
        }
    }

    /// Whether `attrs` satisfies the filter.
    ///
    /// A multi-valued attribute satisfies a comparison when one of its values does.
    pub fn matches(&self, attrs: &AttributeSet) -> bool {
        match self {
            Filter::Equals { attribute, value } => attrs
                .get(attribute)
                .is_some_and(|v| v.texts().iter().any(|t| t == value)),
            Filter::StartsWith { attribute, value } => attrs
                .get(attribute)
                .is_some_and(|v| v.texts().iter().any(|t| t.starts_with(value.as_str()))),
            Filter::Present { attribute } => attrs.get(attribute).is_some_and(|v| !v.is_null()),
            Filter::And { filters } => filters.iter().all(|f| f.matches(attrs)),
            Filter::Or { filters } => filters.iter().any(|f| f.matches(attrs)),
            Filter::Not { filter } => !filter.matches(attrs),
        }
    }
}

/// One page of a search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRequest {
    #[serde(default)]
    pub offset: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub fn new(page_size: u32) -> Self {
        Self {
            offset: 0,
            page_size,
        }
    }

    #[must_use]
    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Objects found by a search, one page at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub objects: Vec<AttributeSet>,

    /// Matches across all pages, when the resource knows it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u64>,

    pub has_more: bool,
}

impl SearchResult {
    pub fn new(objects: Vec<AttributeSet>) -> Self {
        Self {
            objects,
            total_count: None,
            has_more: false,
        }
    }

    #[must_use]
    pub fn with_total_count(mut self, count: u64) -> Self {
        self.total_count = Some(count);
        self
    }

    #[must_use]
    pub fn with_more(mut self) -> Self {
        self.has_more = true;
        self
    }
}

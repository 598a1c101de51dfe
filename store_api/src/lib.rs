use std::cmp::Ordering;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Field map of a stored document.
pub type Fields = Map<String, Value>;

/// Maximum number of predicates a single query may combine.
pub const MAX_FILTERS: usize = 2;

/// A document as returned by the store.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    #[serde(default)]
    pub fields: Fields,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Field value, treating an explicit `null` the same as a missing field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field).filter(|v| !v.is_null())
    }

    /// Non-empty string field.
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.get(field)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    pub fn reference(&self, collection: &str) -> DocRef {
        DocRef::new(collection, self.id.clone())
    }
}

/// Address of a document inside a collection.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct DocRef {
    pub collection: String,
    pub id: String,
}

impl DocRef {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for DocRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// A single predicate on a document field.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Filter {
    LessThan { field: String, value: Value },
    Equals { field: String, value: Value },
    NotNull { field: String },
}

impl Filter {
    pub fn less_than(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::LessThan {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Equals {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn not_null(field: impl Into<String>) -> Self {
        Filter::NotNull {
            field: field.into(),
        }
    }

    pub fn field(&self) -> &str {
        match self {
            Filter::LessThan { field, .. }
            | Filter::Equals { field, .. }
            | Filter::NotNull { field } => field,
        }
    }

    /// Evaluate the predicate. Missing and `null` fields never match.
    pub fn matches(&self, doc: &Document) -> bool {
        let Some(actual) = doc.get(self.field()) else {
            return false;
        };
        match self {
            Filter::LessThan { value, .. } => compare(actual, value) == Some(Ordering::Less),
            Filter::Equals { value, .. } => match compare(actual, value) {
                Some(ord) => ord == Ordering::Equal,
                None => actual == value,
            },
            Filter::NotNull { .. } => true,
        }
    }
}

/// Order two scalar values of the same JSON type. Mixed types do not compare.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Collection-scoped query.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub limit: Option<usize>,
    /// Resume strictly after this document id. Results are ordered by id
    /// whenever a cursor is given.
    #[serde(default)]
    pub start_after: Option<String>,
}

impl Query {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            filters: Vec::new(),
            limit: None,
            start_after: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn start_after(mut self, id: Option<String>) -> Self {
        self.start_after = id;
        self
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.filters.len() > MAX_FILTERS {
            return Err(StoreError::InvalidQuery(format!(
                "{} predicates on {}, at most {} supported",
                self.filters.len(),
                self.collection,
                MAX_FILTERS
            )));
        }
        if self.limit == Some(0) {
            return Err(StoreError::InvalidQuery("limit must be positive".into()));
        }
        Ok(())
    }

    /// True when the document passes every predicate and lies past the cursor.
    pub fn matches(&self, doc: &Document) -> bool {
        let after_cursor = self
            .start_after
            .as_deref()
            .map_or(true, |cursor| doc.id.as_str() > cursor);
        after_cursor && self.filters.iter().all(|f| f.matches(doc))
    }
}

/// Mutation of one field of a document.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FieldUpdate {
    Set { field: String, value: Value },
    Delete { field: String },
}

impl FieldUpdate {
    pub fn set(field: impl Into<String>, value: impl Into<Value>) -> Self {
        FieldUpdate::Set {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn delete(field: impl Into<String>) -> Self {
        FieldUpdate::Delete {
            field: field.into(),
        }
    }

    pub fn apply(&self, fields: &mut Fields) {
        match self {
            FieldUpdate::Set { field, value } => {
                fields.insert(field.clone(), value.clone());
            }
            FieldUpdate::Delete { field } => {
                fields.remove(field);
            }
        }
    }
}

/// Field updates for one document inside a batch.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DocUpdate {
    pub target: DocRef,
    pub updates: Vec<FieldUpdate>,
}

impl DocUpdate {
    pub fn new(target: DocRef, updates: Vec<FieldUpdate>) -> Self {
        Self { target, updates }
    }
}

/// Document store operation errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("transient store failure: {0}")]
    Transient(String),

    #[error("document not found: {0}")]
    NotFound(DocRef),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("batch of {size} operations exceeds limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Remote document store the sweeper reads from and mutates.
///
/// Batched writes are all-or-nothing: either every operation in the slice is
/// applied or none is.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Documents of one collection matching the query.
    async fn query(&self, query: &Query) -> StoreResult<Vec<Document>>;

    /// Point lookup by id.
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>>;

    /// Number of matching documents, ignoring `limit`.
    async fn count(&self, query: &Query) -> StoreResult<u64>;

    /// Delete every referenced document. Absent documents are skipped.
    async fn batch_delete(&self, refs: &[DocRef]) -> StoreResult<()>;

    /// Apply field updates. Fails as a whole if any target is absent.
    async fn batch_update(&self, updates: &[DocUpdate]) -> StoreResult<()>;

    fn backend_name(&self) -> &'static str;
}

//! Persisted document values crossing the storage boundary.
//!
//! The closed variant set mirrors what the document store can hold. The
//! [`crate::mapper`] module walks these into JSON-safe trees for runner
//! parameters and back.

use chrono::{DateTime, Utc};

/// A single value from a persisted document.
///
/// `Document` keeps key insertion order, which is why it is a pair list
/// rather than a map.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentValue {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Double(f64),
    /// High-precision decimal kept as its textual form until conversion.
    Decimal(String),
    String(String),
    DateTime(DateTime<Utc>),
    /// 24-hex object id.
    ObjectId(String),
    Uuid(uuid::Uuid),
    Binary(Vec<u8>),
    /// Source pattern of a stored regular expression.
    Regex(String),
    Array(Vec<DocumentValue>),
    Document(Vec<(String, DocumentValue)>),
}

impl DocumentValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            DocumentValue::Null => "null",
            DocumentValue::Boolean(_) => "boolean",
            DocumentValue::Int32(_) => "int32",
            DocumentValue::Int64(_) => "int64",
            DocumentValue::Double(_) => "double",
            DocumentValue::Decimal(_) => "decimal",
            DocumentValue::String(_) => "string",
            DocumentValue::DateTime(_) => "datetime",
            DocumentValue::ObjectId(_) => "objectid",
            DocumentValue::Uuid(_) => "uuid",
            DocumentValue::Binary(_) => "binary",
            DocumentValue::Regex(_) => "regex",
            DocumentValue::Array(_) => "array",
            DocumentValue::Document(_) => "document",
        }
    }

    /// Look up a key in a `Document` value.
    pub fn get(&self, key: &str) -> Option<&DocumentValue> {
        match self {
            DocumentValue::Document(pairs) => {
                pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v)
            }
            _ => None,
        }
    }

    pub fn is_document(&self) -> bool {
        matches!(self, DocumentValue::Document(_))
    }
}

impl From<&str> for DocumentValue {
    fn from(s: &str) -> Self {
        DocumentValue::String(s.to_string())
    }
}

impl From<i64> for DocumentValue {
    fn from(n: i64) -> Self {
        DocumentValue::Int64(n)
    }
}

impl From<f64> for DocumentValue {
    fn from(n: f64) -> Self {
        DocumentValue::Double(n)
    }
}

impl From<bool> for DocumentValue {
    fn from(b: bool) -> Self {
        DocumentValue::Boolean(b)
    }
}

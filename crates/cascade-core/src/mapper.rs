//! Data-contract mapper between persisted document values and JSON-safe trees.
//!
//! The conversion table is closed: every [`DocumentValue`] variant has a
//! defined JSON-safe form. An item that fails to convert is replaced by its
//! textual form and a warning is recorded against the parent key; conversion
//! of a tree never aborts.

use base64::Engine as _;
use chrono::SecondsFormat;
use serde_json::{Map, Value};
use tracing::warn;

use crate::value::DocumentValue;

/// A non-fatal conversion issue, keyed by the parent path of the offending
/// item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapperWarning {
    pub key: String,
    pub message: String,
}

/// An embedded file lifted out of a parameters tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    pub name: String,
    pub content: String,
    pub content_type: Option<String>,
    pub size: Option<u64>,
}

impl InputFile {
    /// Whether the content is base64-encoded binary rather than UTF-8 text.
    pub fn is_base64(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.contains("base64") || ct == "application/octet-stream")
    }
}

/// Convert a document value into a JSON-safe tree.
///
/// Returns the converted tree plus any warnings recorded along the way.
pub fn to_json(value: &DocumentValue) -> (Value, Vec<MapperWarning>) {
    let mut warnings = Vec::new();
    let json = convert(value, "$", &mut warnings);
    for w in &warnings {
        warn!(key = %w.key, message = %w.message, "lossy document conversion");
    }
    (json, warnings)
}

fn convert(value: &DocumentValue, key: &str, warnings: &mut Vec<MapperWarning>) -> Value {
    match value {
        DocumentValue::Null => Value::Null,
        DocumentValue::Boolean(b) => Value::Bool(*b),
        DocumentValue::Int32(n) => Value::from(*n),
        DocumentValue::Int64(n) => Value::from(*n),
        DocumentValue::Double(n) => match serde_json::Number::from_f64(*n) {
            Some(num) => Value::Number(num),
            None => {
                warnings.push(MapperWarning {
                    key: key.to_string(),
                    message: format!("non-finite double {n} converted to string"),
                });
                Value::String(n.to_string())
            }
        },
        // Documented precision loss: high-precision decimals become f64.
        DocumentValue::Decimal(s) => match s.parse::<f64>().map(serde_json::Number::from_f64) {
            Ok(Some(num)) => Value::Number(num),
            _ => {
                warnings.push(MapperWarning {
                    key: key.to_string(),
                    message: format!("decimal '{s}' not representable as double, kept as string"),
                });
                Value::String(s.clone())
            }
        },
        DocumentValue::String(s) => Value::String(s.clone()),
        DocumentValue::DateTime(dt) => {
            Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        }
        DocumentValue::ObjectId(hex) => Value::String(hex.clone()),
        DocumentValue::Uuid(u) => Value::String(u.to_string()),
        DocumentValue::Binary(bytes) => {
            Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
        }
        DocumentValue::Regex(pattern) => Value::String(pattern.clone()),
        DocumentValue::Array(items) => Value::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| convert(item, &format!("{key}[{i}]"), warnings))
                .collect(),
        ),
        DocumentValue::Document(pairs) => {
            let mut map = Map::new();
            for (k, v) in pairs {
                map.insert(k.clone(), convert(v, &format!("{key}.{k}"), warnings));
            }
            Value::Object(map)
        }
    }
}

/// Convert a JSON-safe tree back into a document value.
///
/// Integers become `Int64`, other numbers `Double`; objects and arrays
/// convert recursively.
pub fn from_json(value: &Value) -> DocumentValue {
    match value {
        Value::Null => DocumentValue::Null,
        Value::Bool(b) => DocumentValue::Boolean(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                DocumentValue::Int64(i)
            } else {
                DocumentValue::Double(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => DocumentValue::String(s.clone()),
        Value::Array(items) => DocumentValue::Array(items.iter().map(from_json).collect()),
        Value::Object(map) => DocumentValue::Document(
            map.iter().map(|(k, v)| (k.clone(), from_json(v))).collect(),
        ),
    }
}

/// Collect embedded files declared anywhere in a parameters tree.
///
/// Any object carrying both `filename` and `content` string keys is lifted
/// into an [`InputFile`]; `contentType` and `fileSize` are honored when
/// present. A legacy list under the top-level `inputFiles` key is also
/// recognized.
pub fn extract_input_files(params: &Value) -> Vec<InputFile> {
    let mut files = Vec::new();
    collect_files(params, &mut files);

    if let Some(Value::Array(legacy)) = params.get("inputFiles") {
        for item in legacy {
            if let Some(file) = as_input_file(item) {
                if !files.contains(&file) {
                    files.push(file);
                }
            }
        }
    }

    files
}

fn collect_files(value: &Value, out: &mut Vec<InputFile>) {
    match value {
        Value::Object(map) => {
            if let Some(file) = as_input_file(value) {
                out.push(file);
                return;
            }
            for (key, child) in map {
                // The legacy list is handled separately by the caller.
                if key == "inputFiles" {
                    continue;
                }
                collect_files(child, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_files(item, out);
            }
        }
        _ => {}
    }
}

fn as_input_file(value: &Value) -> Option<InputFile> {
    let map = value.as_object()?;
    let name = map.get("filename")?.as_str()?;
    let content = map.get("content")?.as_str()?;
    Some(InputFile {
        name: name.to_string(),
        content: content.to_string(),
        content_type: map
            .get("contentType")
            .and_then(Value::as_str)
            .map(str::to_string),
        size: map.get("fileSize").and_then(Value::as_u64),
    })
}

//! The in-flight currency between nodes: a JSON-safe payload plus metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Output published by a completed node, consumed by its dependents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataContract {
    pub source_node_id: String,
    /// Set when the contract is addressed to a specific consumer.
    pub target_node_id: Option<String>,
    pub data: serde_json::Value,
    pub data_type: DataContractType,
    pub timestamp: DateTime<Utc>,
    pub metadata: ContractMetadata,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataContractType {
    #[default]
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContractMetadata {
    pub size_bytes: usize,
    pub content_type: String,
}

impl DataContract {
    pub fn new(source_node_id: &str, data: serde_json::Value) -> Self {
        let size_bytes = serde_json::to_string(&data).map(|s| s.len()).unwrap_or(0);
        Self {
            source_node_id: source_node_id.to_string(),
            target_node_id: None,
            data,
            data_type: DataContractType::Json,
            timestamp: Utc::now(),
            metadata: ContractMetadata {
                size_bytes,
                content_type: "application/json".to_string(),
            },
        }
    }

    /// Pick a named field out of the contract payload.
    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.data.get(name)
    }
}

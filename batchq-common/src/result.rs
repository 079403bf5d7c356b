//! Results as they sit in the result store.

use serde::{Deserialize, Serialize};

/// One ranked class prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub probability: f32,
}

impl Prediction {
    pub fn new(label: impl Into<String>, probability: f32) -> Self {
        Self {
            label: label.into(),
            probability,
        }
    }
}

/// Value written under a job id once the worker is done with it.
///
/// Failed jobs get an error marker instead of predictions so the waiting
/// gateway can answer immediately rather than time out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StoredResult {
    Ok { predictions: Vec<Prediction> },
    Error { error: String },
}

impl StoredResult {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

//! # Provenance Records
//!
//! Every dataset produced by an apply operation carries a provenance record in
//! its Parquet footer: which operation ran, under which process number, with
//! which inputs and parameters. Path inputs are kept symbolic (the container
//! path, never the resolved values) and literals are kept literal, so the full
//! derivation chain of any output can be walked back to raw data.
//!
//! Records are written once at apply time and never mutated afterward.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::reference::DataPath;

/// Errors from provenance (de)serialization
#[derive(Debug, thiserror::Error)]
pub enum ProvenanceError {
    /// JSON serialization error
    #[error("provenance JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// One positional argument as recorded in a provenance record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ArgumentRef {
    /// A resolved dataset reference, kept symbolic
    Path(DataPath),
    /// A literal string passed through unchanged
    Literal(String),
}

/// Provenance record attached to an apply-produced dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    /// Operation name the apply call was invoked with
    pub operation: String,

    /// Zero-padded process number (the `NNN` in `process/NNN-<op>`)
    pub operation_number: String,

    /// Name this output was stored under
    pub output_name: String,

    /// RFC 3339 timestamp of the apply call
    pub timestamp: String,

    /// Positional inputs, in call order
    pub inputs: Vec<ArgumentRef>,

    /// Keyword parameters forwarded to the operation
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

impl ProvenanceRecord {
    /// Serialize to JSON for the Parquet footer
    pub fn to_json(&self) -> Result<String, ProvenanceError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from footer JSON
    pub fn from_json(json: &str) -> Result<Self, ProvenanceError> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> ProvenanceRecord {
        let mut parameters = BTreeMap::new();
        parameters.insert("order".to_string(), serde_json::json!(1));
        ProvenanceRecord {
            operation: "plane_level".to_string(),
            operation_number: "001".to_string(),
            output_name: "leveled".to_string(),
            timestamp: "2026-08-30T12:00:00Z".to_string(),
            inputs: vec![
                ArgumentRef::Path(DataPath::new("data/scan01/HeightTrace")),
                ArgumentRef::Literal("mask=none".to_string()),
            ],
            parameters,
        }
    }

    #[test]
    fn test_json_round_trip() {
        let record = sample_record();
        let json = record.to_json().unwrap();
        let back = ProvenanceRecord::from_json(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_paths_stay_symbolic() {
        let json = sample_record().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["inputs"][0]["kind"], "path");
        assert_eq!(value["inputs"][0]["value"], "data/scan01/HeightTrace");
        assert_eq!(value["inputs"][1]["kind"], "literal");
    }
}

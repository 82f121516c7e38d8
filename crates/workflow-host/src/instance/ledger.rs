//! Idempotent operation ledger

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::engine::OperationResponse;

/// Responses already delivered by idempotent operations, keyed by operation name
///
/// Entries are written into the checkpoint together with the response path,
/// before the caller's responder is completed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationLedger {
    entries: BTreeMap<String, OperationResponse>,
}

impl OperationLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore from a checkpoint value (`None` gives an empty ledger)
    pub fn from_value(value: Option<&serde_json::Value>) -> Result<Self, serde_json::Error> {
        match value {
            Some(value) => serde_json::from_value(value.clone()),
            None => Ok(Self::new()),
        }
    }

    /// Checkpoint value
    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Record a delivered response, replacing any previous one
    pub fn record(&mut self, operation: impl Into<String>, response: OperationResponse) {
        self.entries.insert(operation.into(), response);
    }

    /// Previously delivered response
    pub fn get(&self, operation: &str) -> Option<&OperationResponse> {
        self.entries.get(operation)
    }

    /// Check if an operation has a recorded response
    pub fn contains(&self, operation: &str) -> bool {
        self.entries.contains_key(operation)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the ledger is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_get() {
        let mut ledger = OperationLedger::new();
        assert!(ledger.is_empty());

        ledger.record("Approve", OperationResponse::Value(serde_json::json!("R")));
        ledger.record("Ping", OperationResponse::Void);

        assert_eq!(ledger.len(), 2);
        assert!(ledger.contains("Ping"));
        assert_eq!(
            ledger.get("Approve"),
            Some(&OperationResponse::Value(serde_json::json!("R")))
        );
        assert!(ledger.get("Reject").is_none());
    }

    #[test]
    fn test_checkpoint_value_shape() {
        let mut ledger = OperationLedger::new();
        ledger.record("Approve", OperationResponse::Value(serde_json::json!(7)));

        let value = ledger.to_value().unwrap();
        assert_eq!(
            value,
            serde_json::json!({ "Approve": { "kind": "value", "value": 7 } })
        );

        let restored = OperationLedger::from_value(Some(&value)).unwrap();
        assert_eq!(restored, ledger);
        assert!(OperationLedger::from_value(None).unwrap().is_empty());
    }
}

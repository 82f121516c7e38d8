//! CheckpointStore trait definition

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::{CompletionState, InstanceState};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Store temporarily unavailable
    #[error("checkpoint store unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Extra key/value pairs saved next to the engine state
pub type CheckpointValues = BTreeMap<String, serde_json::Value>;

/// Keys the host itself reserves in [`CheckpointValues`]
pub mod reserved_keys {
    /// Idempotent operation ledger
    pub const OPERATIONS: &str = "host.operations";

    /// Durable timer table
    pub const TIMERS: &str = "host.timers";

    /// Prefix of every reserved key; extensions must not use it
    pub const PREFIX: &str = "host.";
}

/// Snapshot of a process instance
///
/// The engine state is opaque to the host. A checkpoint carrying a
/// completion state is terminal: the host answers from it without ever
/// recreating the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    /// Definition that produced the engine state
    pub definition: String,

    /// Engine lifecycle state at save time
    pub instance_state: InstanceState,

    /// Opaque engine state
    pub engine_state: serde_json::Value,

    /// Terminal state (terminal checkpoints only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion: Option<CompletionState>,

    /// Host and extension values
    #[serde(default)]
    pub values: CheckpointValues,

    /// When the checkpoint was taken
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Whether this checkpoint records a completed instance
    pub fn is_terminal(&self) -> bool {
        self.completion.is_some()
    }

    /// Look up a value
    pub fn value(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }
}

/// Store for instance checkpoints
///
/// Implementations must be read-your-writes consistent for a single
/// instance identity. Last write wins per instance.
#[async_trait]
pub trait CheckpointStore: Send + Sync + 'static {
    /// Load the last checkpoint of an instance
    async fn load_checkpoint(&self, instance_id: Uuid) -> Result<Option<Checkpoint>, StoreError>;

    /// Save (replace) the checkpoint of an instance
    async fn save_checkpoint(
        &self,
        instance_id: Uuid,
        checkpoint: &Checkpoint,
    ) -> Result<(), StoreError>;

    /// Remove the checkpoint of an instance
    async fn delete_checkpoint(&self, instance_id: Uuid) -> Result<(), StoreError>;
}

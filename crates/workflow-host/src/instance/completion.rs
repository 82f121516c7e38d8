//! Completion record of a finished instance

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::{CompletionOutcome, CompletionState, Outputs, ProcessFault};
use crate::error::HostError;
use crate::persistence::Checkpoint;

/// Terminal snapshot of an instance
///
/// Created once, when the instance completes (or when a terminal checkpoint
/// is read). Queries go through [`result`](CompletionRecord::result) and never
/// touch the engine again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRecord {
    /// Instance identity
    pub instance_id: Uuid,

    /// How the instance ended
    pub outcome: CompletionOutcome,

    /// Output values (`Closed` only)
    pub outputs: Option<Outputs>,

    /// Termination fault (`Faulted` only)
    pub fault: Option<ProcessFault>,

    /// When the record was produced
    pub completed_at: DateTime<Utc>,
}

impl CompletionRecord {
    /// Build a record from the engine's completion state
    pub fn new(instance_id: Uuid, state: CompletionState) -> Self {
        let (outputs, fault) = match state.outcome {
            CompletionOutcome::Closed => (Some(state.outputs.unwrap_or_default()), None),
            CompletionOutcome::Canceled => (None, None),
            CompletionOutcome::Faulted => (
                None,
                Some(
                    state
                        .fault
                        .unwrap_or_else(|| ProcessFault::new("process faulted without a reason")),
                ),
            ),
        };

        Self {
            instance_id,
            outcome: state.outcome,
            outputs,
            fault,
            completed_at: Utc::now(),
        }
    }

    /// Build a record from a terminal checkpoint (`None` if it is not terminal)
    pub fn from_checkpoint(instance_id: Uuid, checkpoint: &Checkpoint) -> Option<Self> {
        let state = checkpoint.completion.clone()?;
        let mut record = Self::new(instance_id, state);
        record.completed_at = checkpoint.saved_at;
        Some(record)
    }

    /// Outputs for `Closed`, the fault for `Faulted`, [`HostError::Canceled`] for `Canceled`
    pub fn result(&self) -> Result<Outputs, HostError> {
        match self.outcome {
            CompletionOutcome::Closed => Ok(self.outputs.clone().unwrap_or_default()),
            CompletionOutcome::Canceled => Err(HostError::Canceled),
            CompletionOutcome::Faulted => Err(HostError::Faulted(
                self.fault
                    .clone()
                    .unwrap_or_else(|| ProcessFault::new("process faulted without a reason")),
            )),
        }
    }

    /// Completion state as stored in checkpoints
    pub fn state(&self) -> CompletionState {
        CompletionState {
            outcome: self.outcome,
            outputs: self.outputs.clone(),
            fault: self.fault.clone(),
        }
    }
}

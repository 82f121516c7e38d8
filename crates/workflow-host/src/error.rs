//! Host error taxonomy

use std::time::Duration;

use uuid::Uuid;

use crate::engine::{EngineError, OperationResponse, ProcessFault};
use crate::persistence::{ExtensionError, StoreError};
use crate::reminder::ReminderError;

/// Errors surfaced by [`WorkflowHost`](crate::WorkflowHost) operations
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// The gate could not be acquired in time; nothing was touched
    #[error("operation could not be scheduled within {0:?}")]
    SchedulingTimeout(Duration),

    /// Bookmark resumption before the first run after create/reload
    #[error("instance {0} is not ready for bookmark resumption")]
    InstanceNotReady(Uuid),

    /// The operation already ran; carries the recorded response
    #[error("operation {operation} was already executed")]
    RepeatedOperation {
        operation: String,
        response: Option<OperationResponse>,
    },

    /// The operation bookmark is gone and no response was recorded
    #[error("operation {0} was canceled")]
    OperationCanceled(String),

    /// The process faulted
    #[error("process faulted: {0}")]
    Faulted(ProcessFault),

    /// The process was canceled
    #[error("process was canceled")]
    Canceled,

    /// Control operation issued after completion
    #[error("instance {0} already completed")]
    InstanceCompleted(Uuid),

    /// No business response arrived in time
    #[error("operation {operation} got no response within {timeout:?}")]
    ResponseTimeout { operation: String, timeout: Duration },

    /// Checkpoint store error
    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),

    /// Persistence extension error
    #[error("{0}")]
    Extension(#[from] ExtensionError),

    /// Engine error
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Reminder service error
    #[error("reminder error: {0}")]
    Reminder(#[from] ReminderError),

    /// Typed request or response did not (de)serialize
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HostError {
    /// The previous response of a replayed operation
    ///
    /// Returns `Some` only for [`HostError::RepeatedOperation`], so callers
    /// can treat a replay as success:
    ///
    /// ```ignore
    /// let response = match host.invoke("Approve", request).await {
    ///     Ok(response) => response,
    ///     Err(e) => e.replayed_response().ok_or(e)?,
    /// };
    /// ```
    pub fn replayed_response(&self) -> Option<OperationResponse> {
        match self {
            Self::RepeatedOperation {
                response: Some(response),
                ..
            } => Some(response.clone()),
            Self::RepeatedOperation { response: None, .. } => Some(OperationResponse::Void),
            _ => None,
        }
    }

    /// Whether the failure left no trace on the instance and can be retried as is
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SchedulingTimeout(_) | Self::Persistence(StoreError::Unavailable(_))
        )
    }
}

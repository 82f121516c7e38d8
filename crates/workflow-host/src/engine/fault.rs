//! Process faults and terminal completion states

use serde::{Deserialize, Serialize};

use super::Outputs;

/// A fault raised inside the process engine
///
/// Faults are cloned when a single stored fault is dispatched to several
/// waiters, so they carry owned data only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessFault {
    /// Fault message
    pub message: String,

    /// Fault type/code for programmatic handling
    pub fault_type: Option<String>,

    /// Additional fault details (for debugging)
    pub details: Option<serde_json::Value>,
}

impl ProcessFault {
    /// Create a new fault
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fault_type: None,
            details: None,
        }
    }

    /// Set the fault type
    pub fn with_type(mut self, fault_type: impl Into<String>) -> Self {
        self.fault_type = Some(fault_type.into());
        self
    }

    /// Add fault details
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl std::fmt::Display for ProcessFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.fault_type {
            Some(fault_type) => write!(f, "{}: {}", fault_type, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ProcessFault {}

/// How a completed process instance ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionOutcome {
    /// Completed normally with output values
    Closed,

    /// Cancelled before completing
    Canceled,

    /// Terminated by a fault
    Faulted,
}

impl std::fmt::Display for CompletionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Canceled => write!(f, "canceled"),
            Self::Faulted => write!(f, "faulted"),
        }
    }
}

/// Terminal state reported by the engine once an instance is complete
///
/// This is also what a terminal checkpoint carries, so a completed instance
/// can be answered from storage without recreating the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionState {
    /// Outcome of the instance
    pub outcome: CompletionOutcome,

    /// Output values (only for `Closed`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Outputs>,

    /// Termination fault (only for `Faulted`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<ProcessFault>,
}

impl CompletionState {
    /// Normal completion with outputs
    pub fn closed(outputs: Outputs) -> Self {
        Self {
            outcome: CompletionOutcome::Closed,
            outputs: Some(outputs),
            fault: None,
        }
    }

    /// Cancelled completion
    pub fn canceled() -> Self {
        Self {
            outcome: CompletionOutcome::Canceled,
            outputs: None,
            fault: None,
        }
    }

    /// Faulted completion
    pub fn faulted(fault: ProcessFault) -> Self {
        Self {
            outcome: CompletionOutcome::Faulted,
            outputs: None,
            fault: Some(fault),
        }
    }
}

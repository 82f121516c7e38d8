//! Process engine contract
//!
//! The engine that evaluates a process definition is an external
//! collaborator. The host only relies on the traits below.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    Bookmark, BookmarkResumptionResult, BookmarkValue, CompletionState, ProcessFault, RunContext,
};

/// Input arguments of a new process instance
pub type Inputs = BTreeMap<String, serde_json::Value>;

/// Output values of a closed process instance
pub type Outputs = BTreeMap<String, serde_json::Value>;

/// Lifecycle state of an engine session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    /// Created or loaded, has work to execute before the next suspension point
    Runnable,

    /// Suspended, waiting for bookmarks or timers
    Idle,

    /// Finished; a completion state is available
    Complete,

    /// In-memory state can no longer be trusted; only a reload can proceed
    Aborted,
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Runnable => write!(f, "runnable"),
            Self::Idle => write!(f, "idle"),
            Self::Complete => write!(f, "complete"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// How a call to [`ProcessEngine::run`] ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    /// The engine reached a suspension point
    Idle {
        /// Whether the engine allows persisting at this point
        persistable: bool,
    },

    /// The instance reached a terminal state
    Completed,

    /// A fault escaped every fault handler of the process definition
    ///
    /// The engine waits for a disposition (abort, cancel or terminate)
    /// before it can make further progress.
    UnhandledFault {
        fault: ProcessFault,
        /// Hint naming the step that raised the fault
        source: Option<String>,
    },
}

/// Errors raised by the engine itself (not by the process it runs)
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Engine state could not be (de)serialized
    #[error("engine state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Checkpoint belongs to another definition
    #[error("checkpoint of definition {found} cannot be loaded by {expected}")]
    DefinitionMismatch { expected: String, found: String },

    /// Engine failed while executing
    #[error("engine failure: {0}")]
    Execution(String),
}

/// Stateless template of a process, shared by every instance of it
///
/// The host keeps one `Arc<dyn ProcessDefinition>` and asks it for a fresh
/// engine session whenever an instance is created or reloaded.
pub trait ProcessDefinition: Send + Sync + 'static {
    /// Definition identity, recorded in checkpoints
    fn name(&self) -> &str;

    /// Create a new engine session from inputs (state: `Runnable`)
    fn create(&self, inputs: Inputs) -> Result<Box<dyn ProcessEngine>, EngineError>;

    /// Recreate an engine session from persisted engine state
    fn load(&self, engine_state: serde_json::Value) -> Result<Box<dyn ProcessEngine>, EngineError>;
}

/// One running session of a process definition
///
/// Execution is cooperative: [`run`](ProcessEngine::run) returns only once
/// the engine is idle, complete, or needs a fault disposition.
#[async_trait]
pub trait ProcessEngine: Send {
    /// Current lifecycle state
    fn state(&self) -> InstanceState;

    /// Queue input against a named suspension point
    fn schedule_bookmark_resumption(
        &mut self,
        bookmark: &Bookmark,
        value: BookmarkValue,
    ) -> BookmarkResumptionResult;

    /// Execute until the next suspension point
    async fn run(&mut self, ctx: &mut RunContext) -> Result<RunStatus, EngineError>;

    /// Terminal state, once complete
    fn completion_state(&self) -> Option<CompletionState>;

    /// Capture engine-internal state for a checkpoint
    fn save_state(&self) -> Result<serde_json::Value, EngineError>;

    /// Request cancellation; cancellation handlers run on the next `run`
    fn cancel(&mut self);

    /// Request termination with a fault; takes effect on the next `run`
    fn terminate(&mut self, reason: ProcessFault);

    /// Abandon the in-memory session immediately
    fn abort(&mut self, reason: &str);
}

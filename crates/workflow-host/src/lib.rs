//! # Workflow Host
//!
//! Execution coordinator for one long-running, checkpointable process
//! instance owned by a single-threaded entity.
//!
//! ## Features
//!
//! - **Serialized access**: every call passes a single-slot gate; the gate is released on every exit path
//! - **Recovery**: aborted instances are recreated from their last checkpoint on the next call
//! - **Idempotent operations**: delivered responses are checkpointed and replayed instead of re-executed
//! - **Durable timers**: engine delays are registered as reminders that survive restarts
//! - **Fault routing**: unhandled faults reach the waiting caller, or the entity when nobody waits
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkflowHost                           │
//! │  (gate, prepare/reload, operations, fault routing)          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     WorkflowInstance                         │
//! │  (engine session, idle policy, checkpoints, timer table)    │
//! └─────────────────────────────────────────────────────────────┘
//!               │                                 │
//!               ▼                                 ▼
//! ┌──────────────────────────┐     ┌──────────────────────────┐
//! │     CheckpointStore       │     │     ReminderService       │
//! │  (memory / PostgreSQL)    │     │  (durable named timers)   │
//! └──────────────────────────┘     └──────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use workflow_host::prelude::*;
//!
//! let host = WorkflowHost::new(instance_id, definition, store, reminders)
//!     .with_config(HostConfig::from_env()?)
//!     .with_entity(Arc::new(MyEntity));
//!
//! host.start().await?;
//! let receipt = host.call::<Approve>(request).await?;
//! let outputs = host.run_to_completion().await?;
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod instance;
pub mod persistence;
pub mod reminder;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::{HostConfig, IdlePersistenceMode, UnhandledExceptionAction};
    pub use crate::engine::{
        Bookmark, BookmarkResumptionResult, BookmarkValue, CompletionOutcome, CompletionState,
        EngineError, Inputs, InstanceState, OperationRequest, OperationResponse, Outputs,
        ProcessDefinition, ProcessEngine, ProcessFault, RunContext, RunStatus,
    };
    pub use crate::error::HostError;
    pub use crate::host::{Operation, WorkflowEntity, WorkflowHost};
    pub use crate::instance::CompletionRecord;
    pub use crate::persistence::{
        CheckpointStore, InMemoryCheckpointStore, PersistenceExtension, PostgresCheckpointStore,
    };
    pub use crate::reminder::{InMemoryReminderService, ReminderService};
}

// Re-export key types at crate root
pub use config::{HostConfig, IdlePersistenceMode, UnhandledExceptionAction};
pub use engine::{
    Bookmark, CompletionOutcome, InstanceState, OperationResponse, ProcessDefinition,
    ProcessEngine, ProcessFault,
};
pub use error::HostError;
pub use host::{Operation, WorkflowEntity, WorkflowHost};
pub use instance::{CompletionRecord, WorkflowInstance};
pub use persistence::{Checkpoint, CheckpointStore, InMemoryCheckpointStore, PostgresCheckpointStore};
pub use reminder::{InMemoryReminderService, ReminderService};

//! Process engine abstractions
//!
//! This module defines the contract of the embedded process engine:
//! - [`ProcessDefinition`] shared template that creates and reloads sessions
//! - [`ProcessEngine`] one running session
//! - [`RunContext`] requests an engine records while running
//! - [`ProcessFault`] / [`CompletionState`] faults and terminal states

mod context;
mod definition;
mod fault;

pub use context::{
    Bookmark, BookmarkResumptionResult, BookmarkValue, EngineRequest, OperationRequest,
    OperationResponse, RequestProducer, Responder, RunContext,
};
pub use definition::{
    EngineError, InstanceState, Inputs, Outputs, ProcessDefinition, ProcessEngine, RunStatus,
};
pub use fault::{CompletionOutcome, CompletionState, ProcessFault};

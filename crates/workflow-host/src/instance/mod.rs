//! Process instance lifecycle
//!
//! This module provides:
//! - [`WorkflowInstance`] adapter owning one engine session
//! - [`CompletionRecord`] terminal snapshot of a finished instance
//! - [`OperationLedger`] responses of idempotent operations

mod adapter;
mod completion;
mod ledger;

pub use adapter::{InstanceServices, RunOutcome, WorkflowInstance};
pub use completion::CompletionRecord;
pub use ledger::OperationLedger;

//! Execution coordinator
//!
//! This module provides:
//! - [`WorkflowHost`] serializing every call against one process instance
//! - [`Gate`] single-slot async gate owning the coordinator state
//! - [`ActiveWaiters`] routing of unhandled faults to waiting callers
//! - [`WorkflowEntity`] callbacks into the owning entity
//! - [`Operation`] typed operation dispatch

mod coordinator;
mod entity;
mod gate;
mod operation;
mod waiters;

pub use coordinator::WorkflowHost;
pub use entity::{DefaultEntity, WorkflowEntity};
pub use gate::{Gate, GateGuard};
pub use operation::{decode_response, Operation};
pub use waiters::{ActiveWaiters, WaiterHandle, WaiterKind};

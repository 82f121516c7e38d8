//! Callbacks into the entity that owns a workflow host

use async_trait::async_trait;

use crate::engine::{Inputs, ProcessFault};
use crate::instance::CompletionRecord;

/// Owning entity of one process instance
///
/// Every method has a default, so an entity only overrides what it needs.
#[async_trait]
pub trait WorkflowEntity: Send + Sync + 'static {
    /// Inputs of a brand-new instance (no checkpoint exists yet)
    async fn on_starting(&self) -> Result<Inputs, ProcessFault> {
        Ok(Inputs::new())
    }

    /// A fault escaped the process while no caller was waiting
    ///
    /// Returns whether the entity handled it. The host's configured
    /// disposition is applied either way.
    async fn on_unhandled_exception(&self, fault: &ProcessFault, source: Option<&str>) -> bool {
        let _ = (fault, source);
        false
    }

    /// The instance completed
    async fn on_completed(&self, record: &CompletionRecord) {
        let _ = record;
    }
}

/// Entity with default callbacks (empty inputs, nothing handled)
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultEntity;

impl WorkflowEntity for DefaultEntity {}

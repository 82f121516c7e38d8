//! Persistence extensions
//!
//! Extensions contribute their own key/value pairs to every checkpoint and
//! get them back when the instance is reloaded.

use async_trait::async_trait;

use super::CheckpointValues;

/// Error raised by a persistence extension
#[derive(Debug, thiserror::Error)]
#[error("persistence extension {extension} failed: {message}")]
pub struct ExtensionError {
    /// Extension name
    pub extension: String,

    /// What went wrong
    pub message: String,
}

impl ExtensionError {
    /// Create an extension error
    pub fn new(extension: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
            message: message.into(),
        }
    }
}

/// Hook into the checkpoint write path
///
/// Any error aborts the instance handle: the in-memory state no longer
/// matches what is durable.
///
/// # Example
///
/// ```ignore
/// struct AuditTrail { entries: parking_lot::Mutex<Vec<String>> }
///
/// #[async_trait]
/// impl PersistenceExtension for AuditTrail {
///     fn name(&self) -> &str { "audit" }
///
///     async fn collect_values(&self, values: &mut CheckpointValues) -> Result<(), ExtensionError> {
///         values.insert("audit.entries".into(), json!(*self.entries.lock()));
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait PersistenceExtension: Send + Sync + 'static {
    /// Extension name (used in logs and errors)
    fn name(&self) -> &str;

    /// Contribute or transform values before the physical write
    async fn collect_values(&self, values: &mut CheckpointValues) -> Result<(), ExtensionError>;

    /// Called after the checkpoint was written
    async fn on_saved(&self, values: &CheckpointValues) -> Result<(), ExtensionError> {
        let _ = values;
        Ok(())
    }

    /// Restore from the values of a loaded checkpoint
    fn load_values(&self, values: &CheckpointValues) -> Result<(), ExtensionError> {
        let _ = values;
        Ok(())
    }
}

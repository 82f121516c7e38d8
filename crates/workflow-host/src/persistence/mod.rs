//! Persistence layer for process instances
//!
//! This module provides:
//! - [`CheckpointStore`] trait for loading and saving instance checkpoints
//! - [`PersistenceExtension`] hooks on the checkpoint write path
//! - [`InMemoryCheckpointStore`] for testing
//! - [`PostgresCheckpointStore`] for production

mod extension;
mod memory;
mod postgres;
mod store;

pub use extension::{ExtensionError, PersistenceExtension};
pub use memory::InMemoryCheckpointStore;
pub use postgres::PostgresCheckpointStore;
pub use store::{reserved_keys, Checkpoint, CheckpointStore, CheckpointValues, StoreError};

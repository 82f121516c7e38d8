//! In-memory implementation of CheckpointStore for testing

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use super::store::*;

/// In-memory implementation of CheckpointStore
///
/// This is primarily for testing and embedded use. Failures can be injected
/// to exercise the abort/reload paths of the host.
///
/// # Example
///
/// ```
/// use workflow_host::InMemoryCheckpointStore;
///
/// let store = InMemoryCheckpointStore::new();
/// assert_eq!(store.write_count(), 0);
/// ```
pub struct InMemoryCheckpointStore {
    checkpoints: RwLock<HashMap<Uuid, Checkpoint>>,
    writes: AtomicUsize,
    reads: AtomicUsize,
    fail_saves: AtomicBool,
    fail_loads: AtomicBool,
}

impl InMemoryCheckpointStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self {
            checkpoints: RwLock::new(HashMap::new()),
            writes: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
            fail_saves: AtomicBool::new(false),
            fail_loads: AtomicBool::new(false),
        }
    }

    /// Number of successful checkpoint writes
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of checkpoint reads
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Get a copy of the stored checkpoint of an instance
    pub fn checkpoint(&self, instance_id: Uuid) -> Option<Checkpoint> {
        self.checkpoints.read().get(&instance_id).cloned()
    }

    /// Store a checkpoint directly (seeding tests)
    pub fn insert(&self, instance_id: Uuid, checkpoint: Checkpoint) {
        self.checkpoints.write().insert(instance_id, checkpoint);
    }

    /// Make every save fail until reset
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Make every load fail until reset
    pub fn set_fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        self.checkpoints.write().clear();
    }
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load_checkpoint(&self, instance_id: Uuid) -> Result<Option<Checkpoint>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected load failure".to_string()));
        }
        Ok(self.checkpoints.read().get(&instance_id).cloned())
    }

    async fn save_checkpoint(
        &self,
        instance_id: Uuid,
        checkpoint: &Checkpoint,
    ) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected save failure".to_string()));
        }
        self.checkpoints
            .write()
            .insert(instance_id, checkpoint.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_checkpoint(&self, instance_id: Uuid) -> Result<(), StoreError> {
        self.checkpoints.write().remove(&instance_id);
        Ok(())
    }
}

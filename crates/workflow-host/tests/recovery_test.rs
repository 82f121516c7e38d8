//! Reload from checkpoints, persistence extensions and gate timeouts

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use common::{inputs, test_config, Harness, OpBehavior, Script, Snapshot};
use workflow_host::engine::EngineError;
use workflow_host::persistence::{
    reserved_keys, CheckpointValues, ExtensionError, PersistenceExtension,
};
use workflow_host::{HostError, IdlePersistenceMode, InstanceState, WorkflowHost};

fn approval_script() -> Script {
    Script::new().operation(
        "Approve",
        OpBehavior::Respond {
            idempotent: false,
            once: false,
        },
    )
}

#[test_log::test(tokio::test)]
async fn test_runnable_checkpoint_reload_persists_on_starting() {
    let h = Harness::with_config(
        approval_script(),
        test_config().with_idle_persistence(IdlePersistenceMode::OnStarting),
    );
    h.seed(
        Snapshot::fresh(inputs(&[("amount", json!(3))])),
        CheckpointValues::new(),
    );

    h.host.start().await.unwrap();

    assert_eq!(h.stats().loads(), 1);
    assert_eq!(h.stats().creates(), 0);
    assert_eq!(h.entity.starts.load(Ordering::SeqCst), 0);
    // The reloaded runnable instance counts as starting
    assert_eq!(h.store.write_count(), 1);
    assert_eq!(h.stored_snapshot().unwrap().state, InstanceState::Idle);
}

#[tokio::test]
async fn test_idle_checkpoint_reload_is_not_starting() {
    let h = Harness::with_config(
        approval_script(),
        test_config().with_idle_persistence(IdlePersistenceMode::OnStarting),
    );
    let mut snapshot = Snapshot::fresh(Default::default());
    snapshot.state = InstanceState::Idle;
    snapshot.open.insert("Approve".to_string());
    h.seed(snapshot, CheckpointValues::new());

    h.host.invoke("Approve", || json!(1)).await.unwrap();

    assert_eq!(h.stats().loads(), 1);
    assert_eq!(h.store.write_count(), 0);
}

#[tokio::test]
async fn test_checkpoint_of_other_definition_is_rejected() {
    let h = Harness::new(approval_script());
    h.seed(Snapshot::fresh(Default::default()), CheckpointValues::new());
    let mut checkpoint = h.store.checkpoint(h.instance_id).unwrap();
    checkpoint.definition = "invoice".to_string();
    h.store.insert(h.instance_id, checkpoint);

    let err = h.host.start().await.unwrap_err();
    assert!(matches!(
        err,
        HostError::Engine(EngineError::DefinitionMismatch { ref found, .. }) if found == "invoice"
    ));
    assert_eq!(h.host.instance_state().await.unwrap(), None);
}

#[tokio::test]
async fn test_load_failure_is_retryable() {
    let h = Harness::new(approval_script());
    h.store.set_fail_loads(true);

    let err = h.host.start().await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(h.stats().creates(), 0);

    h.store.set_fail_loads(false);
    h.host.start().await.unwrap();
    assert_eq!(h.stats().creates(), 1);
}

/// Counts saves and remembers what it was restored from
#[derive(Default)]
struct AuditExtension {
    saves: AtomicUsize,
    confirmed: AtomicUsize,
    restored: Mutex<Option<serde_json::Value>>,
}

#[async_trait]
impl PersistenceExtension for AuditExtension {
    fn name(&self) -> &str {
        "audit"
    }

    async fn collect_values(&self, values: &mut CheckpointValues) -> Result<(), ExtensionError> {
        let saves = self.saves.fetch_add(1, Ordering::SeqCst) + 1;
        values.insert("audit.saves".to_string(), json!(saves));
        // Reserved keys belong to the host
        values.insert(reserved_keys::OPERATIONS.to_string(), json!("overwritten"));
        Ok(())
    }

    async fn on_saved(&self, values: &CheckpointValues) -> Result<(), ExtensionError> {
        assert!(values.contains_key("audit.saves"));
        self.confirmed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn load_values(&self, values: &CheckpointValues) -> Result<(), ExtensionError> {
        *self.restored.lock() = values.get("audit.saves").cloned();
        Ok(())
    }
}

#[tokio::test]
async fn test_extension_values_round_trip() {
    let h = Harness::new(approval_script());
    let audit = Arc::new(AuditExtension::default());
    let host = WorkflowHost::new(
        h.instance_id,
        h.definition.clone(),
        h.store.clone(),
        h.reminders.clone(),
    )
    .with_config(test_config())
    .with_extension(audit.clone());

    host.start().await.unwrap();

    let checkpoint = h.store.checkpoint(h.instance_id).unwrap();
    assert_eq!(checkpoint.value("audit.saves"), Some(&json!(1)));
    assert_eq!(checkpoint.value(reserved_keys::OPERATIONS), Some(&json!({})));
    assert!(checkpoint.value(reserved_keys::TIMERS).is_some());
    assert_eq!(audit.confirmed.load(Ordering::SeqCst), 1);

    host.abort("reload").await.unwrap();
    host.invoke("Approve", || json!(1)).await.unwrap();

    assert_eq!(*audit.restored.lock(), Some(json!(1)));
    assert_eq!(audit.saves.load(Ordering::SeqCst), 2);
}

struct FailingExtension;

#[async_trait]
impl PersistenceExtension for FailingExtension {
    fn name(&self) -> &str {
        "failing"
    }

    async fn collect_values(&self, _values: &mut CheckpointValues) -> Result<(), ExtensionError> {
        Err(ExtensionError::new("failing", "disk full"))
    }
}

#[tokio::test]
async fn test_extension_failure_aborts_instance() {
    let h = Harness::new(approval_script());
    let host = WorkflowHost::new(
        h.instance_id,
        h.definition.clone(),
        h.store.clone(),
        h.reminders.clone(),
    )
    .with_config(test_config())
    .with_extension(Arc::new(FailingExtension));

    let err = host.start().await.unwrap_err();

    assert!(matches!(err, HostError::Extension(ref e) if e.extension == "failing"));
    assert_eq!(h.store.write_count(), 0);
    assert_eq!(
        host.instance_state().await.unwrap(),
        Some(InstanceState::Aborted)
    );
}

/// Holds the checkpoint write path open for a while
struct SlowExtension(Duration);

#[async_trait]
impl PersistenceExtension for SlowExtension {
    fn name(&self) -> &str {
        "slow"
    }

    async fn collect_values(&self, _values: &mut CheckpointValues) -> Result<(), ExtensionError> {
        tokio::time::sleep(self.0).await;
        Ok(())
    }
}

#[test_log::test(tokio::test)]
async fn test_gate_timeout_while_checkpoint_in_flight() {
    let h = Harness::new(approval_script());
    let host = Arc::new(
        WorkflowHost::new(
            h.instance_id,
            h.definition.clone(),
            h.store.clone(),
            h.reminders.clone(),
        )
        .with_config(test_config().with_operation_timeout(Duration::from_millis(20)))
        .with_extension(Arc::new(SlowExtension(Duration::from_millis(300)))),
    );

    let starter = {
        let host = host.clone();
        tokio::spawn(async move { host.start().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The checkpoint is still being written, so the gate stays closed
    let err = host.instance_state().await.unwrap_err();
    assert!(matches!(err, HostError::SchedulingTimeout(_)));
    assert_eq!(h.store.write_count(), 0);

    starter.await.unwrap().expect("start should finish");
    assert_eq!(h.store.write_count(), 1);
    assert_eq!(
        host.instance_state().await.unwrap(),
        Some(InstanceState::Idle)
    );
}

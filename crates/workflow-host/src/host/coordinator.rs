//! Execution coordinator
//!
//! The `WorkflowHost` is the per-entity owner of one process instance. It is
//! responsible for:
//! - Serializing callers through the gate
//! - Preparing the instance (create, reload, recover) before every call
//! - Delivering operations to bookmarks and awaiting their responses
//! - Routing unhandled faults to a waiting caller or to the entity
//! - Completion, control operations and durable timer callbacks

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::entity::{DefaultEntity, WorkflowEntity};
use super::gate::Gate;
use super::operation::{decode_response, Operation};
use super::waiters::{ActiveWaiters, WaiterHandle, WaiterKind};
use crate::config::{HostConfig, UnhandledExceptionAction};
use crate::engine::{
    BookmarkResumptionResult, CompletionState, InstanceState, OperationRequest,
    OperationResponse, Outputs, ProcessDefinition, ProcessFault, Responder,
};
use crate::error::HostError;
use crate::instance::{
    CompletionRecord, InstanceServices, OperationLedger, RunOutcome, WorkflowInstance,
};
use crate::persistence::{reserved_keys, CheckpointStore, PersistenceExtension};
use crate::reminder::ReminderService;

/// State owned by the gate
#[derive(Debug, Default)]
struct HostState {
    instance: Option<WorkflowInstance>,
    completion: Option<Arc<CompletionRecord>>,
    ledger: OperationLedger,
    waiters: ActiveWaiters,
}

/// Coordinator of one process instance
///
/// All operations against the instance are serialized: no two calls ever
/// observe the instance concurrently, and checkpoint writes finish before
/// the next caller gets in.
pub struct WorkflowHost {
    instance_id: Uuid,
    definition: Arc<dyn ProcessDefinition>,
    entity: Arc<dyn WorkflowEntity>,
    services: InstanceServices,
    config: HostConfig,
    gate: Gate<HostState>,
    completion_tx: watch::Sender<Option<Arc<CompletionRecord>>>,
}

impl WorkflowHost {
    /// Create a host for an instance
    pub fn new(
        instance_id: Uuid,
        definition: Arc<dyn ProcessDefinition>,
        store: Arc<dyn CheckpointStore>,
        reminders: Arc<dyn ReminderService>,
    ) -> Self {
        let (completion_tx, _) = watch::channel(None);
        Self {
            instance_id,
            definition,
            entity: Arc::new(DefaultEntity),
            services: InstanceServices::new(store, reminders),
            config: HostConfig::default(),
            gate: Gate::new(HostState::default()),
            completion_tx,
        }
    }

    /// Set the configuration
    pub fn with_config(mut self, config: HostConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the owning entity callbacks
    pub fn with_entity(mut self, entity: Arc<dyn WorkflowEntity>) -> Self {
        self.entity = entity;
        self
    }

    /// Add a persistence extension
    pub fn with_extension(mut self, extension: Arc<dyn PersistenceExtension>) -> Self {
        self.services = self.services.with_extension(extension);
        self
    }

    /// Instance identity
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Host configuration
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Completion record, if the instance is known to be complete
    pub fn completion(&self) -> Option<Arc<CompletionRecord>> {
        self.completion_tx.borrow().clone()
    }

    /// Lifecycle state of the in-memory instance (`None` if none is loaded)
    pub async fn instance_state(&self) -> Result<Option<InstanceState>, HostError> {
        let state = self.gate.enter(self.config.operation_timeout).await?;
        if state.completion.is_some() {
            return Ok(Some(InstanceState::Complete));
        }
        Ok(state.instance.as_ref().map(WorkflowInstance::state))
    }

    /// Run the instance to its next suspension point
    ///
    /// Creates the instance on first use. Calling it after completion is a
    /// no-op.
    #[instrument(skip(self), fields(instance_id = %self.instance_id))]
    pub async fn start(&self) -> Result<(), HostError> {
        let mut state = self.gate.enter(self.config.operation_timeout).await?;
        self.prepare(&mut state).await
    }

    /// Wait until the instance completes and return its outputs
    ///
    /// Raises the termination fault or [`HostError::Canceled`] for instances
    /// that did not close normally. Returns immediately if the instance
    /// already completed.
    #[instrument(skip(self), fields(instance_id = %self.instance_id))]
    pub async fn run_to_completion(&self) -> Result<Outputs, HostError> {
        let (mut waiter, mut completion_rx) = {
            let mut state = self.gate.enter(self.config.operation_timeout).await?;
            self.prepare(&mut state).await?;
            if let Some(record) = &state.completion {
                return record.result();
            }
            (
                state.waiters.register(WaiterKind::Preparation),
                self.completion_tx.subscribe(),
            )
        };

        debug!("waiting for completion");
        tokio::select! {
            record = wait_for_completion(&mut completion_rx) => match record {
                Some(record) => record.result(),
                None => Err(HostError::Canceled),
            },
            Some(Err(fault)) = waiter.wait() => Err(HostError::Faulted(fault)),
        }
    }

    /// Deliver a request to the operation's bookmark and wait for its response
    ///
    /// The request producer runs only if the bookmark consumes it. If the
    /// bookmark is gone the ledger decides: a recorded response comes back
    /// as [`HostError::RepeatedOperation`], otherwise
    /// [`HostError::OperationCanceled`].
    #[instrument(skip(self, request), fields(instance_id = %self.instance_id))]
    pub async fn invoke<F>(&self, operation: &str, request: F) -> Result<OperationResponse, HostError>
    where
        F: FnOnce() -> serde_json::Value + Send + 'static,
    {
        let response_rx = {
            let mut state = self.gate.enter(self.config.operation_timeout).await?;
            self.prepare(&mut state).await?;

            if state.completion.is_some() {
                debug!(%operation, "instance complete, answering from ledger");
                return Err(replay_or_cancel(&state.ledger, operation));
            }

            let (responder, response_rx) = Responder::channel(operation);
            let mut waiter = state.waiters.register(WaiterKind::Operation);
            let instance_id = self.instance_id;
            let instance = state
                .instance
                .as_mut()
                .ok_or(HostError::InstanceNotReady(instance_id))?;

            let scheduled = instance.schedule_operation_bookmark_resumption(
                operation,
                OperationRequest::new(Box::new(request), responder),
            );
            match scheduled {
                BookmarkResumptionResult::Success => {}
                BookmarkResumptionResult::NotFound => {
                    debug!(%operation, "operation bookmark not found");
                    return Err(replay_or_cancel(&state.ledger, operation));
                }
                BookmarkResumptionResult::NotReady => {
                    error!(%operation, "bookmark resumption on an instance that never ran");
                    return Err(HostError::InstanceNotReady(instance_id));
                }
            }

            self.run_instance(&mut state, Some(&mut waiter)).await?;
            response_rx
        };

        match tokio::time::timeout(self.config.response_timeout, response_rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(HostError::OperationCanceled(operation.to_string())),
            Err(_) => {
                warn!(%operation, "no response within timeout");
                Err(HostError::ResponseTimeout {
                    operation: operation.to_string(),
                    timeout: self.config.response_timeout,
                })
            }
        }
    }

    /// Invoke a typed operation
    pub async fn call<O: Operation>(&self, request: O::Request) -> Result<O::Response, HostError> {
        let value = serde_json::to_value(&request)?;
        let response = self.invoke(O::NAME, move || value).await?;
        Ok(decode_response::<O>(response)?)
    }

    /// Cancel the instance and run its cancellation path
    #[instrument(skip(self), fields(instance_id = %self.instance_id))]
    pub async fn cancel(&self) -> Result<(), HostError> {
        let mut state = self.gate.enter(self.config.operation_timeout).await?;
        let instance = self.prepare_for_control(&mut state).await?;
        instance.cancel();
        info!("canceling process instance");

        let mut waiter = state.waiters.register(WaiterKind::Operation);
        self.run_instance(&mut state, Some(&mut waiter)).await
    }

    /// Terminate the instance with a fault
    #[instrument(skip(self, reason), fields(instance_id = %self.instance_id))]
    pub async fn terminate(&self, reason: ProcessFault) -> Result<(), HostError> {
        let mut state = self.gate.enter(self.config.operation_timeout).await?;
        let instance = self.prepare_for_control(&mut state).await?;
        info!(reason = %reason, "terminating process instance");
        instance.terminate(reason);

        let mut waiter = state.waiters.register(WaiterKind::Operation);
        self.run_instance(&mut state, Some(&mut waiter)).await
    }

    /// Abandon in-memory state; the next call reloads the last checkpoint
    #[instrument(skip(self), fields(instance_id = %self.instance_id))]
    pub async fn abort(&self, reason: &str) -> Result<(), HostError> {
        let mut state = self.gate.enter(self.config.operation_timeout).await?;
        let instance = self.prepare_for_control(&mut state).await?;
        instance.abort(reason);
        Ok(())
    }

    /// Release the instance before the entity is evicted
    ///
    /// Pending timer bookkeeping is flushed; no checkpoint is written.
    #[instrument(skip(self), fields(instance_id = %self.instance_id))]
    pub async fn deactivate(&self) -> Result<(), HostError> {
        let mut state = self.gate.enter(self.config.operation_timeout).await?;
        match state.instance.take() {
            Some(instance) => instance.deactivate().await,
            None => Ok(()),
        }
    }

    /// A durable timer fired
    ///
    /// A reminder whose bookmark is gone is benign and only resynchronizes
    /// timers. Faults raised by the resumed run have no waiter and go to the
    /// entity.
    #[instrument(skip(self), fields(instance_id = %self.instance_id))]
    pub async fn on_reminder_fired(&self, reminder: &str) -> Result<(), HostError> {
        let mut state = self.gate.enter(self.config.operation_timeout).await?;
        self.prepare(&mut state).await?;

        if state.completion.is_some() {
            debug!(%reminder, "instance complete, unregistering reminder");
            self.services.reminders.unregister(reminder).await?;
            return Ok(());
        }

        let instance_id = self.instance_id;
        let instance = state
            .instance
            .as_mut()
            .ok_or(HostError::InstanceNotReady(instance_id))?;

        match instance.schedule_reminder_bookmark_resumption(reminder) {
            None => {
                warn!(%reminder, "reminder does not belong to this instance");
                Ok(())
            }
            Some(BookmarkResumptionResult::Success) => {
                debug!(%reminder, "resuming timer bookmark");
                self.run_instance(&mut state, None).await
            }
            Some(BookmarkResumptionResult::NotFound) => {
                debug!(%reminder, "timer bookmark gone, dropping timer");
                instance.synchronize_timers().await
            }
            Some(BookmarkResumptionResult::NotReady) => {
                error!(%reminder, "bookmark resumption on an instance that never ran");
                Err(HostError::InstanceNotReady(instance_id))
            }
        }
    }

    /// Ensure the instance is ready; on failure it is left to be reloaded
    async fn prepare(&self, state: &mut HostState) -> Result<(), HostError> {
        let result = self.prepare_instance(state).await;
        if result.is_err() {
            if let Some(instance) = state.instance.as_mut() {
                if instance.state() != InstanceState::Aborted {
                    instance.abort("preparation failed");
                }
            }
        }
        result
    }

    async fn prepare_instance(&self, state: &mut HostState) -> Result<(), HostError> {
        if state.completion.is_some() {
            return Ok(());
        }

        if state
            .instance
            .as_ref()
            .is_some_and(|instance| instance.state() == InstanceState::Aborted)
        {
            info!(instance_id = %self.instance_id, "discarding aborted instance");
            state.instance = None;
        }

        if state.instance.is_none() {
            match self.services.store.load_checkpoint(self.instance_id).await? {
                None => {
                    let inputs = self
                        .entity
                        .on_starting()
                        .await
                        .map_err(HostError::Faulted)?;
                    state.ledger = OperationLedger::new();
                    state.instance = Some(WorkflowInstance::start(
                        self.instance_id,
                        self.definition.clone(),
                        inputs,
                        self.services.clone(),
                        &self.config,
                    )?);
                }
                Some(checkpoint) => {
                    state.ledger =
                        OperationLedger::from_value(checkpoint.value(reserved_keys::OPERATIONS))?;

                    if let Some(record) =
                        CompletionRecord::from_checkpoint(self.instance_id, &checkpoint)
                    {
                        info!(
                            instance_id = %self.instance_id,
                            outcome = %record.outcome,
                            "instance already complete"
                        );
                        let record = Arc::new(record);
                        state.completion = Some(record.clone());
                        self.completion_tx.send_replace(Some(record));
                        return Ok(());
                    }

                    state.instance = Some(
                        WorkflowInstance::load(
                            self.instance_id,
                            self.definition.clone(),
                            checkpoint,
                            self.services.clone(),
                            &self.config,
                        )
                        .await?,
                    );
                }
            }
        }

        let runnable = state
            .instance
            .as_ref()
            .is_some_and(|instance| instance.state() == InstanceState::Runnable);
        if runnable {
            let mut waiter = state.waiters.register(WaiterKind::Preparation);
            self.run_instance(state, Some(&mut waiter)).await?;
        }

        Ok(())
    }

    /// Prepare for cancel/terminate/abort, failing if the instance completed
    async fn prepare_for_control<'a>(
        &self,
        state: &'a mut HostState,
    ) -> Result<&'a mut WorkflowInstance, HostError> {
        self.prepare(state).await?;
        if state.completion.is_some() {
            return Err(HostError::InstanceCompleted(self.instance_id));
        }
        state
            .instance
            .as_mut()
            .ok_or(HostError::InstanceNotReady(self.instance_id))
    }

    /// Run until idle or completion, routing unhandled faults
    ///
    /// A fault stored for `waiter` is returned as [`HostError::Faulted`].
    async fn run_instance(
        &self,
        state: &mut HostState,
        waiter: Option<&mut WaiterHandle>,
    ) -> Result<(), HostError> {
        let result = self.run_until_idle(state).await;
        state.waiters.on_idle();

        if let Some(waiter) = waiter {
            waiter.check().map_err(HostError::Faulted)?;
        }
        result
    }

    async fn run_until_idle(&self, state: &mut HostState) -> Result<(), HostError> {
        loop {
            let instance = state
                .instance
                .as_mut()
                .ok_or(HostError::InstanceNotReady(self.instance_id))?;

            match instance.run(&mut state.ledger).await? {
                RunOutcome::Idle => return Ok(()),
                RunOutcome::Completed(completion) => {
                    self.complete(state, completion).await;
                    return Ok(());
                }
                RunOutcome::Faulted { fault, source } => {
                    error!(
                        instance_id = %self.instance_id,
                        fault = %fault,
                        source = source.as_deref().unwrap_or("unknown"),
                        "unhandled process fault"
                    );

                    if !state.waiters.store_fault(fault.clone()) {
                        let handled = self
                            .entity
                            .on_unhandled_exception(&fault, source.as_deref())
                            .await;
                        debug!(handled, "fault routed to entity");
                    }

                    let instance = state
                        .instance
                        .as_mut()
                        .ok_or(HostError::InstanceNotReady(self.instance_id))?;
                    match self.config.unhandled_exception_action {
                        UnhandledExceptionAction::Abort => {
                            instance.abort(&fault.message);
                            return Ok(());
                        }
                        UnhandledExceptionAction::Cancel => instance.cancel(),
                        UnhandledExceptionAction::Terminate => instance.terminate(fault),
                    }
                }
            }
        }
    }

    async fn complete(&self, state: &mut HostState, completion: CompletionState) {
        let record = Arc::new(CompletionRecord::new(self.instance_id, completion));
        info!(
            instance_id = %self.instance_id,
            outcome = %record.outcome,
            "process instance completed"
        );

        state.instance = None;
        state.completion = Some(record.clone());
        self.completion_tx.send_replace(Some(record.clone()));
        self.entity.on_completed(&record).await;
    }
}

impl std::fmt::Debug for WorkflowHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowHost")
            .field("instance_id", &self.instance_id)
            .field("definition", &self.definition.name())
            .field("config", &self.config)
            .field("completed", &self.completion_tx.borrow().is_some())
            .finish_non_exhaustive()
    }
}

fn replay_or_cancel(ledger: &OperationLedger, operation: &str) -> HostError {
    match ledger.get(operation) {
        Some(response) => HostError::RepeatedOperation {
            operation: operation.to_string(),
            response: Some(response.clone()),
        },
        None => HostError::OperationCanceled(operation.to_string()),
    }
}

async fn wait_for_completion(
    rx: &mut watch::Receiver<Option<Arc<CompletionRecord>>>,
) -> Option<Arc<CompletionRecord>> {
    rx.wait_for(Option::is_some).await.ok()?.clone()
}

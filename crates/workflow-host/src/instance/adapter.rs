//! Instance lifecycle adapter
//!
//! `WorkflowInstance` owns exactly one engine session. It:
//! - Creates or reloads the engine from a checkpoint
//! - Runs the engine and turns its recorded requests into timer, checkpoint
//!   and response I/O once the engine is idle
//! - Applies the idle-persistence policy and the checkpoint write path
//!   (engine state, host values, persistence extensions)
//!
//! Any persistence, extension or engine failure aborts the session. So does
//! a run whose future is dropped before it returns: the session then counts
//! as aborted. An aborted session is never resumed; the coordinator
//! recreates it from the last checkpoint.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::OperationLedger;
use crate::config::{HostConfig, IdlePersistenceMode};
use crate::engine::{
    Bookmark, BookmarkResumptionResult, BookmarkValue, CompletionState, EngineError,
    EngineRequest, Inputs, InstanceState, OperationRequest, OperationResponse, ProcessDefinition,
    ProcessEngine, ProcessFault, Responder, RunContext, RunStatus,
};
use crate::error::HostError;
use crate::persistence::{
    reserved_keys, Checkpoint, CheckpointStore, CheckpointValues, PersistenceExtension,
};
use crate::reminder::{ReminderService, TimerTable};

/// External services an instance persists and schedules through
#[derive(Clone)]
pub struct InstanceServices {
    /// Checkpoint store
    pub store: Arc<dyn CheckpointStore>,

    /// Reminder service backing durable timers
    pub reminders: Arc<dyn ReminderService>,

    /// Hooks on the checkpoint write path, called in order
    pub extensions: Vec<Arc<dyn PersistenceExtension>>,
}

impl InstanceServices {
    /// Create services without extensions
    pub fn new(store: Arc<dyn CheckpointStore>, reminders: Arc<dyn ReminderService>) -> Self {
        Self {
            store,
            reminders,
            extensions: Vec::new(),
        }
    }

    /// Add a persistence extension
    pub fn with_extension(mut self, extension: Arc<dyn PersistenceExtension>) -> Self {
        self.extensions.push(extension);
        self
    }
}

/// How a [`WorkflowInstance::run`] ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Idle handling finished (timers, checkpoint, responses)
    Idle,

    /// The instance completed; its completion checkpoint (if any) is written
    Completed(CompletionState),

    /// A fault escaped the process; the engine waits for a disposition
    Faulted {
        fault: ProcessFault,
        source: Option<String>,
    },
}

/// One engine session plus its durable timers and checkpoint policy
pub struct WorkflowInstance {
    instance_id: Uuid,
    definition: Arc<dyn ProcessDefinition>,
    engine: Box<dyn ProcessEngine>,
    services: InstanceServices,
    persistence: IdlePersistenceMode,
    timers: TimerTable,
    pending: Vec<EngineRequest>,
    is_starting: bool,
    is_reloaded: bool,
    aborted: bool,
    /// Set from the start of a run until its idle handling or fault
    /// disposition finished
    in_flight: bool,
}

impl WorkflowInstance {
    /// Create a new instance from inputs
    pub fn start(
        instance_id: Uuid,
        definition: Arc<dyn ProcessDefinition>,
        inputs: Inputs,
        services: InstanceServices,
        config: &HostConfig,
    ) -> Result<Self, HostError> {
        let engine = definition.create(inputs)?;
        info!(%instance_id, definition = definition.name(), "created process instance");

        Ok(Self {
            instance_id,
            definition,
            engine,
            services,
            persistence: config.idle_persistence,
            timers: TimerTable::new(&config.reminder_prefix, config.reminder_period),
            pending: Vec::new(),
            is_starting: true,
            is_reloaded: false,
            aborted: false,
            in_flight: false,
        })
    }

    /// Recreate an instance from a non-terminal checkpoint
    ///
    /// Timers are reconciled with the reminder service before returning.
    #[instrument(skip(definition, checkpoint, services, config))]
    pub async fn load(
        instance_id: Uuid,
        definition: Arc<dyn ProcessDefinition>,
        checkpoint: Checkpoint,
        services: InstanceServices,
        config: &HostConfig,
    ) -> Result<Self, HostError> {
        if checkpoint.definition != definition.name() {
            return Err(EngineError::DefinitionMismatch {
                expected: definition.name().to_string(),
                found: checkpoint.definition,
            }
            .into());
        }

        let mut timers = match checkpoint.value(reserved_keys::TIMERS) {
            Some(value) => TimerTable::restore(
                &config.reminder_prefix,
                config.reminder_period,
                value.clone(),
            )?,
            None => TimerTable::new(&config.reminder_prefix, config.reminder_period),
        };

        for extension in &services.extensions {
            extension.load_values(&checkpoint.values)?;
        }

        let engine = definition.load(checkpoint.engine_state)?;
        let is_reloaded = engine.state() == InstanceState::Runnable;

        timers.synchronize(services.reminders.as_ref()).await?;

        info!(
            %instance_id,
            state = %engine.state(),
            timers = timers.len(),
            "reloaded process instance from checkpoint"
        );

        Ok(Self {
            instance_id,
            definition,
            engine,
            services,
            persistence: config.idle_persistence,
            timers,
            pending: Vec::new(),
            is_starting: false,
            is_reloaded,
            aborted: false,
            in_flight: false,
        })
    }

    /// Instance identity
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Current lifecycle state
    pub fn state(&self) -> InstanceState {
        if self.aborted || self.in_flight {
            InstanceState::Aborted
        } else {
            self.engine.state()
        }
    }

    /// True from creation until the first checkpoint
    pub fn is_starting(&self) -> bool {
        self.is_starting
    }

    /// True from a runnable reload until the next checkpoint
    pub fn is_reloaded(&self) -> bool {
        self.is_reloaded
    }

    /// Durable timers of this instance
    pub fn timers(&self) -> &TimerTable {
        &self.timers
    }

    /// Queue input against a bookmark
    pub fn schedule_bookmark_resumption(
        &mut self,
        bookmark: &Bookmark,
        value: BookmarkValue,
    ) -> BookmarkResumptionResult {
        if self.aborted {
            return BookmarkResumptionResult::NotReady;
        }
        self.engine.schedule_bookmark_resumption(bookmark, value)
    }

    /// Queue an operation request against the bookmark named after the operation
    pub fn schedule_operation_bookmark_resumption(
        &mut self,
        operation: &str,
        request: OperationRequest,
    ) -> BookmarkResumptionResult {
        let bookmark = Bookmark::new(operation);
        self.schedule_bookmark_resumption(&bookmark, BookmarkValue::Operation(request))
    }

    /// Resume the bookmark of a fired durable timer
    ///
    /// Returns `None` if the reminder is not one of this instance's timers.
    /// On success the timer is consumed and its reminder is unregistered at
    /// the next idle. If the bookmark is gone the timer is dropped as well;
    /// the caller flushes through [`synchronize_timers`](Self::synchronize_timers).
    pub fn schedule_reminder_bookmark_resumption(
        &mut self,
        reminder: &str,
    ) -> Option<BookmarkResumptionResult> {
        let bookmark = self.timers.bookmark_for(reminder)?;
        let result = self.schedule_bookmark_resumption(
            &bookmark,
            BookmarkValue::Reminder {
                reminder: reminder.to_string(),
            },
        );
        match result {
            BookmarkResumptionResult::Success | BookmarkResumptionResult::NotFound => {
                self.timers.remove(&bookmark);
            }
            BookmarkResumptionResult::NotReady => {}
        }
        Some(result)
    }

    /// Reconcile durable timers with the reminder service
    pub async fn synchronize_timers(&mut self) -> Result<(), HostError> {
        self.timers
            .synchronize(self.services.reminders.as_ref())
            .await?;
        Ok(())
    }

    /// Run the engine to its next suspension point and handle the idle
    ///
    /// Returns once the engine is idle, complete, or waiting for a fault
    /// disposition. Requests recorded before an unhandled fault stay queued
    /// until the next idle, or are dropped if the instance is aborted.
    ///
    /// The session stays in flight while a fault waits for its disposition
    /// (the next `run` or `abort`). If this future is dropped before that,
    /// the session reports [`InstanceState::Aborted`] and must be reloaded.
    /// Idempotent responses reach `ledger` only once their checkpoint is
    /// written.
    #[instrument(skip(self, ledger), fields(instance_id = %self.instance_id))]
    pub async fn run(&mut self, ledger: &mut OperationLedger) -> Result<RunOutcome, HostError> {
        if self.aborted {
            return Err(EngineError::Execution(format!(
                "instance {} is aborted",
                self.instance_id
            ))
            .into());
        }

        self.in_flight = true;
        let mut ctx = RunContext::new(self.instance_id);
        let status = match self.engine.run(&mut ctx).await {
            Ok(status) => status,
            Err(e) => {
                self.fail(&e.to_string());
                return Err(e.into());
            }
        };
        self.pending.extend(ctx.into_requests());

        let outcome = match status {
            RunStatus::UnhandledFault { fault, source } => {
                // Still in flight until the disposition is applied
                return Ok(RunOutcome::Faulted { fault, source });
            }
            RunStatus::Idle { persistable } => {
                debug!(persistable, "engine idle");
                self.on_idle(ledger, persistable, None).await
            }
            RunStatus::Completed => match self.engine.completion_state() {
                Some(completion) => self.on_idle(ledger, true, Some(completion)).await,
                None => Err(EngineError::Execution(
                    "engine reported completion without a completion state".to_string(),
                )
                .into()),
            },
        };

        match outcome {
            Ok(outcome) => {
                self.in_flight = false;
                Ok(outcome)
            }
            Err(e) => {
                self.fail(&e.to_string());
                Err(e)
            }
        }
    }

    /// Request cancellation (takes effect on the next run)
    pub fn cancel(&mut self) {
        if !self.aborted {
            self.engine.cancel();
        }
    }

    /// Request termination with a fault (takes effect on the next run)
    pub fn terminate(&mut self, reason: ProcessFault) {
        if !self.aborted {
            self.engine.terminate(reason);
        }
    }

    /// Abandon the session without a checkpoint
    pub fn abort(&mut self, reason: &str) {
        warn!(instance_id = %self.instance_id, reason, "aborting process instance");
        self.fail(reason);
    }

    /// Release the session (entity eviction)
    ///
    /// Pending reminder bookkeeping is flushed; no checkpoint is written.
    #[instrument(skip(self), fields(instance_id = %self.instance_id))]
    pub async fn deactivate(mut self) -> Result<(), HostError> {
        if self.aborted {
            // Bookkeeping of an aborted session does not match the checkpoint
            debug!("dropping aborted process instance");
            return Ok(());
        }
        self.timers
            .flush(self.services.reminders.as_ref())
            .await?;
        debug!(state = %self.state(), "deactivated process instance");
        Ok(())
    }

    fn fail(&mut self, reason: &str) {
        if !self.aborted {
            self.engine.abort(reason);
            self.aborted = true;
        }
        self.in_flight = false;
        // Responders dropped here resolve their callers as canceled
        self.pending.clear();
    }

    async fn on_idle(
        &mut self,
        ledger: &mut OperationLedger,
        persistable: bool,
        completion: Option<CompletionState>,
    ) -> Result<RunOutcome, HostError> {
        let mut responses: Vec<(Responder, OperationResponse, bool)> = Vec::new();
        for request in std::mem::take(&mut self.pending) {
            match request {
                EngineRequest::StartTimer { bookmark, due } => self.timers.start(bookmark, due),
                EngineRequest::CancelTimer { bookmark } => self.timers.remove(&bookmark),
                EngineRequest::SendResponse {
                    responder,
                    response,
                    idempotent,
                } => responses.push((responder, response, idempotent)),
            }
        }

        let completed = completion.is_some();
        if completed {
            self.timers.clear();
        }
        // Reminders must exist before the checkpoint that references them
        self.timers
            .flush(self.services.reminders.as_ref())
            .await?;

        let has_idempotent = responses.iter().any(|(_, _, idempotent)| *idempotent);
        let starting = self.is_starting || self.is_reloaded;
        if has_idempotent {
            let mut staged = ledger.clone();
            for (responder, response, idempotent) in &responses {
                if *idempotent {
                    staged.record(responder.operation(), response.clone());
                }
            }
            self.save_checkpoint(&staged, completion.clone()).await?;
            *ledger = staged;
        } else if self.persistence.should_persist(starting, persistable, completed) {
            self.save_checkpoint(ledger, completion.clone()).await?;
        }

        for (responder, response, _) in responses {
            let operation = responder.operation().to_string();
            if !responder.deliver(response) {
                debug!(%operation, "caller stopped waiting for response");
            }
        }

        Ok(match completion {
            Some(completion) => RunOutcome::Completed(completion),
            None => RunOutcome::Idle,
        })
    }

    async fn save_checkpoint(
        &mut self,
        ledger: &OperationLedger,
        completion: Option<CompletionState>,
    ) -> Result<(), HostError> {
        let engine_state = self.engine.save_state()?;

        let mut values = CheckpointValues::new();
        for extension in &self.services.extensions {
            extension.collect_values(&mut values).await?;
        }
        if values.keys().any(|key| key.starts_with(reserved_keys::PREFIX)) {
            warn!("persistence extension wrote reserved checkpoint keys; host values win");
        }
        values.insert(reserved_keys::OPERATIONS.to_string(), ledger.to_value()?);
        values.insert(reserved_keys::TIMERS.to_string(), self.timers.to_value()?);

        let checkpoint = Checkpoint {
            definition: self.definition.name().to_string(),
            instance_state: self.engine.state(),
            engine_state,
            completion,
            values,
            saved_at: Utc::now(),
        };

        if let Err(e) = self
            .services
            .store
            .save_checkpoint(self.instance_id, &checkpoint)
            .await
        {
            error!(instance_id = %self.instance_id, error = %e, "failed to save checkpoint");
            return Err(e.into());
        }

        for extension in &self.services.extensions {
            extension.on_saved(&checkpoint.values).await?;
        }

        self.is_starting = false;
        self.is_reloaded = false;

        info!(
            instance_id = %self.instance_id,
            state = %checkpoint.instance_state,
            terminal = checkpoint.is_terminal(),
            "saved checkpoint"
        );
        Ok(())
    }
}

impl std::fmt::Debug for WorkflowInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowInstance")
            .field("instance_id", &self.instance_id)
            .field("definition", &self.definition.name())
            .field("state", &self.state())
            .field("is_starting", &self.is_starting)
            .field("is_reloaded", &self.is_reloaded)
            .field("in_flight", &self.in_flight)
            .field("timers", &self.timers.len())
            .finish()
    }
}

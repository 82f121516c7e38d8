//! Scripted process engine and recording entity shared by integration tests

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use workflow_host::engine::{
    Bookmark, BookmarkResumptionResult, BookmarkValue, CompletionState, EngineError, Inputs,
    InstanceState, OperationResponse, Outputs, ProcessDefinition, ProcessEngine, ProcessFault,
    Responder, RunContext, RunStatus,
};
use workflow_host::persistence::{Checkpoint, CheckpointValues};
use workflow_host::{
    CompletionRecord, HostConfig, InMemoryCheckpointStore, InMemoryReminderService,
    WorkflowEntity, WorkflowHost,
};

pub const DEFINITION: &str = "order-approval";

/// What the engine does when an operation bookmark is resumed
#[derive(Debug, Clone)]
pub enum OpBehavior {
    /// Respond with `{"echo": <request>}`; `once` closes the bookmark
    Respond { idempotent: bool, once: bool },

    /// Respond with no value, then close with `{"approved": <request>}`
    Complete,

    /// Raise an unhandled fault without responding
    Fault(&'static str),

    /// Consume the request and keep the caller waiting forever
    Ignore,

    /// Consume the request and drop the responder
    Drop,

    /// Respond with no value and start a timer
    StartTimer {
        bookmark: &'static str,
        due: Duration,
    },

    /// Respond with no value and cancel a timer
    CancelTimer { bookmark: &'static str },
}

/// What the engine does when a timer bookmark is resumed
#[derive(Debug, Clone, Default)]
pub enum TimerBehavior {
    /// Consume the timer and stay idle
    #[default]
    Consume,

    /// Close with `{"timer": <bookmark>}`
    Complete,

    /// Raise an unhandled fault
    Fault(&'static str),
}

/// Behavior of the scripted process
#[derive(Debug, Clone)]
pub struct Script {
    pub bookmarks: Vec<&'static str>,
    pub timers: Vec<(&'static str, Duration)>,
    pub operations: HashMap<&'static str, OpBehavior>,
    pub on_timer: TimerBehavior,
    pub persistable: bool,
    /// Complete right away on the first run with the inputs as outputs
    pub complete_on_start: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            bookmarks: Vec::new(),
            timers: Vec::new(),
            operations: HashMap::new(),
            on_timer: TimerBehavior::default(),
            persistable: true,
            complete_on_start: false,
        }
    }
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operation(mut self, name: &'static str, behavior: OpBehavior) -> Self {
        self.bookmarks.push(name);
        self.operations.insert(name, behavior);
        self
    }

    pub fn timer(mut self, bookmark: &'static str, due: Duration) -> Self {
        self.timers.push((bookmark, due));
        self
    }

    pub fn on_timer(mut self, behavior: TimerBehavior) -> Self {
        self.on_timer = behavior;
        self
    }

    pub fn persistable(mut self, persistable: bool) -> Self {
        self.persistable = persistable;
        self
    }

    pub fn complete_on_start(mut self) -> Self {
        self.complete_on_start = true;
        self
    }
}

/// Counters shared by every session of a definition
#[derive(Debug, Default)]
pub struct EngineStats {
    pub creates: AtomicUsize,
    pub loads: AtomicUsize,
    pub runs: AtomicUsize,
    /// Business side effects (operation requests evaluated)
    pub side_effects: AtomicUsize,
    /// Runs that observed another run in progress
    pub overlaps: AtomicUsize,
    /// Faults to raise on upcoming first runs
    pub start_faults: AtomicUsize,
    active: AtomicBool,
}

impl EngineStats {
    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn side_effects(&self) -> usize {
        self.side_effects.load(Ordering::SeqCst)
    }

    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    fn take_start_fault(&self) -> bool {
        self.start_faults
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Persisted engine state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub state: InstanceState,
    pub inputs: Inputs,
    pub open: BTreeSet<String>,
    pub log: Vec<String>,
    pub completion: Option<CompletionState>,
}

impl Snapshot {
    pub fn fresh(inputs: Inputs) -> Self {
        Self {
            state: InstanceState::Runnable,
            inputs,
            open: BTreeSet::new(),
            log: Vec::new(),
            completion: None,
        }
    }
}

pub struct ScriptedDefinition {
    pub script: Script,
    pub stats: Arc<EngineStats>,
}

impl ScriptedDefinition {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            stats: Arc::new(EngineStats::default()),
        }
    }

    fn engine(&self, snapshot: Snapshot) -> Box<dyn ProcessEngine> {
        Box::new(ScriptedEngine {
            script: self.script.clone(),
            stats: self.stats.clone(),
            snapshot,
            queued: Vec::new(),
            held: Vec::new(),
            cancel_requested: false,
            terminate_reason: None,
        })
    }
}

impl ProcessDefinition for ScriptedDefinition {
    fn name(&self) -> &str {
        DEFINITION
    }

    fn create(&self, inputs: Inputs) -> Result<Box<dyn ProcessEngine>, EngineError> {
        self.stats.creates.fetch_add(1, Ordering::SeqCst);
        Ok(self.engine(Snapshot::fresh(inputs)))
    }

    fn load(&self, engine_state: serde_json::Value) -> Result<Box<dyn ProcessEngine>, EngineError> {
        self.stats.loads.fetch_add(1, Ordering::SeqCst);
        let snapshot: Snapshot = serde_json::from_value(engine_state)?;
        Ok(self.engine(snapshot))
    }
}

pub struct ScriptedEngine {
    script: Script,
    stats: Arc<EngineStats>,
    snapshot: Snapshot,
    queued: Vec<(Bookmark, BookmarkValue)>,
    held: Vec<Responder>,
    cancel_requested: bool,
    terminate_reason: Option<ProcessFault>,
}

impl ScriptedEngine {
    fn complete(&mut self, completion: CompletionState) -> RunStatus {
        self.snapshot.open.clear();
        self.snapshot.state = InstanceState::Complete;
        self.snapshot.completion = Some(completion);
        RunStatus::Completed
    }

    fn idle(&mut self) -> RunStatus {
        self.snapshot.state = InstanceState::Idle;
        RunStatus::Idle {
            persistable: self.script.persistable,
        }
    }

    fn step(&mut self, ctx: &mut RunContext) -> RunStatus {
        if let Some(reason) = self.terminate_reason.take() {
            return self.complete(CompletionState::faulted(reason));
        }
        if self.cancel_requested {
            self.cancel_requested = false;
            return self.complete(CompletionState::canceled());
        }

        if self.snapshot.state == InstanceState::Runnable {
            if self.stats.take_start_fault() {
                return RunStatus::UnhandledFault {
                    fault: ProcessFault::new("start failed").with_type("E_START"),
                    source: Some("start".to_string()),
                };
            }
            if self.script.complete_on_start {
                let outputs = self.snapshot.inputs.clone();
                return self.complete(CompletionState::closed(outputs));
            }
            for bookmark in &self.script.bookmarks {
                self.snapshot.open.insert(bookmark.to_string());
            }
            for (bookmark, due) in &self.script.timers {
                self.snapshot.open.insert(bookmark.to_string());
                ctx.start_timer(*bookmark, *due);
            }
            self.snapshot.log.push("started".to_string());
            return self.idle();
        }

        for (bookmark, value) in std::mem::take(&mut self.queued) {
            match value {
                BookmarkValue::Operation(request) => {
                    let (input, responder) = request.accept();
                    self.stats.side_effects.fetch_add(1, Ordering::SeqCst);
                    self.snapshot.log.push(format!("{}:{}", bookmark, input));

                    let behavior = self
                        .script
                        .operations
                        .get(bookmark.name())
                        .cloned()
                        .unwrap_or(OpBehavior::Drop);
                    match behavior {
                        OpBehavior::Respond { idempotent, once } => {
                            if once {
                                self.snapshot.open.remove(bookmark.name());
                            }
                            ctx.send_response(
                                responder,
                                OperationResponse::Value(json!({ "echo": input })),
                                idempotent,
                            );
                        }
                        OpBehavior::Complete => {
                            ctx.send_response(responder, OperationResponse::Void, false);
                            let mut outputs = Outputs::new();
                            outputs.insert("approved".to_string(), input);
                            return self.complete(CompletionState::closed(outputs));
                        }
                        OpBehavior::Fault(message) => {
                            return RunStatus::UnhandledFault {
                                fault: ProcessFault::new(message),
                                source: Some(bookmark.to_string()),
                            };
                        }
                        OpBehavior::Ignore => self.held.push(responder),
                        OpBehavior::Drop => drop(responder),
                        OpBehavior::StartTimer { bookmark, due } => {
                            self.snapshot.open.insert(bookmark.to_string());
                            ctx.start_timer(bookmark, due);
                            ctx.send_response(responder, OperationResponse::Void, false);
                        }
                        OpBehavior::CancelTimer { bookmark } => {
                            self.snapshot.open.remove(bookmark);
                            ctx.cancel_timer(bookmark);
                            ctx.send_response(responder, OperationResponse::Void, false);
                        }
                    }
                }
                BookmarkValue::Reminder { .. } => {
                    self.snapshot.open.remove(bookmark.name());
                    self.snapshot.log.push(format!("timer:{}", bookmark));
                    match self.script.on_timer.clone() {
                        TimerBehavior::Consume => {}
                        TimerBehavior::Complete => {
                            let mut outputs = Outputs::new();
                            outputs.insert("timer".to_string(), json!(bookmark.name()));
                            return self.complete(CompletionState::closed(outputs));
                        }
                        TimerBehavior::Fault(message) => {
                            return RunStatus::UnhandledFault {
                                fault: ProcessFault::new(message),
                                source: Some(bookmark.to_string()),
                            };
                        }
                    }
                }
                BookmarkValue::Value(value) => {
                    self.snapshot.log.push(format!("{}:{}", bookmark, value));
                }
            }
        }

        self.idle()
    }
}

#[async_trait]
impl ProcessEngine for ScriptedEngine {
    fn state(&self) -> InstanceState {
        self.snapshot.state
    }

    fn schedule_bookmark_resumption(
        &mut self,
        bookmark: &Bookmark,
        value: BookmarkValue,
    ) -> BookmarkResumptionResult {
        if self.snapshot.state == InstanceState::Runnable {
            return BookmarkResumptionResult::NotReady;
        }
        if !self.snapshot.open.contains(bookmark.name()) {
            return BookmarkResumptionResult::NotFound;
        }
        self.queued.push((bookmark.clone(), value));
        BookmarkResumptionResult::Success
    }

    async fn run(&mut self, ctx: &mut RunContext) -> Result<RunStatus, EngineError> {
        self.stats.runs.fetch_add(1, Ordering::SeqCst);
        if self.stats.active.swap(true, Ordering::SeqCst) {
            self.stats.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        // Give concurrent callers a chance to interleave
        tokio::task::yield_now().await;

        let status = self.step(ctx);
        self.stats.active.store(false, Ordering::SeqCst);
        Ok(status)
    }

    fn completion_state(&self) -> Option<CompletionState> {
        self.snapshot.completion.clone()
    }

    fn save_state(&self) -> Result<serde_json::Value, EngineError> {
        Ok(serde_json::to_value(&self.snapshot)?)
    }

    fn cancel(&mut self) {
        self.cancel_requested = true;
    }

    fn terminate(&mut self, reason: ProcessFault) {
        self.terminate_reason = Some(reason);
    }

    fn abort(&mut self, _reason: &str) {
        self.queued.clear();
        self.snapshot.state = InstanceState::Aborted;
    }
}

/// Entity that records every callback
#[derive(Default)]
pub struct RecordingEntity {
    pub inputs: Inputs,
    pub starts: AtomicUsize,
    pub unhandled: Mutex<Vec<(ProcessFault, Option<String>)>>,
    pub completed: Mutex<Vec<CompletionRecord>>,
}

impl RecordingEntity {
    pub fn with_inputs(inputs: Inputs) -> Self {
        Self {
            inputs,
            ..Default::default()
        }
    }

    pub fn unhandled_count(&self) -> usize {
        self.unhandled.lock().len()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.lock().len()
    }
}

#[async_trait]
impl WorkflowEntity for RecordingEntity {
    async fn on_starting(&self) -> Result<Inputs, ProcessFault> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(self.inputs.clone())
    }

    async fn on_unhandled_exception(&self, fault: &ProcessFault, source: Option<&str>) -> bool {
        self.unhandled
            .lock()
            .push((fault.clone(), source.map(str::to_string)));
        true
    }

    async fn on_completed(&self, record: &CompletionRecord) {
        self.completed.lock().push(record.clone());
    }
}

/// A host wired to in-memory collaborators
pub struct Harness {
    pub instance_id: Uuid,
    pub host: Arc<WorkflowHost>,
    pub store: Arc<InMemoryCheckpointStore>,
    pub reminders: Arc<InMemoryReminderService>,
    pub definition: Arc<ScriptedDefinition>,
    pub entity: Arc<RecordingEntity>,
    pub config: HostConfig,
}

impl Harness {
    pub fn new(script: Script) -> Self {
        Self::with_config(script, test_config())
    }

    pub fn with_config(script: Script, config: HostConfig) -> Self {
        Self::build(
            Uuid::now_v7(),
            Arc::new(ScriptedDefinition::new(script)),
            Arc::new(InMemoryCheckpointStore::new()),
            Arc::new(InMemoryReminderService::new()),
            Arc::new(RecordingEntity::default()),
            config,
        )
    }

    pub fn with_entity(mut self, entity: RecordingEntity) -> Self {
        self.entity = Arc::new(entity);
        self.rebuild()
    }

    fn build(
        instance_id: Uuid,
        definition: Arc<ScriptedDefinition>,
        store: Arc<InMemoryCheckpointStore>,
        reminders: Arc<InMemoryReminderService>,
        entity: Arc<RecordingEntity>,
        config: HostConfig,
    ) -> Self {
        let host = WorkflowHost::new(
            instance_id,
            definition.clone(),
            store.clone(),
            reminders.clone(),
        )
        .with_config(config.clone())
        .with_entity(entity.clone());

        Self {
            instance_id,
            host: Arc::new(host),
            store,
            reminders,
            definition,
            entity,
            config,
        }
    }

    /// A fresh host over the same instance, store and reminders
    /// (entity re-activation after eviction or a crash)
    pub fn rebuild(&self) -> Self {
        Self::build(
            self.instance_id,
            self.definition.clone(),
            self.store.clone(),
            self.reminders.clone(),
            self.entity.clone(),
            self.config.clone(),
        )
    }

    pub fn stats(&self) -> &EngineStats {
        &self.definition.stats
    }

    /// Engine snapshot of the stored checkpoint
    pub fn stored_snapshot(&self) -> Option<Snapshot> {
        self.store
            .checkpoint(self.instance_id)
            .and_then(|checkpoint| serde_json::from_value(checkpoint.engine_state).ok())
    }

    /// Seed the store with a checkpoint of the given snapshot
    pub fn seed(&self, snapshot: Snapshot, values: CheckpointValues) {
        self.store.insert(
            self.instance_id,
            Checkpoint {
                definition: DEFINITION.to_string(),
                instance_state: snapshot.state,
                engine_state: serde_json::to_value(&snapshot).unwrap(),
                completion: snapshot.completion.clone(),
                values,
                saved_at: chrono::Utc::now(),
            },
        );
    }
}

/// Short timeouts so failing tests fail fast
pub fn test_config() -> HostConfig {
    HostConfig::default()
        .with_operation_timeout(Duration::from_secs(5))
        .with_response_timeout(Duration::from_secs(5))
}

pub fn inputs(pairs: &[(&str, serde_json::Value)]) -> Inputs {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

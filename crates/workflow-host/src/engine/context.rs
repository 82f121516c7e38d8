//! Run context, bookmarks and operation plumbing between host and engine

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

/// Name of a suspension point in the process engine awaiting external input
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bookmark(String);

impl Bookmark {
    /// Create a bookmark name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The bookmark name
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Bookmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Bookmark {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Bookmark {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Response delivered by a business "send response" point
///
/// This is also the shape stored in the idempotent operation ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum OperationResponse {
    /// A response parameter
    Value(serde_json::Value),

    /// The operation has no response type
    Void,
}

impl OperationResponse {
    /// The response parameter, if any
    pub fn value(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Value(value) => Some(value),
            Self::Void => None,
        }
    }
}

/// Produces the request parameter of an operation on demand
pub type RequestProducer = Box<dyn FnOnce() -> serde_json::Value + Send>;

/// One-shot channel back to the caller waiting on an operation response
pub struct Responder {
    operation: String,
    tx: oneshot::Sender<OperationResponse>,
}

impl Responder {
    /// Create a responder and the receiver the caller waits on
    pub fn channel(operation: impl Into<String>) -> (Self, oneshot::Receiver<OperationResponse>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                operation: operation.into(),
                tx,
            },
            rx,
        )
    }

    /// Operation this responder answers
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Whether the caller stopped waiting
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Hand the response to the caller; returns false if nobody waits anymore
    pub(crate) fn deliver(self, response: OperationResponse) -> bool {
        self.tx.send(response).is_ok()
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("operation", &self.operation)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// External input for an operation bookmark
///
/// The request parameter is produced lazily: if the bookmark no longer exists
/// the producer is dropped without being called.
pub struct OperationRequest {
    producer: RequestProducer,
    responder: Responder,
}

impl OperationRequest {
    /// Create a request from a producer and the caller's responder
    pub fn new(producer: RequestProducer, responder: Responder) -> Self {
        Self {
            producer,
            responder,
        }
    }

    /// Operation name
    pub fn operation(&self) -> &str {
        self.responder.operation()
    }

    /// Evaluate the request parameter, keeping the responder for the response path
    pub fn accept(self) -> (serde_json::Value, Responder) {
        ((self.producer)(), self.responder)
    }
}

impl fmt::Debug for OperationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationRequest")
            .field("operation", &self.operation())
            .finish_non_exhaustive()
    }
}

/// Value queued against a bookmark
#[derive(Debug)]
pub enum BookmarkValue {
    /// Input of an operation invoked by a caller
    Operation(OperationRequest),

    /// A durable timer fired
    Reminder {
        /// Name of the reminder that fired
        reminder: String,
    },

    /// Arbitrary payload
    Value(serde_json::Value),
}

/// Outcome of queueing input against a bookmark
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookmarkResumptionResult {
    /// Input queued; the next run will consume it
    Success,

    /// No such bookmark (the process moved past it, or never had it)
    NotFound,

    /// The engine has not been run since creation or reload
    NotReady,
}

/// Requests an engine records while running
///
/// They are processed by the host after the run returns, in the idle
/// handling path where checkpoint and reminder I/O may suspend.
#[derive(Debug)]
pub enum EngineRequest {
    /// Start a durable timer that resumes `bookmark` after `due`
    StartTimer { bookmark: Bookmark, due: Duration },

    /// Cancel a durable timer
    CancelTimer { bookmark: Bookmark },

    /// Deliver a business response to the caller of an operation
    SendResponse {
        responder: Responder,
        response: OperationResponse,
        idempotent: bool,
    },
}

/// Context handed to [`ProcessEngine::run`](super::ProcessEngine::run)
///
/// The engine never talks to reminder or checkpoint services directly; it
/// records requests here and the host applies them once the run returns.
#[derive(Debug)]
pub struct RunContext {
    /// Instance being run
    pub instance_id: Uuid,

    requests: Vec<EngineRequest>,
}

impl RunContext {
    /// Create a context for one run
    pub fn new(instance_id: Uuid) -> Self {
        Self {
            instance_id,
            requests: Vec::new(),
        }
    }

    /// Ask for a durable timer
    pub fn start_timer(&mut self, bookmark: impl Into<Bookmark>, due: Duration) {
        self.requests.push(EngineRequest::StartTimer {
            bookmark: bookmark.into(),
            due,
        });
    }

    /// Cancel a durable timer
    pub fn cancel_timer(&mut self, bookmark: impl Into<Bookmark>) {
        self.requests.push(EngineRequest::CancelTimer {
            bookmark: bookmark.into(),
        });
    }

    /// Send an operation response
    ///
    /// Idempotent responses are written to the checkpoint before the caller
    /// sees them.
    pub fn send_response(
        &mut self,
        responder: Responder,
        response: OperationResponse,
        idempotent: bool,
    ) {
        self.requests.push(EngineRequest::SendResponse {
            responder,
            response,
            idempotent,
        });
    }

    /// Number of recorded requests
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Check if nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub(crate) fn into_requests(self) -> Vec<EngineRequest> {
        self.requests
    }
}

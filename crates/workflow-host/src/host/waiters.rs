//! Active-waiters registry
//!
//! Every caller blocked on a run registers a waiter. A fault escaping the
//! process is stored once per idle cycle and dispatched to all waiters when
//! the run ends; with nobody waiting the fault is not storable and goes to
//! the entity instead.

use tokio::sync::oneshot;
use tracing::warn;

use crate::engine::ProcessFault;

/// Protection level of a waiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaiterKind {
    /// Mandatory run after create/reload; sees only faults
    Preparation,

    /// In-flight operation; released with `Ok` at a fault-free idle
    Operation,
}

struct Waiter {
    kind: WaiterKind,
    tx: oneshot::Sender<Result<(), ProcessFault>>,
}

/// Receiving side of a registered waiter
#[derive(Debug)]
pub struct WaiterHandle {
    kind: WaiterKind,
    rx: oneshot::Receiver<Result<(), ProcessFault>>,
}

impl WaiterHandle {
    /// Protection level
    pub fn kind(&self) -> WaiterKind {
        self.kind
    }

    /// Non-blocking check for a dispatched fault
    pub fn check(&mut self) -> Result<(), ProcessFault> {
        match self.rx.try_recv() {
            Ok(Err(fault)) => Err(fault),
            _ => Ok(()),
        }
    }

    /// Wait for the registry to release this waiter
    ///
    /// Returns `None` if the registry dropped the waiter without a result.
    pub async fn wait(&mut self) -> Option<Result<(), ProcessFault>> {
        (&mut self.rx).await.ok()
    }
}

/// Waiters of one coordinator plus the fault stored for the current cycle
#[derive(Default)]
pub struct ActiveWaiters {
    waiters: Vec<Waiter>,
    stored_fault: Option<ProcessFault>,
}

impl ActiveWaiters {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter
    pub fn register(&mut self, kind: WaiterKind) -> WaiterHandle {
        self.prune();
        let (tx, rx) = oneshot::channel();
        self.waiters.push(Waiter { kind, tx });
        WaiterHandle { kind, rx }
    }

    /// Whether any waiter is still listening
    pub fn has_active(&self) -> bool {
        self.waiters.iter().any(|waiter| !waiter.tx.is_closed())
    }

    /// Number of waiters still listening
    pub fn len(&self) -> usize {
        self.waiters
            .iter()
            .filter(|waiter| !waiter.tx.is_closed())
            .count()
    }

    /// Check if no waiter is listening
    pub fn is_empty(&self) -> bool {
        !self.has_active()
    }

    /// The fault stored for the current cycle
    pub fn stored_fault(&self) -> Option<&ProcessFault> {
        self.stored_fault.as_ref()
    }

    /// Store a fault for dispatch at the end of the run
    ///
    /// Returns false if nobody waits (the fault is unhandled). A second fault
    /// in the same cycle is dropped; the first one is kept as the root cause.
    pub fn store_fault(&mut self, fault: ProcessFault) -> bool {
        self.prune();
        if self.waiters.is_empty() {
            return false;
        }
        match &self.stored_fault {
            Some(first) => {
                warn!(dropped = %fault, root = %first, "fault already stored for this cycle");
            }
            None => self.stored_fault = Some(fault),
        }
        true
    }

    /// End of a run: dispatch the stored fault or release operation waiters
    pub fn on_idle(&mut self) {
        self.prune();
        match self.stored_fault.take() {
            Some(fault) => {
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.tx.send(Err(fault.clone()));
                }
            }
            None => {
                let mut kept = Vec::with_capacity(self.waiters.len());
                for waiter in self.waiters.drain(..) {
                    match waiter.kind {
                        WaiterKind::Operation => {
                            let _ = waiter.tx.send(Ok(()));
                        }
                        WaiterKind::Preparation => kept.push(waiter),
                    }
                }
                self.waiters = kept;
            }
        }
    }

    fn prune(&mut self) {
        self.waiters.retain(|waiter| !waiter.tx.is_closed());
    }
}

impl std::fmt::Debug for ActiveWaiters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveWaiters")
            .field("waiters", &self.waiters.len())
            .field("stored_fault", &self.stored_fault)
            .finish()
    }
}

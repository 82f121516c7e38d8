//! Single-slot gate serializing callers of one host
//!
//! The gate owns the coordinator state. Entering yields a guard that grants
//! exclusive access across suspension points; dropping the guard opens the
//! gate again on every exit path, including `?` returns and panics.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::error::HostError;

/// Single-slot async gate around `T`
#[derive(Debug)]
pub struct Gate<T> {
    slot: Mutex<T>,
    waiting: AtomicUsize,
}

impl<T> Gate<T> {
    /// Create an open gate
    pub fn new(value: T) -> Self {
        Self {
            slot: Mutex::new(value),
            waiting: AtomicUsize::new(0),
        }
    }

    /// Wait for the gate, giving up after `timeout`
    ///
    /// Waiters are served in FIFO order. A caller that times out leaves the
    /// state untouched.
    pub async fn enter(&self, timeout: Duration) -> Result<GateGuard<'_, T>, HostError> {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let acquired = tokio::time::timeout(timeout, self.slot.lock()).await;
        self.waiting.fetch_sub(1, Ordering::SeqCst);

        match acquired {
            Ok(guard) => {
                trace!("gate entered");
                Ok(GateGuard { guard })
            }
            Err(_) => {
                debug!(?timeout, "gate wait timed out");
                Err(HostError::SchedulingTimeout(timeout))
            }
        }
    }

    /// Enter only if nobody holds the gate
    pub fn try_enter(&self) -> Option<GateGuard<'_, T>> {
        self.slot.try_lock().ok().map(|guard| GateGuard { guard })
    }

    /// Whether nobody holds the gate right now
    pub fn is_open(&self) -> bool {
        self.slot.try_lock().is_ok()
    }

    /// Number of callers currently waiting to enter
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }
}

/// Exclusive access to the gated state; dropping it opens the gate
#[derive(Debug)]
pub struct GateGuard<'a, T> {
    guard: MutexGuard<'a, T>,
}

impl<T> Deref for GateGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for GateGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for GateGuard<'_, T> {
    fn drop(&mut self) {
        trace!("gate released");
    }
}

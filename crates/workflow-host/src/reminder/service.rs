//! ReminderService trait and in-memory implementation

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

/// Error type for reminder operations
#[derive(Debug, thiserror::Error)]
pub enum ReminderError {
    /// Reminder service unavailable
    #[error("reminder service unavailable: {0}")]
    Unavailable(String),

    /// Reminder rejected (bad name or period)
    #[error("reminder {name} rejected: {reason}")]
    Rejected { name: String, reason: String },
}

/// Durable, restart-surviving named timers of one entity
///
/// A registered reminder fires a named callback on the owning entity after
/// `due`, then every `period` until it is unregistered.
#[async_trait]
pub trait ReminderService: Send + Sync + 'static {
    /// Register a reminder, or move an existing one
    async fn register_or_update(
        &self,
        name: &str,
        due: Duration,
        period: Duration,
    ) -> Result<(), ReminderError>;

    /// Remove a reminder; unknown names are not an error
    async fn unregister(&self, name: &str) -> Result<(), ReminderError>;

    /// Names of every active reminder
    async fn list_active(&self) -> Result<BTreeSet<String>, ReminderError>;
}

/// A reminder held by [`InMemoryReminderService`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderEntry {
    /// Next time the reminder fires
    pub due_at: DateTime<Utc>,

    /// Repeat period
    pub period: Duration,
}

/// In-memory implementation of ReminderService
///
/// Reminders do not fire on their own; callers poll [`due_reminders`]
/// and deliver them to the host, which is how tests drive timers.
///
/// [`due_reminders`]: InMemoryReminderService::due_reminders
pub struct InMemoryReminderService {
    reminders: RwLock<BTreeMap<String, ReminderEntry>>,
    registrations: AtomicUsize,
    unregistrations: AtomicUsize,
    unavailable: AtomicBool,
}

impl InMemoryReminderService {
    /// Create an empty service
    pub fn new() -> Self {
        Self {
            reminders: RwLock::new(BTreeMap::new()),
            registrations: AtomicUsize::new(0),
            unregistrations: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Look up a reminder
    pub fn reminder(&self, name: &str) -> Option<ReminderEntry> {
        self.reminders.read().get(name).cloned()
    }

    /// Names of reminders due at `now`
    pub fn due_reminders(&self, now: DateTime<Utc>) -> Vec<String> {
        self.reminders
            .read()
            .iter()
            .filter(|(_, entry)| entry.due_at <= now)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Insert a reminder behind the host's back (simulates a crash between
    /// registering a timer and persisting that fact)
    pub fn insert(&self, name: impl Into<String>, entry: ReminderEntry) {
        self.reminders.write().insert(name.into(), entry);
    }

    /// Number of register/update calls
    pub fn registration_count(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    /// Number of unregister calls
    pub fn unregistration_count(&self) -> usize {
        self.unregistrations.load(Ordering::SeqCst)
    }

    /// Number of active reminders
    pub fn len(&self) -> usize {
        self.reminders.read().len()
    }

    /// Check if no reminder is active
    pub fn is_empty(&self) -> bool {
        self.reminders.read().is_empty()
    }

    /// Make every call fail until reset
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), ReminderError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ReminderError::Unavailable(
                "injected reminder failure".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for InMemoryReminderService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReminderService for InMemoryReminderService {
    async fn register_or_update(
        &self,
        name: &str,
        due: Duration,
        period: Duration,
    ) -> Result<(), ReminderError> {
        self.check_available()?;
        if period.is_zero() {
            return Err(ReminderError::Rejected {
                name: name.to_string(),
                reason: "period must be positive".to_string(),
            });
        }

        let due = chrono::Duration::from_std(due).map_err(|e| ReminderError::Rejected {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        self.reminders.write().insert(
            name.to_string(),
            ReminderEntry {
                due_at: Utc::now() + due,
                period,
            },
        );
        self.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn unregister(&self, name: &str) -> Result<(), ReminderError> {
        self.check_available()?;
        self.reminders.write().remove(name);
        self.unregistrations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_active(&self) -> Result<BTreeSet<String>, ReminderError> {
        self.check_available()?;
        Ok(self.reminders.read().keys().cloned().collect())
    }
}

//! Durable timer table
//!
//! Bridges the engine's timer requests onto the reminder service. Each timer
//! is keyed by the bookmark it resumes and owns one reminder named
//! `<prefix><bookmark>`. The table is persisted in the checkpoint so a
//! reloaded instance knows which reminders belong to it.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ReminderError, ReminderService};
use crate::engine::Bookmark;

/// A timer the engine is waiting on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurableTimer {
    /// Bookmark resumed when the timer fires
    pub bookmark: Bookmark,

    /// Name of the backing reminder
    pub reminder: String,

    /// When the timer is due
    pub due_at: DateTime<Utc>,
}

/// Timers of one instance plus the reminder calls not yet made
#[derive(Debug, Clone)]
pub struct TimerTable {
    prefix: String,
    period: Duration,
    timers: BTreeMap<Bookmark, DurableTimer>,
    pending_register: BTreeSet<Bookmark>,
    pending_unregister: BTreeSet<String>,
}

impl TimerTable {
    /// Create an empty table
    pub fn new(prefix: impl Into<String>, period: Duration) -> Self {
        Self {
            prefix: prefix.into(),
            period,
            timers: BTreeMap::new(),
            pending_register: BTreeSet::new(),
            pending_unregister: BTreeSet::new(),
        }
    }

    /// Restore a table from its persisted form
    ///
    /// Restored timers are not re-registered eagerly; [`synchronize`]
    /// reconciles them with the service.
    ///
    /// [`synchronize`]: TimerTable::synchronize
    pub fn restore(
        prefix: impl Into<String>,
        period: Duration,
        value: serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        let timers: Vec<DurableTimer> = serde_json::from_value(value)?;
        let mut table = Self::new(prefix, period);
        table.timers = timers
            .into_iter()
            .map(|timer| (timer.bookmark.clone(), timer))
            .collect();
        Ok(table)
    }

    /// Persisted form (list of timers)
    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self.timers.values().collect::<Vec<_>>())
    }

    /// Reminder name for a bookmark
    pub fn reminder_name(&self, bookmark: &Bookmark) -> String {
        format!("{}{}", self.prefix, bookmark)
    }

    /// Bookmark a reminder resumes, if the reminder belongs to this table
    pub fn bookmark_for(&self, reminder: &str) -> Option<Bookmark> {
        reminder
            .strip_prefix(&self.prefix)
            .filter(|name| !name.is_empty())
            .map(Bookmark::new)
    }

    /// Look up a timer
    pub fn get(&self, bookmark: &Bookmark) -> Option<&DurableTimer> {
        self.timers.get(bookmark)
    }

    /// Number of active timers
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    /// Check if no timer is active
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Check if reminder calls are waiting to be flushed
    pub fn has_pending(&self) -> bool {
        !self.pending_register.is_empty() || !self.pending_unregister.is_empty()
    }

    /// Record a timer request (replaces an existing timer on the same bookmark)
    pub fn start(&mut self, bookmark: Bookmark, due: Duration) {
        let due_at = chrono::Duration::from_std(due)
            .ok()
            .and_then(|delta| Utc::now().checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let reminder = self.reminder_name(&bookmark);
        self.pending_unregister.remove(&reminder);
        self.pending_register.insert(bookmark.clone());
        self.timers.insert(
            bookmark.clone(),
            DurableTimer {
                bookmark,
                reminder,
                due_at,
            },
        );
    }

    /// Drop a timer (cancelled, or fired and consumed)
    pub fn remove(&mut self, bookmark: &Bookmark) {
        self.pending_register.remove(bookmark);
        if let Some(timer) = self.timers.remove(bookmark) {
            self.pending_unregister.insert(timer.reminder);
        }
    }

    /// Drop every timer (the instance completed)
    pub fn clear(&mut self) {
        let bookmarks: Vec<Bookmark> = self.timers.keys().cloned().collect();
        for bookmark in bookmarks {
            self.remove(&bookmark);
        }
    }

    /// Apply pending registrations and unregistrations
    ///
    /// Items stay pending if the service fails, so a later flush retries them.
    pub async fn flush(&mut self, service: &dyn ReminderService) -> Result<(), ReminderError> {
        let to_register: Vec<Bookmark> = self.pending_register.iter().cloned().collect();
        for bookmark in to_register {
            if let Some(timer) = self.timers.get(&bookmark) {
                let due = (timer.due_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                service
                    .register_or_update(&timer.reminder, due, self.period)
                    .await?;
                debug!(reminder = %timer.reminder, ?due, "registered durable timer");
            }
            self.pending_register.remove(&bookmark);
        }

        self.flush_unregistrations(service).await
    }

    /// Apply pending unregistrations only
    pub async fn flush_unregistrations(
        &mut self,
        service: &dyn ReminderService,
    ) -> Result<(), ReminderError> {
        let to_unregister: Vec<String> = self.pending_unregister.iter().cloned().collect();
        for reminder in to_unregister {
            service.unregister(&reminder).await?;
            debug!(%reminder, "unregistered durable timer");
            self.pending_unregister.remove(&reminder);
        }
        Ok(())
    }

    /// Reconcile the table with the reminders the service actually holds
    ///
    /// Reminders in our namespace without a timer are removed; timers whose
    /// reminder is missing are registered again.
    pub async fn synchronize(&mut self, service: &dyn ReminderService) -> Result<(), ReminderError> {
        let active = service.list_active().await?;

        for reminder in active.iter().filter(|name| name.starts_with(&self.prefix)) {
            let known = self
                .bookmark_for(reminder)
                .is_some_and(|bookmark| self.timers.contains_key(&bookmark));
            if !known {
                warn!(%reminder, "removing orphaned durable timer");
                self.pending_unregister.insert(reminder.clone());
            }
        }

        for timer in self.timers.values() {
            if !active.contains(&timer.reminder) {
                debug!(reminder = %timer.reminder, "re-registering missing durable timer");
                self.pending_register.insert(timer.bookmark.clone());
            }
        }

        self.flush(service).await
    }
}

//! Durable timers
//!
//! This module provides:
//! - [`ReminderService`] trait for durable, restart-surviving named timers
//! - [`InMemoryReminderService`] for testing
//! - [`TimerTable`] bridging engine timer requests onto reminders

mod service;
mod timers;

pub use service::{InMemoryReminderService, ReminderEntry, ReminderError, ReminderService};
pub use timers::{DurableTimer, TimerTable};

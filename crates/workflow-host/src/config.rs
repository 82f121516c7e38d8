// Decision: one HostConfig per host (one host per entity), so the caller-supplied
// timeouts live here instead of on every call.
// Environment variables use the WORKFLOW_ prefix; unset or empty values fall back to defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// When the instance checkpoints itself on reaching idle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdlePersistenceMode {
    /// Never checkpoint on idle
    Never,

    /// Only the first idle after creation (or after a runnable reload)
    OnStarting,

    /// Every idle the engine marks persistable, and completion
    #[default]
    OnPersistableIdle,

    /// Only on terminal completion
    OnCompleted,

    /// Every idle and completion
    Always,
}

impl IdlePersistenceMode {
    /// Decide whether an idle point must be checkpointed
    ///
    /// `starting` is true for the first idle after creation or after a
    /// runnable reload; `persistable` is the engine's hint for this idle.
    pub fn should_persist(self, starting: bool, persistable: bool, completed: bool) -> bool {
        match self {
            Self::Never => false,
            Self::OnStarting => starting,
            Self::OnPersistableIdle => persistable || completed,
            Self::OnCompleted => completed,
            Self::Always => true,
        }
    }
}

impl std::str::FromStr for IdlePersistenceMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "never" => Ok(Self::Never),
            "on_starting" | "onstarting" => Ok(Self::OnStarting),
            "on_persistable_idle" | "onpersistableidle" | "" => Ok(Self::OnPersistableIdle),
            "on_completed" | "oncompleted" => Ok(Self::OnCompleted),
            "always" => Ok(Self::Always),
            _ => anyhow::bail!(
                "Unknown idle persistence mode: {}. Use 'never', 'on_starting', 'on_persistable_idle', 'on_completed' or 'always'",
                s
            ),
        }
    }
}

/// What happens to an instance whose fault nobody handled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnhandledExceptionAction {
    /// Discard in-memory state; the next call reloads the last checkpoint
    #[default]
    Abort,

    /// Run the process cancellation path
    Cancel,

    /// Complete the instance as faulted
    Terminate,
}

impl std::str::FromStr for UnhandledExceptionAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "abort" | "" => Ok(Self::Abort),
            "cancel" => Ok(Self::Cancel),
            "terminate" => Ok(Self::Terminate),
            _ => anyhow::bail!(
                "Unknown unhandled exception action: {}. Use 'abort', 'cancel' or 'terminate'",
                s
            ),
        }
    }
}

/// Workflow host configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Checkpoint policy at idle
    pub idle_persistence: IdlePersistenceMode,

    /// Disposition for faults that escape the process
    pub unhandled_exception_action: UnhandledExceptionAction,

    /// How long a call waits for the gate before giving up
    #[serde(with = "duration_millis")]
    pub operation_timeout: Duration,

    /// How long `invoke` waits for a business response after scheduling
    #[serde(with = "duration_millis")]
    pub response_timeout: Duration,

    /// Namespace of reminders backing durable timers
    pub reminder_prefix: String,

    /// Repeat period of durable-timer reminders
    #[serde(with = "duration_millis")]
    pub reminder_period: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            idle_persistence: IdlePersistenceMode::default(),
            unhandled_exception_action: UnhandledExceptionAction::default(),
            operation_timeout: Duration::from_secs(30),
            response_timeout: Duration::from_secs(30),
            reminder_prefix: "wf-timer:".to_string(),
            reminder_period: Duration::from_secs(60),
        }
    }
}

impl HostConfig {
    /// Create a configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `WORKFLOW_IDLE_PERSISTENCE`: idle persistence mode (default: on_persistable_idle)
    /// - `WORKFLOW_UNHANDLED_EXCEPTION_ACTION`: abort, cancel or terminate (default: abort)
    /// - `WORKFLOW_OPERATION_TIMEOUT_MS`: gate acquisition timeout (default: 30000)
    /// - `WORKFLOW_RESPONSE_TIMEOUT_MS`: operation response timeout (default: 30000)
    /// - `WORKFLOW_REMINDER_PREFIX`: durable timer reminder prefix (default: wf-timer:)
    /// - `WORKFLOW_REMINDER_PERIOD_MS`: durable timer repeat period (default: 60000)
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let idle_persistence = std::env::var("WORKFLOW_IDLE_PERSISTENCE")
            .unwrap_or_default()
            .parse()?;
        let unhandled_exception_action = std::env::var("WORKFLOW_UNHANDLED_EXCEPTION_ACTION")
            .unwrap_or_default()
            .parse()?;

        Ok(Self {
            idle_persistence,
            unhandled_exception_action,
            operation_timeout: env_millis("WORKFLOW_OPERATION_TIMEOUT_MS")?
                .unwrap_or(defaults.operation_timeout),
            response_timeout: env_millis("WORKFLOW_RESPONSE_TIMEOUT_MS")?
                .unwrap_or(defaults.response_timeout),
            reminder_prefix: std::env::var("WORKFLOW_REMINDER_PREFIX")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.reminder_prefix),
            reminder_period: env_millis("WORKFLOW_REMINDER_PERIOD_MS")?
                .map_or(defaults.reminder_period, |period| period.max(MIN_REMINDER_PERIOD)),
        })
    }

    /// Set the idle persistence mode
    pub fn with_idle_persistence(mut self, mode: IdlePersistenceMode) -> Self {
        self.idle_persistence = mode;
        self
    }

    /// Set the unhandled exception action
    pub fn with_unhandled_exception_action(mut self, action: UnhandledExceptionAction) -> Self {
        self.unhandled_exception_action = action;
        self
    }

    /// Set the gate acquisition timeout
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Set the operation response timeout
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Set the durable timer reminder prefix
    pub fn with_reminder_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.reminder_prefix = prefix.into();
        self
    }

    /// Set the durable timer repeat period
    pub fn with_reminder_period(mut self, period: Duration) -> Self {
        self.reminder_period = period.max(MIN_REMINDER_PERIOD);
        self
    }
}

/// Reminder services reject a zero repeat period
const MIN_REMINDER_PERIOD: Duration = Duration::from_millis(1);

fn env_millis(name: &str) -> anyhow::Result<Option<Duration>> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => {
            let millis: u64 = value
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid {}: {} ({})", name, value, e))?;
            Ok(Some(Duration::from_millis(millis)))
        }
        _ => Ok(None),
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

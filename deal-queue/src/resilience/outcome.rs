use serde::{Deserialize, Serialize};
use std::fmt;

use crate::JobError;

/// Why admission control declined to run an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    KillSwitch,
    InProgress,
    CircuitOpen,
    CallBudgetExceeded,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::KillSwitch => "kill switch",
            Self::InProgress => "operation in progress",
            Self::CircuitOpen => "circuit breaker open",
            Self::CallBudgetExceeded => "call budget exceeded",
        }
    }

    /// Message shown to the person who triggered the work; the remedy differs by cause
    pub fn user_message(self) -> &'static str {
        match self {
            Self::KillSwitch => "disabled for protection",
            Self::InProgress => "already running",
            Self::CircuitOpen => "temporarily unavailable",
            Self::CallBudgetExceeded => "usage limit reached, try again shortly",
        }
    }

    /// Whether the blocking condition clears on its own
    pub fn is_transient(self) -> bool {
        !matches!(self, Self::KillSwitch)
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform result of a guarded operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Success(T),
    Skipped(SkipReason),
    Failure(JobError),
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            Self::Skipped(reason) => Some(*reason),
            _ => None,
        }
    }

    pub fn into_success(self) -> Option<T> {
        match self {
            Self::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Success(value) => Outcome::Success(f(value)),
            Self::Skipped(reason) => Outcome::Skipped(reason),
            Self::Failure(err) => Outcome::Failure(err),
        }
    }

    /// Message for the operator surface, `None` on success
    pub fn user_message(&self) -> Option<&'static str> {
        match self {
            Self::Success(_) => None,
            Self::Skipped(reason) => Some(reason.user_message()),
            Self::Failure(err) => Some(err.user_message()),
        }
    }
}

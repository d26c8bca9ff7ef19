//! Per-operation circuit breaker with a rolling failure and call budget.
//!
//! Each operation name owns one [`BreakerState`]. Every mutation goes through
//! a single `DashMap` entry guard, so admit/record calls racing on the same
//! name are serialized while unrelated names proceed in parallel.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::SkipReason;
use crate::clock::{to_chrono, SharedClock};
use crate::config::BreakerConfig;
use crate::observability::ObservabilityLayer;
use crate::types::AuditEvent;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through
    Closed,
    /// Calls rejected until the recovery timeout elapses
    Open,
    /// One probe call allowed
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Admission decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Rejected(SkipReason),
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

#[derive(Debug, Clone)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    call_count: u32,
    window_started: DateTime<Utc>,
    opened_at: Option<DateTime<Utc>>,
    probe_started: Option<DateTime<Utc>>,
    config: BreakerConfig,
    total_successes: u64,
    total_failures: u64,
}

impl BreakerState {
    fn new(config: BreakerConfig, now: DateTime<Utc>) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            call_count: 0,
            window_started: now,
            opened_at: None,
            probe_started: None,
            config,
            total_successes: 0,
            total_failures: 0,
        }
    }

    fn roll_window(&mut self, now: DateTime<Utc>) {
        if now - self.window_started >= to_chrono(self.config.monitor_window) {
            self.failure_count = 0;
            self.call_count = 0;
            self.window_started = now;
        }
    }

    fn trip(&mut self, now: DateTime<Utc>) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.probe_started = None;
    }

    fn close(&mut self, now: DateTime<Utc>) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.call_count = 0;
        self.window_started = now;
        self.opened_at = None;
        self.probe_started = None;
    }

    fn recovery_elapsed(&self, since: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - since >= to_chrono(self.config.recovery_timeout)
    }
}

/// State transition observed while holding an entry, emitted after release
enum Transition {
    Opened(&'static str),
    HalfOpened,
    Closed,
}

/// Read-only view of one breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub operation: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub call_count: u32,
    pub failure_threshold: u32,
    pub call_budget_limit: u32,
    pub opened_at: Option<DateTime<Utc>>,
    /// When an open breaker will next allow a probe
    pub retry_at: Option<DateTime<Utc>>,
    pub total_successes: u64,
    pub total_failures: u64,
}

/// Registry of circuit breakers keyed by operation name
pub struct CircuitBreakerRegistry {
    states: DashMap<String, BreakerState>,
    clock: SharedClock,
    observability: Arc<ObservabilityLayer>,
}

impl CircuitBreakerRegistry {
    pub fn new(clock: SharedClock, observability: Arc<ObservabilityLayer>) -> Self {
        Self {
            states: DashMap::new(),
            clock,
            observability,
        }
    }

    /// Decide whether one call of `operation` may run. An allowed call must be
    /// followed by exactly one `record_success` or `record_failure`.
    pub fn admit(&self, operation: &str, config: &BreakerConfig) -> Admission {
        let now = self.clock.now();

        let (admission, transition) = {
            let mut entry = self
                .states
                .entry(operation.to_string())
                .or_insert_with(|| BreakerState::new(config.clone(), now));
            let breaker = entry.value_mut();
            breaker.config = config.clone();
            breaker.roll_window(now);

            if breaker.call_count >= breaker.config.call_budget_limit {
                let transition = if breaker.state == CircuitState::Closed {
                    breaker.trip(now);
                    Some(Transition::Opened("call budget exceeded"))
                } else {
                    None
                };
                (Admission::Rejected(SkipReason::CallBudgetExceeded), transition)
            } else {
                match breaker.state {
                    CircuitState::Closed => {
                        breaker.call_count += 1;
                        (Admission::Allowed, None)
                    }
                    CircuitState::Open => {
                        let opened_at = breaker.opened_at.unwrap_or(now);
                        if breaker.recovery_elapsed(opened_at, now) {
                            breaker.state = CircuitState::HalfOpen;
                            breaker.probe_started = Some(now);
                            breaker.call_count += 1;
                            (Admission::Allowed, Some(Transition::HalfOpened))
                        } else {
                            (Admission::Rejected(SkipReason::CircuitOpen), None)
                        }
                    }
                    CircuitState::HalfOpen => {
                        // A probe that never reported back is treated as lost
                        let probe_pending = breaker
                            .probe_started
                            .is_some_and(|started| !breaker.recovery_elapsed(started, now));
                        if probe_pending {
                            (Admission::Rejected(SkipReason::CircuitOpen), None)
                        } else {
                            breaker.probe_started = Some(now);
                            breaker.call_count += 1;
                            (Admission::Allowed, None)
                        }
                    }
                }
            }
        };

        if let Some(transition) = transition {
            self.emit(operation, transition, now);
        }
        admission
    }

    /// Record a successful call
    pub fn record_success(&self, operation: &str) {
        let now = self.clock.now();

        let transition = match self.states.get_mut(operation) {
            Some(mut entry) => {
                let breaker = entry.value_mut();
                breaker.total_successes += 1;
                if breaker.state == CircuitState::HalfOpen {
                    breaker.close(now);
                    Some(Transition::Closed)
                } else {
                    None
                }
            }
            None => None,
        };

        if let Some(transition) = transition {
            self.emit(operation, transition, now);
        }
    }

    /// Record a failed call
    pub fn record_failure(&self, operation: &str) {
        let now = self.clock.now();

        let transition = match self.states.get_mut(operation) {
            Some(mut entry) => {
                let breaker = entry.value_mut();
                breaker.total_failures += 1;
                match breaker.state {
                    CircuitState::HalfOpen => {
                        breaker.trip(now);
                        Some(Transition::Opened("probe failed"))
                    }
                    CircuitState::Closed => {
                        breaker.roll_window(now);
                        breaker.failure_count += 1;
                        if breaker.failure_count >= breaker.config.failure_threshold {
                            breaker.trip(now);
                            Some(Transition::Opened("failure threshold reached"))
                        } else {
                            None
                        }
                    }
                    CircuitState::Open => None,
                }
            }
            None => None,
        };

        if let Some(transition) = transition {
            self.emit(operation, transition, now);
        }
    }

    /// Force the breaker closed and zero its counters (operator recovery action)
    pub fn reset(&self, operation: &str) {
        let now = self.clock.now();

        if let Some(mut entry) = self.states.get_mut(operation) {
            entry.value_mut().close(now);
        }

        info!(operation, "Circuit breaker manually reset");
        self.observability.record(AuditEvent::BreakerReset {
            operation: operation.to_string(),
            at: now,
        });
    }

    /// Current state, `Closed` for operations never seen
    pub fn state(&self, operation: &str) -> CircuitState {
        self.states
            .get(operation)
            .map(|entry| entry.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn snapshot(&self, operation: &str) -> Option<BreakerSnapshot> {
        self.states
            .get(operation)
            .map(|entry| Self::to_snapshot(entry.key(), entry.value()))
    }

    /// Snapshots of every known breaker, sorted by operation name
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<BreakerSnapshot> = self
            .states
            .iter()
            .map(|entry| Self::to_snapshot(entry.key(), entry.value()))
            .collect();
        snapshots.sort_by(|a, b| a.operation.cmp(&b.operation));
        snapshots
    }

    /// Operation names with breaker state
    pub fn operations(&self) -> Vec<String> {
        self.states.iter().map(|entry| entry.key().clone()).collect()
    }

    fn to_snapshot(operation: &str, breaker: &BreakerState) -> BreakerSnapshot {
        let retry_at = match breaker.state {
            CircuitState::Open => breaker
                .opened_at
                .and_then(|opened| opened.checked_add_signed(to_chrono(breaker.config.recovery_timeout))),
            _ => None,
        };

        BreakerSnapshot {
            operation: operation.to_string(),
            state: breaker.state,
            failure_count: breaker.failure_count,
            call_count: breaker.call_count,
            failure_threshold: breaker.config.failure_threshold,
            call_budget_limit: breaker.config.call_budget_limit,
            opened_at: breaker.opened_at,
            retry_at,
            total_successes: breaker.total_successes,
            total_failures: breaker.total_failures,
        }
    }

    fn emit(&self, operation: &str, transition: Transition, now: DateTime<Utc>) {
        let event = match transition {
            Transition::Opened(reason) => {
                warn!(operation, reason, "Circuit breaker opened");
                AuditEvent::BreakerOpened {
                    operation: operation.to_string(),
                    reason: reason.to_string(),
                    at: now,
                }
            }
            Transition::HalfOpened => {
                info!(operation, "Circuit breaker transitioning to half-open");
                AuditEvent::BreakerHalfOpened {
                    operation: operation.to_string(),
                    at: now,
                }
            }
            Transition::Closed => {
                info!(operation, "Circuit breaker closed after successful recovery");
                AuditEvent::BreakerClosed {
                    operation: operation.to_string(),
                    at: now,
                }
            }
        };
        self.observability.record(event);
    }
}

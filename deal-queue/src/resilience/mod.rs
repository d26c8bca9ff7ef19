//! Admission control: circuit breakers, kill switches, idempotency locks and
//! the orchestrator that composes them.

pub mod circuit_breaker;
pub mod idempotency;
pub mod kill_switch;
pub mod orchestrator;
pub mod outcome;

pub use circuit_breaker::{Admission, BreakerSnapshot, CircuitBreakerRegistry, CircuitState};
pub use idempotency::{Acquisition, ActiveLock, IdempotencyGuard, LockLease};
pub use kill_switch::{KillSwitch, KillSwitchRegistry, KillSwitchScope, KillSwitchStore, MemoryKillSwitchStore};
pub use orchestrator::{AnalysisOptions, ResilienceOrchestrator, SYSTEM_SUBJECT};
pub use outcome::{Outcome, SkipReason};

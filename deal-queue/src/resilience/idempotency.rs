use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::{to_chrono, SharedClock};

/// (operation name, subject id)
type LockKey = (String, String);

#[derive(Debug, Clone)]
struct LockEntry {
    token: Uuid,
    acquired_at: DateTime<Utc>,
    ttl: Option<Duration>,
}

impl LockEntry {
    fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.acquired_at
    }

    fn is_abandoned(&self, now: DateTime<Utc>, ceiling: Option<Duration>) -> bool {
        match self.ttl.or(ceiling) {
            Some(ttl) => self.age(now) >= to_chrono(ttl),
            None => false,
        }
    }
}

/// Result of [`IdempotencyGuard::try_acquire`]
#[derive(Debug)]
pub enum Acquisition {
    Acquired(LockLease),
    AlreadyInProgress,
}

impl Acquisition {
    pub fn is_acquired(&self) -> bool {
        matches!(self, Self::Acquired(_))
    }

    pub fn into_lease(self) -> Option<LockLease> {
        match self {
            Self::Acquired(lease) => Some(lease),
            Self::AlreadyInProgress => None,
        }
    }
}

/// Lock currently held, as reported to operators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveLock {
    pub operation: String,
    pub subject_id: String,
    pub acquired_at: DateTime<Utc>,
    pub ttl_ms: Option<u64>,
}

/// Prevents concurrent duplicate work on the same (operation, subject) key.
///
/// Acquisition never waits: the loser of a race gets `AlreadyInProgress`
/// immediately. A lock older than its TTL counts as abandoned and the next
/// acquirer takes it over. Clones share the same lock table.
#[derive(Clone)]
pub struct IdempotencyGuard {
    locks: Arc<DashMap<LockKey, LockEntry>>,
    clock: SharedClock,
}

impl IdempotencyGuard {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
            clock,
        }
    }

    /// Try to take the lock for `(operation, subject_id)`. Without a `ttl`
    /// the lock lives until the returned lease is dropped.
    pub fn try_acquire(&self, operation: &str, subject_id: &str, ttl: Option<Duration>) -> Acquisition {
        let now = self.clock.now();
        let key = (operation.to_string(), subject_id.to_string());
        let token = Uuid::new_v4();
        let fresh = LockEntry {
            token,
            acquired_at: now,
            ttl,
        };

        match self.locks.entry(key.clone()) {
            Entry::Occupied(mut held) => {
                if !held.get().is_abandoned(now, None) {
                    return Acquisition::AlreadyInProgress;
                }
                warn!(
                    operation,
                    subject_id,
                    held_since = %held.get().acquired_at,
                    "Reclaiming abandoned idempotency lock"
                );
                held.insert(fresh);
            }
            Entry::Vacant(slot) => {
                slot.insert(fresh);
            }
        }

        debug!(operation, subject_id, "Idempotency lock acquired");
        Acquisition::Acquired(LockLease {
            guard: self.clone(),
            key,
            token,
            released: false,
        })
    }

    /// Drop the lock for a key whoever holds it. Releasing a missing lock is a no-op.
    pub fn release(&self, operation: &str, subject_id: &str) {
        if self
            .locks
            .remove(&(operation.to_string(), subject_id.to_string()))
            .is_some()
        {
            debug!(operation, subject_id, "Idempotency lock released");
        }
    }

    /// Whether a live lock exists for the key
    pub fn is_held(&self, operation: &str, subject_id: &str) -> bool {
        let now = self.clock.now();
        self.locks
            .get(&(operation.to_string(), subject_id.to_string()))
            .is_some_and(|entry| !entry.is_abandoned(now, None))
    }

    /// Remove abandoned locks. Locks taken without a TTL are abandoned once
    /// older than `ceiling`.
    pub fn reclaim_abandoned(&self, ceiling: Duration) -> usize {
        let now = self.clock.now();
        let before = self.locks.len();
        self.locks
            .retain(|_, entry| !entry.is_abandoned(now, Some(ceiling)));
        let reclaimed = before.saturating_sub(self.locks.len());

        if reclaimed > 0 {
            warn!(reclaimed, "Reclaimed abandoned idempotency locks");
        }
        reclaimed
    }

    /// Locks currently held, sorted by key
    pub fn active_locks(&self) -> Vec<ActiveLock> {
        let mut locks: Vec<ActiveLock> = self
            .locks
            .iter()
            .map(|entry| ActiveLock {
                operation: entry.key().0.clone(),
                subject_id: entry.key().1.clone(),
                acquired_at: entry.acquired_at,
                ttl_ms: entry.ttl.map(|ttl| ttl.as_millis() as u64),
            })
            .collect();
        locks.sort_by(|a, b| (&a.operation, &a.subject_id).cmp(&(&b.operation, &b.subject_id)));
        locks
    }

    fn release_token(&self, key: &LockKey, token: Uuid) {
        // A holder whose lock was reclaimed must not free the new holder's lock
        self.locks.remove_if(key, |_, entry| entry.token == token);
    }
}

impl fmt::Debug for IdempotencyGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdempotencyGuard")
            .field("locks", &self.locks.len())
            .finish()
    }
}

/// Held idempotency lock; released on drop
pub struct LockLease {
    guard: IdempotencyGuard,
    key: LockKey,
    token: Uuid,
    released: bool,
}

impl LockLease {
    pub fn operation(&self) -> &str {
        &self.key.0
    }

    pub fn subject_id(&self) -> &str {
        &self.key.1
    }

    /// Release now instead of at end of scope
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            self.released = true;
            self.guard.release_token(&self.key, self.token);
        }
    }
}

impl fmt::Debug for LockLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockLease")
            .field("operation", &self.key.0)
            .field("subject_id", &self.key.1)
            .finish()
    }
}

impl Drop for LockLease {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{system_clock, ManualClock};

    #[test]
    fn test_second_acquire_is_rejected_until_release() {
        let guard = IdempotencyGuard::new(system_clock());

        let lease = guard.try_acquire("deal_analysis", "d-1", None).into_lease().unwrap();
        assert!(!guard.try_acquire("deal_analysis", "d-1", None).is_acquired());
        // Other subjects are independent
        assert!(guard.try_acquire("deal_analysis", "d-2", None).is_acquired());

        drop(lease);
        assert!(guard.try_acquire("deal_analysis", "d-1", None).is_acquired());
    }

    #[test]
    fn test_release_is_idempotent() {
        let guard = IdempotencyGuard::new(system_clock());
        guard.release("deal_analysis", "missing");

        let lease = guard.try_acquire("deal_analysis", "d-1", None).into_lease().unwrap();
        guard.release("deal_analysis", "d-1");
        guard.release("deal_analysis", "d-1");
        lease.release();

        assert!(guard.active_locks().is_empty());
    }

    #[test]
    fn test_expired_lock_is_reclaimed_and_stale_lease_cannot_release_it() {
        let clock = ManualClock::default();
        let guard = IdempotencyGuard::new(Arc::new(clock.clone()));

        let stale = guard
            .try_acquire("document_analysis", "doc-9", Some(Duration::from_secs(60)))
            .into_lease()
            .unwrap();
        clock.advance_std(Duration::from_secs(61));

        let fresh = guard.try_acquire("document_analysis", "doc-9", Some(Duration::from_secs(60)));
        assert!(fresh.is_acquired());

        drop(stale);
        assert!(guard.is_held("document_analysis", "doc-9"));
        drop(fresh);
        assert!(!guard.is_held("document_analysis", "doc-9"));
    }

    #[test]
    fn test_reclaim_abandoned_uses_ceiling_for_untimed_locks() {
        let clock = ManualClock::default();
        let guard = IdempotencyGuard::new(Arc::new(clock.clone()));

        let untimed = guard.try_acquire("strategy_change", "s-1", None).into_lease().unwrap();
        let _recent = guard.try_acquire("note_analysis", "n-1", None).into_lease().unwrap();
        // Simulate a crashed holder that will never drop its lease
        std::mem::forget(untimed);

        clock.advance_std(Duration::from_secs(20 * 60));
        let _late = guard.try_acquire("note_analysis", "n-2", None).into_lease().unwrap();

        assert_eq!(guard.reclaim_abandoned(Duration::from_secs(15 * 60)), 2);
        let remaining: Vec<String> = guard.active_locks().into_iter().map(|lock| lock.subject_id).collect();
        assert_eq!(remaining, vec!["n-2".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquire_has_one_winner() {
        let guard = IdempotencyGuard::new(system_clock());

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let guard = guard.clone();
                tokio::spawn(async move { guard.try_acquire("deal_analysis", "d-42", None) })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        assert_eq!(results.iter().filter(|result| result.is_acquired()).count(), 1);
    }
}

//! Global and per-operation kill switches.
//!
//! Switch rows live behind [`KillSwitchStore`] so several processes can share
//! them (for example a table next to the job rows). Two read policies exist:
//! [`KillSwitchRegistry::is_disabled`] fails closed and is used on the
//! admission path; [`KillSwitchRegistry::status`] surfaces the read error so a
//! caller can pick its own policy (the scheduler fails open).

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::clock::SharedClock;
use crate::observability::ObservabilityLayer;
use crate::types::AuditEvent;
use crate::{QueueError, QueueResult};

const GLOBAL_SCOPE: &str = "global";

/// What a switch blocks
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum KillSwitchScope {
    /// Every analysis operation
    Global,
    /// One operation name
    Operation(String),
}

impl KillSwitchScope {
    pub fn operation(name: impl Into<String>) -> Self {
        Self::from(name.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Global => GLOBAL_SCOPE,
            Self::Operation(name) => name,
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Self::Global)
    }
}

impl fmt::Display for KillSwitchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for KillSwitchScope {
    fn from(name: String) -> Self {
        if name == GLOBAL_SCOPE {
            Self::Global
        } else {
            Self::Operation(name)
        }
    }
}

impl From<&str> for KillSwitchScope {
    fn from(name: &str) -> Self {
        Self::from(name.to_string())
    }
}

impl From<KillSwitchScope> for String {
    fn from(scope: KillSwitchScope) -> Self {
        scope.as_str().to_string()
    }
}

/// Named flag with activation provenance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillSwitch {
    pub scope: KillSwitchScope,
    pub active: bool,
    pub reason: Option<String>,
    pub activated_by: Option<String>,
    pub activated_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl KillSwitch {
    /// Inactive switch, the implicit state of every scope never written
    pub fn inactive(scope: KillSwitchScope, now: DateTime<Utc>) -> Self {
        Self {
            scope,
            active: false,
            reason: None,
            activated_by: None,
            activated_at: None,
            updated_at: now,
        }
    }
}

/// Persistence for switch rows
#[async_trait]
pub trait KillSwitchStore: Send + Sync {
    async fn load(&self, scope: &KillSwitchScope) -> QueueResult<Option<KillSwitch>>;

    async fn save(&self, switch: KillSwitch) -> QueueResult<()>;

    async fn list(&self) -> QueueResult<Vec<KillSwitch>>;
}

/// Process-local switch store. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryKillSwitchStore {
    switches: Arc<RwLock<HashMap<KillSwitchScope, KillSwitch>>>,
    fail_reads: Arc<AtomicBool>,
    fail_writes_for: Arc<RwLock<BTreeSet<KillSwitchScope>>>,
}

impl MemoryKillSwitchStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every read fail (test helper)
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make writes for one scope fail (test helper)
    pub fn fail_writes_for(&self, scope: KillSwitchScope) {
        self.fail_writes_for.write().insert(scope);
    }

    fn check_reads(&self) -> QueueResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(QueueError::kill_switch_store("kill switch store unreachable"));
        }
        Ok(())
    }
}

#[async_trait]
impl KillSwitchStore for MemoryKillSwitchStore {
    async fn load(&self, scope: &KillSwitchScope) -> QueueResult<Option<KillSwitch>> {
        self.check_reads()?;
        Ok(self.switches.read().get(scope).cloned())
    }

    async fn save(&self, switch: KillSwitch) -> QueueResult<()> {
        if self.fail_writes_for.read().contains(&switch.scope) {
            return Err(QueueError::kill_switch_store(format!(
                "write rejected for scope {}",
                switch.scope
            )));
        }
        self.switches.write().insert(switch.scope.clone(), switch);
        Ok(())
    }

    async fn list(&self) -> QueueResult<Vec<KillSwitch>> {
        self.check_reads()?;
        Ok(self.switches.read().values().cloned().collect())
    }
}

/// Process-wide set of named switches
pub struct KillSwitchRegistry {
    store: Arc<dyn KillSwitchStore>,
    /// Operation scopes seen by checks or registered explicitly
    known: RwLock<BTreeSet<String>>,
    clock: SharedClock,
    observability: Arc<ObservabilityLayer>,
}

impl KillSwitchRegistry {
    pub fn new(
        store: Arc<dyn KillSwitchStore>,
        clock: SharedClock,
        observability: Arc<ObservabilityLayer>,
    ) -> Self {
        Self {
            store,
            known: RwLock::new(BTreeSet::new()),
            clock,
            observability,
        }
    }

    /// Registry over a fresh in-memory store
    pub fn in_memory(clock: SharedClock, observability: Arc<ObservabilityLayer>) -> Self {
        Self::new(Arc::new(MemoryKillSwitchStore::new()), clock, observability)
    }

    /// Make an operation scope known so emergency shutdown covers it
    pub fn register_scope(&self, operation: impl Into<String>) {
        let scope = KillSwitchScope::from(operation.into());
        if let KillSwitchScope::Operation(name) = scope {
            self.known.write().insert(name);
        }
    }

    /// Operation scopes known to this registry
    pub fn known_scopes(&self) -> Vec<String> {
        self.known.read().iter().cloned().collect()
    }

    /// Whether `scope` is blocked. The global switch dominates every
    /// operation scope. A read failure counts as blocked.
    pub async fn is_disabled(&self, scope: impl Into<KillSwitchScope>) -> bool {
        let scope = scope.into();
        match self.status(scope.clone()).await {
            Ok(disabled) => disabled,
            Err(err) => {
                error!(scope = %scope, error = %err, "Kill switch check failed, treating as disabled");
                true
            }
        }
    }

    /// Whether `scope` is blocked, surfacing read failures to the caller
    pub async fn status(&self, scope: impl Into<KillSwitchScope>) -> QueueResult<bool> {
        let scope = scope.into();
        if let KillSwitchScope::Operation(name) = &scope {
            self.register_scope(name.clone());
        }

        if self.is_active(&KillSwitchScope::Global).await? {
            return Ok(true);
        }
        if scope.is_global() {
            return Ok(false);
        }
        self.is_active(&scope).await
    }

    /// Turn a switch on
    pub async fn activate(
        &self,
        scope: impl Into<KillSwitchScope>,
        reason: impl Into<String>,
        activated_by: impl Into<String>,
    ) -> QueueResult<()> {
        let scope = scope.into();
        let reason = reason.into();
        let actor = activated_by.into();
        let now = self.clock.now();

        if let KillSwitchScope::Operation(name) = &scope {
            self.register_scope(name.clone());
        }

        self.store
            .save(KillSwitch {
                scope: scope.clone(),
                active: true,
                reason: Some(reason.clone()),
                activated_by: Some(actor.clone()),
                activated_at: Some(now),
                updated_at: now,
            })
            .await?;

        warn!(scope = %scope, reason = %reason, actor = %actor, "Kill switch activated");
        self.observability.record(AuditEvent::KillSwitchActivated {
            scope: scope.to_string(),
            reason,
            actor,
            at: now,
        });
        Ok(())
    }

    /// Clear a switch. Clearing the global switch leaves operation switches untouched.
    pub async fn deactivate(
        &self,
        scope: impl Into<KillSwitchScope>,
        deactivated_by: impl Into<String>,
    ) -> QueueResult<()> {
        let scope = scope.into();
        let actor = deactivated_by.into();
        let now = self.clock.now();

        self.store.save(KillSwitch::inactive(scope.clone(), now)).await?;

        info!(scope = %scope, actor = %actor, "Kill switch deactivated");
        self.observability.record(AuditEvent::KillSwitchDeactivated {
            scope: scope.to_string(),
            actor,
            at: now,
        });
        Ok(())
    }

    /// Activate the global switch and every known operation switch. Returns
    /// `false` if any activation failed; `list_active` then shows which
    /// scopes stayed off.
    pub async fn emergency_shutdown(
        &self,
        reason: impl Into<String>,
        activated_by: impl Into<String>,
    ) -> bool {
        let reason = reason.into();
        let actor = activated_by.into();

        let mut scopes: BTreeSet<String> = self.known.read().clone();
        match self.store.list().await {
            Ok(stored) => scopes.extend(
                stored
                    .into_iter()
                    .filter(|switch| !switch.scope.is_global())
                    .map(|switch| switch.scope.to_string()),
            ),
            Err(err) => warn!(error = %err, "Could not list stored kill switches during emergency shutdown"),
        }

        let mut all_ok = true;
        let targets = std::iter::once(KillSwitchScope::Global)
            .chain(scopes.into_iter().map(KillSwitchScope::Operation));
        for scope in targets {
            if let Err(err) = self.activate(scope.clone(), reason.clone(), actor.clone()).await {
                error!(scope = %scope, error = %err, "Emergency shutdown could not activate kill switch");
                all_ok = false;
            }
        }

        if all_ok {
            warn!(reason = %reason, actor = %actor, "Emergency shutdown: all kill switches active");
        }
        all_ok
    }

    /// Every switch currently on
    pub async fn list_active(&self) -> QueueResult<Vec<KillSwitch>> {
        let mut active: Vec<KillSwitch> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|switch| switch.active)
            .collect();
        active.sort_by(|a, b| a.scope.cmp(&b.scope));
        Ok(active)
    }

    /// Stored row for a scope, or the implicit inactive default
    pub async fn get(&self, scope: impl Into<KillSwitchScope>) -> QueueResult<KillSwitch> {
        let scope = scope.into();
        Ok(self
            .store
            .load(&scope)
            .await?
            .unwrap_or_else(|| KillSwitch::inactive(scope, self.clock.now())))
    }

    async fn is_active(&self, scope: &KillSwitchScope) -> QueueResult<bool> {
        Ok(self
            .store
            .load(scope)
            .await?
            .map(|switch| switch.active)
            .unwrap_or(false))
    }
}

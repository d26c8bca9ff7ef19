use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Tenant-scoped context for queue operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCtx {
    /// Owning organization or fund
    pub tenant_id: String,

    /// Who asked for the work (user id, "system", a webhook name, ...)
    pub actor_id: Option<String>,

    /// Optional trace ID for correlating logs across services
    pub trace_id: Option<String>,

    /// Additional tags for reporting
    pub tags: HashMap<String, String>,
}

impl QueueCtx {
    /// Create a new context for the given tenant
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            actor_id: None,
            trace_id: None,
            tags: HashMap::new(),
        }
    }

    /// Record the acting user or system component
    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    /// Add a trace ID
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Add a reporting tag
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Actor name used in audit records
    pub fn actor(&self) -> &str {
        self.actor_id.as_deref().unwrap_or("system")
    }
}

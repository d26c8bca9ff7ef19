use std::str::FromStr;
use std::time::Duration;

/// Circuit breaker thresholds for one operation name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Failures within one monitor window that open the breaker
    pub failure_threshold: u32,
    /// Admitted calls allowed within one monitor window
    pub call_budget_limit: u32,
    /// How long an open breaker rejects calls before allowing a probe
    pub recovery_timeout: Duration,
    /// Length of the rolling window for failure and call counters
    pub monitor_window: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            call_budget_limit: 5,
            recovery_timeout: Duration::from_millis(300_000),
            monitor_window: Duration::from_millis(60_000),
        }
    }
}

impl BreakerConfig {
    /// Load from `DEAL_QUEUE_BREAKER_*` environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            failure_threshold: env_or("DEAL_QUEUE_BREAKER_FAILURE_THRESHOLD", defaults.failure_threshold),
            call_budget_limit: env_or("DEAL_QUEUE_BREAKER_CALL_BUDGET", defaults.call_budget_limit),
            recovery_timeout: env_millis("DEAL_QUEUE_BREAKER_RECOVERY_TIMEOUT_MS", defaults.recovery_timeout),
            monitor_window: env_millis("DEAL_QUEUE_BREAKER_MONITOR_WINDOW_MS", defaults.monitor_window),
        }
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_call_budget(mut self, limit: u32) -> Self {
        self.call_budget_limit = limit;
        self
    }

    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    pub fn with_monitor_window(mut self, window: Duration) -> Self {
        self.monitor_window = window;
        self
    }
}

/// Configuration for the queue manager
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Breaker thresholds applied to `process_<queue>` operations
    pub breaker: BreakerConfig,
    /// Terminal rows older than this are deleted by cleanup
    pub retention: Duration,
    /// Claimed or processing rows older than this are expired by cleanup
    pub stale_claim_timeout: Duration,
    /// Staleness ceiling for idempotency locks taken without an explicit TTL
    pub lock_ttl: Duration,
    /// Interval between background cleanup runs
    pub cleanup_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            breaker: BreakerConfig::default(),
            retention: Duration::from_secs(7 * 24 * 3600), // 7 days
            stale_claim_timeout: Duration::from_secs(30 * 60),
            lock_ttl: Duration::from_secs(15 * 60),
            cleanup_interval: Duration::from_secs(3600),
        }
    }
}

impl QueueConfig {
    /// Load from `DEAL_QUEUE_*` environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            breaker: BreakerConfig::from_env(),
            retention: env_secs("DEAL_QUEUE_RETENTION_SECS", defaults.retention),
            stale_claim_timeout: env_secs("DEAL_QUEUE_STALE_CLAIM_TIMEOUT_SECS", defaults.stale_claim_timeout),
            lock_ttl: env_secs("DEAL_QUEUE_LOCK_TTL_SECS", defaults.lock_ttl),
            cleanup_interval: env_secs("DEAL_QUEUE_CLEANUP_INTERVAL_SECS", defaults.cleanup_interval),
        }
    }
}

/// Configuration for the polling scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Queue drained on every tick
    pub queue_name: String,
    /// Worker identity recorded on claimed rows
    pub worker_id: String,
    /// Time between recurring ticks
    pub interval: Duration,
    /// Minimum time between two drain attempts
    pub cooldown: Duration,
    /// Jobs claimed per tick
    pub max_processing_items: usize,
    /// Delay before the immediate tick issued by `start`
    pub startup_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_name: "deal_analysis".to_string(),
            worker_id: "scheduler".to_string(),
            interval: Duration::from_secs(5 * 60),
            cooldown: Duration::from_secs(5 * 60),
            max_processing_items: 3,
            startup_delay: Duration::from_secs(5),
        }
    }
}

impl SchedulerConfig {
    /// Load from `DEAL_QUEUE_SCHEDULER_*` environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            queue_name: std::env::var("DEAL_QUEUE_SCHEDULER_QUEUE").unwrap_or(defaults.queue_name),
            worker_id: std::env::var("DEAL_QUEUE_SCHEDULER_WORKER_ID").unwrap_or(defaults.worker_id),
            interval: env_minutes("DEAL_QUEUE_SCHEDULER_INTERVAL_MINUTES", defaults.interval),
            cooldown: env_minutes("DEAL_QUEUE_SCHEDULER_COOLDOWN_MINUTES", defaults.cooldown),
            max_processing_items: env_or("DEAL_QUEUE_SCHEDULER_MAX_ITEMS", defaults.max_processing_items),
            startup_delay: env_secs("DEAL_QUEUE_SCHEDULER_STARTUP_DELAY_SECS", defaults.startup_delay),
        }
    }

    /// Scheduler for the given queue with default timings
    pub fn for_queue(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            ..Self::default()
        }
    }
}

/// Complete configuration for a resilience-protected queue
#[derive(Debug, Clone, Default)]
pub struct ResilienceConfig {
    pub queue: QueueConfig,
    pub scheduler: SchedulerConfig,
}

impl ResilienceConfig {
    pub fn from_env() -> Self {
        Self {
            queue: QueueConfig::from_env(),
            scheduler: SchedulerConfig::from_env(),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn env_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_minutes(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(|minutes| Duration::from_secs(minutes * 60))
        .unwrap_or(default)
}

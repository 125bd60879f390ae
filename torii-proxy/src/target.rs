use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use torii_core::config::TargetConfig;

/// Health state of one backend endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetState {
    Healthy,
    Unhealthy,
    DnsError,
}

impl TargetState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => TargetState::Unhealthy,
            2 => TargetState::DnsError,
            _ => TargetState::Healthy,
        }
    }
}

/// One backend endpoint with live health state and counters.
///
/// Identity `(host, port)` and the configured weight/priority are
/// immutable; everything else is updated atomically so selection and
/// metrics reads never take a lock.
pub struct Target {
    pub host: String,
    pub port: u16,
    pub weight: u32,
    pub priority: i32,
    pub tags: Vec<String>,

    state: AtomicU8,
    active_connections: AtomicI64,
    total_requests: AtomicU64,
    total_failures: AtomicU64,
    consecutive_successes: AtomicU32,
    consecutive_failures: AtomicU32,
    last_check_ms: AtomicU64,
    last_failure_ms: AtomicU64,
}

/// Point-in-time view of a target, exposed by the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct TargetSnapshot {
    pub host: String,
    pub port: u16,
    pub weight: u32,
    pub priority: i32,
    pub tags: Vec<String>,
    pub state: TargetState,
    pub active_connections: u64,
    pub total_requests: u64,
    pub total_failures: u64,
}

impl Target {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            weight: 100,
            priority: 0,
            tags: Vec::new(),
            state: AtomicU8::new(0),
            active_connections: AtomicI64::new(0),
            total_requests: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            consecutive_successes: AtomicU32::new(0),
            consecutive_failures: AtomicU32::new(0),
            last_check_ms: AtomicU64::new(0),
            last_failure_ms: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &TargetConfig) -> Self {
        let mut target = Self::new(config.host.clone(), config.port);
        target.weight = config.weight;
        target.priority = config.priority;
        target.tags = config.tags.clone();
        target
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn state(&self) -> TargetState {
        TargetState::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub fn is_healthy(&self) -> bool {
        self.state() == TargetState::Healthy
    }

    /// Weight used for selection; zero while unhealthy.
    pub fn effective_weight(&self) -> u32 {
        if self.is_healthy() {
            self.weight
        } else {
            0
        }
    }

    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed).max(0) as u64
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn total_failures(&self) -> u64 {
        self.total_failures.load(Ordering::Relaxed)
    }

    pub fn acquire_connection(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn release_connection(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.consecutive_successes.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_successes.store(0, Ordering::Relaxed);
        self.last_failure_ms.store(epoch_ms(), Ordering::Relaxed);
    }

    /// Record a successful probe; returns the consecutive success run.
    pub fn probe_succeeded(&self) -> u32 {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Record a failed probe; returns the consecutive failure run.
    pub fn probe_failed(&self) -> u32 {
        self.consecutive_successes.store(0, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn touch_check_time(&self) {
        self.last_check_ms.store(epoch_ms(), Ordering::Relaxed);
    }

    pub fn mark_healthy(&self) {
        self.state.store(0, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    pub fn mark_unhealthy(&self) {
        self.state.store(1, Ordering::Relaxed);
        self.consecutive_successes.store(0, Ordering::Relaxed);
    }

    pub fn mark_dns_error(&self) {
        self.state.store(2, Ordering::Relaxed);
        self.consecutive_successes.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TargetSnapshot {
        TargetSnapshot {
            host: self.host.clone(),
            port: self.port,
            weight: self.weight,
            priority: self.priority,
            tags: self.tags.clone(),
            state: self.state(),
            active_connections: self.active_connections(),
            total_requests: self.total_requests(),
            total_failures: self.total_failures(),
        }
    }
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

use serde::Serialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use torii_core::config::CircuitBreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    half_open_allowed: u32,
}

/// Per-upstream failure gate.
///
/// CLOSED → OPEN once `failure_threshold` failures accumulate;
/// OPEN → HALF_OPEN lazily on the next state query after `timeout`,
/// granting a budget of `half_open_requests` trial executions;
/// HALF_OPEN → CLOSED after `success_threshold` successes, or back to
/// OPEN on any failure. Transitions are serialized by the inner lock.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

/// Point-in-time view exposed by the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout: u64,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
                half_open_allowed: 0,
            }),
            config,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// OPEN decays into HALF_OPEN once the timeout has elapsed.
    fn maybe_half_open(&self, inner: &mut Inner) {
        if inner.state != CircuitState::Open {
            return;
        }
        let elapsed = inner
            .last_failure
            .map(|t| t.elapsed())
            .unwrap_or(Duration::MAX);
        if elapsed >= Duration::from_secs(self.config.timeout) {
            inner.state = CircuitState::HalfOpen;
            inner.half_open_allowed = self.config.half_open_requests;
        }
    }

    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.maybe_half_open(&mut inner);
        inner.state
    }

    /// Whether a request may proceed. In HALF_OPEN this consumes one
    /// unit of the trial budget, so at most `half_open_requests`
    /// executions are admitted per probe window.
    pub fn can_execute(&self) -> bool {
        if !self.config.enabled {
            return true;
        }
        let mut inner = self.lock();
        self.maybe_half_open(&mut inner);
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if inner.half_open_allowed > 0 {
                    inner.half_open_allowed -= 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.success_count += 1;
            if inner.success_count >= self.config.success_threshold {
                close(&mut inner);
            }
        } else {
            inner.failure_count = 0;
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());

        if inner.state == CircuitState::HalfOpen
            || inner.failure_count >= self.config.failure_threshold
        {
            open(&mut inner);
        }
    }

    /// Back to CLOSED with zeroed counters.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.last_failure = None;
        inner.half_open_allowed = 0;
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let mut inner = self.lock();
        self.maybe_half_open(&mut inner);
        CircuitBreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            failure_threshold: self.config.failure_threshold,
            success_threshold: self.config.success_threshold,
            timeout: self.config.timeout,
        }
    }
}

fn open(inner: &mut Inner) {
    inner.state = CircuitState::Open;
    inner.success_count = 0;
}

fn close(inner: &mut Inner) {
    inner.state = CircuitState::Closed;
    inner.failure_count = 0;
    inner.success_count = 0;
}

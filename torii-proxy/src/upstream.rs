use crate::balancer::LoadBalancer;
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerSnapshot};
use crate::health::HealthChecker;
use crate::target::{Target, TargetSnapshot};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use torii_core::config::UpstreamConfig;

/// A named pool of targets with one balancer, one circuit breaker and
/// one health checker.
///
/// The target list is shared with the health checker, which holds it
/// as a back-reference; `stop` cancels the checker before the pool is
/// discarded.
pub struct Upstream {
    config: UpstreamConfig,
    targets: Arc<RwLock<Vec<Arc<Target>>>>,
    balancer: LoadBalancer,
    circuit_breaker: CircuitBreaker,
    health_checker: HealthChecker,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpstreamSnapshot {
    pub name: String,
    pub algorithm: &'static str,
    pub targets: Vec<TargetSnapshot>,
    pub circuit_breaker: CircuitBreakerSnapshot,
    pub health_check: HealthCheckSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckSummary {
    pub enabled: bool,
    pub interval: u64,
}

impl Upstream {
    pub fn new(config: UpstreamConfig) -> Self {
        let targets: Vec<Arc<Target>> = config
            .targets
            .iter()
            .map(|t| Arc::new(Target::from_config(t)))
            .collect();
        let targets = Arc::new(RwLock::new(targets));

        Self {
            balancer: LoadBalancer::new(config.algorithm),
            circuit_breaker: CircuitBreaker::new(config.circuit_breaker.clone()),
            health_checker: HealthChecker::new(config.health_check.clone(), Arc::clone(&targets)),
            targets,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    pub fn health_checker(&self) -> &HealthChecker {
        &self.health_checker
    }

    /// Launch the health checker.
    pub fn start(&self) {
        self.health_checker.start();
    }

    /// Stop the health checker; called before the upstream is dropped.
    pub async fn stop(&self) {
        self.health_checker.stop().await;
    }

    pub fn targets(&self) -> Vec<Arc<Target>> {
        match self.targets.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Register an extra target at runtime (admin surface). The health
    /// checker picks it up on its next round through the shared list.
    pub fn add_target(&self, target: Arc<Target>) {
        match self.targets.write() {
            Ok(mut guard) => guard.push(target),
            Err(poisoned) => poisoned.into_inner().push(target),
        }
    }

    pub fn select_target(&self, client_ip: Option<&str>) -> Option<Arc<Target>> {
        self.balancer.select(&self.targets(), client_ip)
    }

    pub fn snapshot(&self) -> UpstreamSnapshot {
        UpstreamSnapshot {
            name: self.config.name.clone(),
            algorithm: self.balancer.algorithm().as_str(),
            targets: self.targets().iter().map(|t| t.snapshot()).collect(),
            circuit_breaker: self.circuit_breaker.snapshot(),
            health_check: HealthCheckSummary {
                enabled: self.config.health_check.enabled,
                interval: self.config.health_check.interval,
            },
        }
    }
}

use crate::target::Target;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};
use torii_core::config::{HealthCheckConfig, HealthCheckType};

enum ProbeOutcome {
    Healthy,
    Unhealthy,
    DnsFailure,
}

/// Periodic prober driving target state transitions for one upstream.
///
/// `start` builds the probe client and spawns the check loop; `stop`
/// aborts the loop, which drops the client with it. Each round probes
/// every target concurrently, then sleeps `interval`; rounds never
/// overlap.
pub struct HealthChecker {
    config: HealthCheckConfig,
    targets: Arc<RwLock<Vec<Arc<Target>>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HealthChecker {
    pub fn new(config: HealthCheckConfig, targets: Arc<RwLock<Vec<Arc<Target>>>>) -> Self {
        Self {
            config,
            targets,
            task: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.task).is_some()
    }

    pub fn start(&self) {
        if !self.config.enabled {
            return;
        }

        let mut guard = lock(&self.task);
        if guard.is_some() {
            return;
        }

        let config = self.config.clone();
        let targets = Arc::clone(&self.targets);

        *guard = Some(tokio::spawn(async move {
            let client = match probe_client(&config) {
                Ok(client) => client,
                Err(e) => {
                    error!(error = %e, "Failed to build health check client");
                    return;
                }
            };

            loop {
                check_all(&client, &config, &snapshot(&targets)).await;
                tokio::time::sleep(Duration::from_secs(config.interval)).await;
            }
        }));
    }

    /// Cancel the check loop. The probe client lives inside the task
    /// and is released here.
    pub async fn stop(&self) {
        let handle = lock(&self.task).take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
    }

    /// Probe one target immediately. When the checker is not running
    /// this uses a client scoped to the call.
    pub async fn check_now(&self, target: &Arc<Target>) -> bool {
        match probe_client(&self.config) {
            Ok(client) => check_target(&client, &self.config, target).await,
            Err(e) => error!(error = %e, "Failed to build health check client"),
        }
        target.is_healthy()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn snapshot(targets: &RwLock<Vec<Arc<Target>>>) -> Vec<Arc<Target>> {
    match targets.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

fn probe_client(config: &HealthCheckConfig) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout))
        .build()
}

async fn check_all(client: &reqwest::Client, config: &HealthCheckConfig, targets: &[Arc<Target>]) {
    let mut probes = JoinSet::new();
    for target in targets {
        let client = client.clone();
        let config = config.clone();
        let target = Arc::clone(target);
        probes.spawn(async move {
            check_target(&client, &config, &target).await;
        });
    }
    while probes.join_next().await.is_some() {}
}

async fn check_target(client: &reqwest::Client, config: &HealthCheckConfig, target: &Arc<Target>) {
    target.touch_check_time();

    match probe(client, config, target).await {
        ProbeOutcome::Healthy => {
            let run = target.probe_succeeded();
            if run >= config.healthy_threshold {
                if !target.is_healthy() {
                    info!(addr = %target.address(), "Target recovered");
                }
                target.mark_healthy();
            }
        }
        failed => {
            let run = target.probe_failed();
            if run >= config.unhealthy_threshold {
                if target.is_healthy() {
                    warn!(addr = %target.address(), "Target marked unhealthy");
                }
                match failed {
                    ProbeOutcome::DnsFailure => target.mark_dns_error(),
                    _ => target.mark_unhealthy(),
                }
            }
        }
    }
}

async fn probe(
    client: &reqwest::Client,
    config: &HealthCheckConfig,
    target: &Target,
) -> ProbeOutcome {
    let timeout = Duration::from_secs(config.timeout);

    // Resolve first so name failures surface as DNS_ERROR, not as a
    // generic probe failure.
    let resolved = tokio::time::timeout(timeout, tokio::net::lookup_host(target.address())).await;
    match resolved {
        Ok(Ok(mut addrs)) => {
            if addrs.next().is_none() {
                return ProbeOutcome::DnsFailure;
            }
        }
        Ok(Err(_)) => return ProbeOutcome::DnsFailure,
        Err(_) => return ProbeOutcome::Unhealthy,
    }

    match config.check_type {
        HealthCheckType::Http => {
            let url = format!("{}{}", target.url(), config.path);
            match client.get(&url).send().await {
                Ok(response) => {
                    if config.expected_statuses.contains(&response.status().as_u16()) {
                        ProbeOutcome::Healthy
                    } else {
                        ProbeOutcome::Unhealthy
                    }
                }
                Err(_) => ProbeOutcome::Unhealthy,
            }
        }
        HealthCheckType::Tcp => {
            match tokio::time::timeout(timeout, tokio::net::TcpStream::connect(target.address()))
                .await
            {
                Ok(Ok(stream)) => {
                    drop(stream);
                    ProbeOutcome::Healthy
                }
                _ => ProbeOutcome::Unhealthy,
            }
        }
    }
}

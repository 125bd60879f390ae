use crate::upstream::Upstream;
use dashmap::DashMap;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};
use torii_core::http::{GatewayRequest, GatewayResponse};
use torii_core::GatewayError;

/// Headers that never cross the proxy, in either direction.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "host",
];

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

/// Registry of upstream pools plus the retrying proxy transport.
///
/// `start` builds the shared HTTP client and launches every health
/// checker; `stop` cancels the checkers first, then releases the
/// client.
pub struct UpstreamManager {
    upstreams: DashMap<String, Arc<Upstream>>,
    client: Mutex<Option<reqwest::Client>>,
}

impl UpstreamManager {
    pub fn new() -> Self {
        Self {
            upstreams: DashMap::new(),
            client: Mutex::new(None),
        }
    }

    pub async fn start(&self) {
        let connect_timeout = self
            .upstreams
            .iter()
            .map(|u| u.config().connect_timeout)
            .min()
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS);

        {
            let mut guard = lock(&self.client);
            if guard.is_none() {
                *guard = Some(build_client(connect_timeout));
            }
        }

        for upstream in self.list_upstreams() {
            upstream.start();
        }
    }

    pub async fn stop(&self) {
        for upstream in self.list_upstreams() {
            upstream.stop().await;
        }
        *lock(&self.client) = None;
    }

    pub fn add_upstream(&self, config: torii_core::config::UpstreamConfig) -> Arc<Upstream> {
        let upstream = Arc::new(Upstream::new(config));
        self.upstreams
            .insert(upstream.name().to_string(), Arc::clone(&upstream));
        upstream
    }

    pub fn get_upstream(&self, name: &str) -> Option<Arc<Upstream>> {
        self.upstreams.get(name).map(|u| Arc::clone(u.value()))
    }

    /// Remove an upstream, stopping its health checker before the pool
    /// is discarded.
    pub async fn remove_upstream(&self, name: &str) -> bool {
        match self.upstreams.remove(name) {
            Some((_, upstream)) => {
                upstream.stop().await;
                true
            }
            None => false,
        }
    }

    pub fn list_upstreams(&self) -> Vec<Arc<Upstream>> {
        self.upstreams.iter().map(|u| Arc::clone(u.value())).collect()
    }

    pub fn len(&self) -> usize {
        self.upstreams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upstreams.is_empty()
    }

    fn http_client(&self) -> reqwest::Client {
        lock(&self.client)
            .get_or_insert_with(|| build_client(DEFAULT_CONNECT_TIMEOUT_MS))
            .clone()
    }

    /// Forward a request to the named upstream, applying the breaker
    /// gate, target selection, header rewriting and the retry policy.
    /// Failures are converted to JSON error responses here; this never
    /// returns an error.
    pub async fn proxy_request(
        &self,
        request: &GatewayRequest,
        upstream_name: &str,
        path: &str,
        additional_headers: &HashMap<String, String>,
    ) -> GatewayResponse {
        let Some(upstream) = self.get_upstream(upstream_name) else {
            return GatewayError::UpstreamNotFound(upstream_name.to_string()).to_response();
        };

        if !upstream.circuit_breaker().can_execute() {
            return GatewayError::CircuitOpen.to_response();
        }

        let Some(target) = upstream.select_target(Some(&request.client_ip)) else {
            return GatewayError::NoHealthyTarget.to_response();
        };

        let method = match reqwest::Method::from_bytes(request.method.as_bytes()) {
            Ok(method) => method,
            Err(_) => {
                return GatewayError::UpstreamOther(format!("invalid method {:?}", request.method))
                    .to_response();
            }
        };

        let mut url = format!("{}{}", target.url(), path);
        if !request.query.is_empty() {
            url.push('?');
            url.push_str(&request.query);
        }

        let mut outbound = filter_hop_by_hop(&request.headers);
        // reqwest derives content-length from the body it is given
        outbound.remove("content-length");
        outbound.insert("x-forwarded-for".to_string(), request.client_ip.clone());
        outbound.insert("x-forwarded-proto".to_string(), request.scheme.clone());
        outbound.insert(
            "x-forwarded-host".to_string(),
            request.host().unwrap_or("").to_string(),
        );
        for (name, value) in additional_headers {
            outbound.insert(name.to_lowercase(), value.clone());
        }
        let header_map = to_header_map(&outbound);

        let client = self.http_client();
        let retry = &upstream.config().retry;
        let attempts = if retry.enabled { retry.max_retries + 1 } else { 1 };
        let read_timeout = Duration::from_millis(upstream.config().read_timeout);
        let mut last_error: Option<reqwest::Error> = None;

        // The target is pinned for the whole request; every retry goes
        // to the one selected above.
        for attempt in 0..attempts {
            target.acquire_connection();

            let result = client
                .request(method.clone(), &url)
                .headers(header_map.clone())
                .body(request.body.clone())
                .timeout(read_timeout)
                .send()
                .await;

            match result {
                Ok(response) => {
                    let status = response.status().as_u16();

                    if retry.retry_on_status.contains(&status) && attempt + 1 < attempts {
                        target.release_connection();
                        debug!(addr = %target.address(), status, attempt, "Retrying on upstream status");
                        tokio::time::sleep(backoff(retry.backoff_factor, attempt)).await;
                        continue;
                    }

                    let headers = collect_headers(response.headers());
                    match response.bytes().await {
                        Ok(body) => {
                            target.release_connection();
                            // Server errors pass through to the client
                            // but count against the target and breaker.
                            if status >= 500 {
                                target.record_failure();
                                upstream.circuit_breaker().record_failure();
                            } else {
                                target.record_success();
                                upstream.circuit_breaker().record_success();
                            }

                            let mut resp = GatewayResponse::new(status);
                            resp.headers = filter_hop_by_hop(&headers);
                            resp.body = body;
                            return resp;
                        }
                        Err(e) => {
                            target.release_connection();
                            target.record_failure();
                            last_error = Some(e);
                            break;
                        }
                    }
                }
                Err(e) => {
                    target.release_connection();
                    target.record_failure();

                    let retryable = e.is_timeout() || e.is_connect();
                    last_error = Some(e);

                    if retryable && attempt + 1 < attempts {
                        debug!(addr = %target.address(), attempt, "Retrying after transport error");
                        tokio::time::sleep(backoff(retry.backoff_factor, attempt)).await;
                        continue;
                    }
                    break;
                }
            }
        }

        upstream.circuit_breaker().record_failure();
        warn!(
            upstream = %upstream_name,
            addr = %target.address(),
            error = ?last_error.as_ref().map(|e| e.to_string()),
            "Upstream exchange failed"
        );

        match &last_error {
            Some(e) if e.is_timeout() => GatewayError::UpstreamTimeout.to_response(),
            Some(e) if e.is_connect() => GatewayError::UpstreamConnect.to_response(),
            Some(e) => GatewayError::UpstreamOther(e.to_string()).to_response(),
            None => GatewayError::UpstreamOther("upstream exchange failed".to_string()).to_response(),
        }
    }
}

impl Default for UpstreamManager {
    fn default() -> Self {
        Self::new()
    }
}

fn lock(
    mutex: &Mutex<Option<reqwest::Client>>,
) -> std::sync::MutexGuard<'_, Option<reqwest::Client>> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn build_client(connect_timeout_ms: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_millis(connect_timeout_ms))
        .build()
        .unwrap_or_default()
}

fn backoff(factor: f64, attempt: u32) -> Duration {
    Duration::from_secs_f64(factor * f64::powi(2.0, attempt as i32))
}

/// Strip hop-by-hop headers; idempotent.
pub fn filter_hop_by_hop(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .iter()
        .filter(|(name, _)| !HOP_BY_HOP.contains(&name.to_lowercase().as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

fn to_header_map(headers: &HashMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            map.insert(name, value);
        }
    }
    map
}

fn collect_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).to_string(),
            )
        })
        .collect()
}

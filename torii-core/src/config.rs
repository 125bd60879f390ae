use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Top-level declarative configuration for the Torii gateway.
///
/// Loaded once at startup from a YAML file plus `TORII_`-prefixed
/// environment variables; the parsed tree is handed to the core and is
/// never re-read at request time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Listener configuration.
    #[serde(default)]
    pub gateway: ListenerConfig,

    /// Upstream pools.
    #[serde(default)]
    pub upstreams: Vec<UpstreamConfig>,

    /// Services and their routes.
    #[serde(default)]
    pub services: Vec<ServiceConfig>,

    /// Global-scope plugins.
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_admin_port")]
    pub admin_port: u16,

    #[serde(default = "default_true")]
    pub admin_enabled: bool,
}

/// Load balancing algorithm for an upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Algorithm {
    #[default]
    #[serde(rename = "round-robin")]
    RoundRobin,
    #[serde(rename = "weighted")]
    Weighted,
    #[serde(rename = "least-connections")]
    LeastConnections,
    #[serde(rename = "ip-hash")]
    IpHash,
    #[serde(rename = "random")]
    Random,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::RoundRobin => "round-robin",
            Algorithm::Weighted => "weighted",
            Algorithm::LeastConnections => "least-connections",
            Algorithm::IpHash => "ip-hash",
            Algorithm::Random => "random",
        }
    }
}

/// One backend endpoint inside an upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub host: String,

    #[serde(default = "default_target_port")]
    pub port: u16,

    #[serde(default = "default_weight")]
    pub weight: u32,

    #[serde(default)]
    pub priority: i32,

    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthCheckType {
    #[default]
    Http,
    Tcp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default, rename = "type")]
    pub check_type: HealthCheckType,

    /// Probe path, appended to the target URL (http checks only).
    #[serde(default = "default_hc_path")]
    pub path: String,

    /// Seconds between check rounds.
    #[serde(default = "default_hc_interval")]
    pub interval: u64,

    /// Per-probe timeout in seconds.
    #[serde(default = "default_hc_timeout")]
    pub timeout: u64,

    #[serde(default = "default_healthy_threshold")]
    pub healthy_threshold: u32,

    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,

    #[serde(default = "default_expected_statuses")]
    pub expected_statuses: Vec<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    /// Seconds the breaker stays open before probing.
    #[serde(default = "default_cb_timeout")]
    pub timeout: u64,

    /// Trial requests admitted while half-open.
    #[serde(default = "default_half_open_requests")]
    pub half_open_requests: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_on_status")]
    pub retry_on_status: Vec<u16>,

    /// Base backoff in seconds; attempt N sleeps `backoff_factor * 2^N`.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

/// A named pool of targets with shared balancing / health / retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub name: String,

    #[serde(default)]
    pub targets: Vec<TargetConfig>,

    #[serde(default)]
    pub algorithm: Algorithm,

    #[serde(default)]
    pub health_check: HealthCheckConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Connect timeout in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Per-attempt read timeout in milliseconds.
    #[serde(default = "default_read_timeout")]
    pub read_timeout: u64,

    /// Write timeout in milliseconds.
    #[serde(default = "default_write_timeout")]
    pub write_timeout: u64,
}

/// A configured plugin at some scope (global, service, or route).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    pub name: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_plugin_config")]
    pub config: serde_json::Value,
}

/// A pattern bundle belonging to a service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub name: String,

    pub paths: Vec<String>,

    #[serde(default = "default_methods")]
    pub methods: Vec<String>,

    #[serde(default)]
    pub hosts: Vec<String>,

    /// Required request headers; a value starting with `~` is a regex.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(default = "default_true")]
    pub strip_path: bool,

    #[serde(default)]
    pub preserve_host: bool,

    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
}

impl RouteConfig {
    pub fn method_allowed(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m == method)
    }
}

/// Logical binding of routes to a named upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,

    /// Name of the upstream requests are proxied to.
    pub upstream: String,

    #[serde(default)]
    pub routes: Vec<RouteConfig>,

    #[serde(default)]
    pub plugins: Vec<PluginConfig>,

    #[serde(default = "default_protocol")]
    pub protocol: String,

    /// Path prefix prepended to the remaining path before proxying.
    #[serde(default)]
    pub path: String,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl GatewayConfig {
    /// Load configuration from a YAML file merged with `TORII_`-prefixed
    /// environment variables (`TORII_GATEWAY__PORT`, ...).
    pub fn load(config_path: Option<&str>) -> anyhow::Result<Self> {
        let mut figment = Figment::new();

        if let Some(path) = config_path {
            figment = figment.merge(Yaml::file(path));
        } else {
            for default_path in &["torii.yaml", "/etc/torii/torii.yaml", "config/torii.yaml"] {
                if std::path::Path::new(default_path).exists() {
                    figment = figment.merge(Yaml::file(default_path));
                    break;
                }
            }
        }

        figment = figment.merge(Env::prefixed("TORII_").split("__"));

        let config: Self = figment.extract()?;
        Ok(config)
    }
}

// Defaults

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            admin_port: default_admin_port(),
            admin_enabled: true,
        }
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_type: HealthCheckType::Http,
            path: default_hc_path(),
            interval: default_hc_interval(),
            timeout: default_hc_timeout(),
            healthy_threshold: default_healthy_threshold(),
            unhealthy_threshold: default_unhealthy_threshold(),
            expected_statuses: default_expected_statuses(),
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            timeout: default_cb_timeout(),
            half_open_requests: default_half_open_requests(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: default_max_retries(),
            retry_on_status: default_retry_on_status(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_admin_port() -> u16 {
    8001
}

fn default_target_port() -> u16 {
    80
}

fn default_weight() -> u32 {
    100
}

fn default_hc_path() -> String {
    "/health".to_string()
}

fn default_hc_interval() -> u64 {
    10
}

fn default_hc_timeout() -> u64 {
    5
}

fn default_healthy_threshold() -> u32 {
    2
}

fn default_unhealthy_threshold() -> u32 {
    3
}

fn default_expected_statuses() -> Vec<u16> {
    vec![200]
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    2
}

fn default_cb_timeout() -> u64 {
    30
}

fn default_half_open_requests() -> u32 {
    3
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_on_status() -> Vec<u16> {
    vec![502, 503, 504]
}

fn default_backoff_factor() -> f64 {
    0.5
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_read_timeout() -> u64 {
    30000
}

fn default_write_timeout() -> u64 {
    30000
}

fn default_plugin_config() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

fn default_methods() -> Vec<String> {
    ["GET", "POST", "PUT", "DELETE", "PATCH"]
        .iter()
        .map(|m| m.to_string())
        .collect()
}

fn default_protocol() -> String {
    "http".to_string()
}

fn default_true() -> bool {
    true
}

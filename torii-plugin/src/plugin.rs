use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;
use torii_core::http::{GatewayRequest, GatewayResponse};

/// Plugin execution phases, in the order they run for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    /// Before proxying; may reject the request with a response.
    Access = 0,
    /// Mutate the outbound request (headers, query, body) via the context.
    Rewrite = 1,
    /// Mutate response headers after the upstream answered.
    HeaderFilter = 2,
    /// Transform response body chunks.
    BodyFilter = 3,
    /// After the response was produced; side effects only.
    Log = 4,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Access => "access",
            Phase::Rewrite => "rewrite",
            Phase::HeaderFilter => "header_filter",
            Phase::BodyFilter => "body_filter",
            Phase::Log => "log",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Failure inside a plugin handler. Outside the LOG phase this surfaces
/// to the client as an internal error response.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct PluginError {
    pub message: String,
}

impl PluginError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Per-request scratchpad threaded through every phase.
///
/// The `shared` bag couples plugins within one request. Reserved keys:
/// `transformed_headers`, `transformed_querystring`, `transformed_body`
/// (request-transformer → gateway), `api_key` / `user_id` /
/// `jwt_claims` (auth plugins), `rate_limit_headers` (rate-limiting).
pub struct PluginContext {
    pub request: GatewayRequest,
    pub response: Option<GatewayResponse>,
    pub service_name: Option<String>,
    pub route_name: Option<String>,
    pub upstream_name: Option<String>,
    pub path_params: HashMap<String, String>,

    /// Consumer identified by an auth plugin; a JSON object
    /// (at minimum `{"username": ...}`).
    pub consumer: Option<Value>,
    pub authenticated: bool,

    pub start_time: Instant,
    /// Phase / stage latencies in milliseconds.
    pub latencies: HashMap<String, f64>,

    shared: HashMap<String, Value>,
}

impl PluginContext {
    pub fn new(request: GatewayRequest) -> Self {
        Self {
            request,
            response: None,
            service_name: None,
            route_name: None,
            upstream_name: None,
            path_params: HashMap::new(),
            consumer: None,
            authenticated: false,
            start_time: Instant::now(),
            latencies: HashMap::new(),
            shared: HashMap::new(),
        }
    }

    /// Set a shared value (inter-plugin communication within one request).
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.shared.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.shared.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.shared.get(key).and_then(|v| v.as_str())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.shared.remove(key)
    }

    /// String field of the consumer object, if any.
    pub fn consumer_field(&self, field: &str) -> Option<&str> {
        self.consumer.as_ref()?.get(field)?.as_str()
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64() * 1000.0
    }
}

/// A registered plugin kind: a factory that turns a JSON config into a
/// runnable instance. The registry maps names to these; new plugins are
/// added by registering a factory.
pub trait Plugin: Send + Sync {
    /// Plugin name (unique within the registry).
    fn name(&self) -> &'static str;

    /// Priority (higher runs first within a phase).
    fn priority(&self) -> i32 {
        1000
    }

    /// Phases this plugin participates in.
    fn phases(&self) -> &'static [Phase] {
        &[Phase::Access]
    }

    /// Validate the config and build an instance bound to it.
    fn configure(&self, config: &Value) -> anyhow::Result<Box<dyn PluginInstance>>;
}

/// A configured plugin executing per-phase handlers.
///
/// Instances are shared across concurrent requests; per-request state
/// belongs in the `PluginContext`, never in the instance.
#[async_trait]
pub trait PluginInstance: Send + Sync {
    fn name(&self) -> &'static str;

    fn priority(&self) -> i32;

    fn phases(&self) -> &'static [Phase];

    /// Return a response to short-circuit, `None` to continue.
    async fn access(
        &self,
        ctx: &mut PluginContext,
    ) -> Result<Option<GatewayResponse>, PluginError> {
        let _ = ctx;
        Ok(None)
    }

    async fn rewrite(&self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        let _ = ctx;
        Ok(())
    }

    async fn header_filter(&self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        let _ = ctx;
        Ok(())
    }

    /// Called per response chunk; returns the replacement chunk.
    async fn body_filter(
        &self,
        ctx: &mut PluginContext,
        chunk: Bytes,
    ) -> Result<Bytes, PluginError> {
        let _ = ctx;
        Ok(chunk)
    }

    /// After the response was produced. Failures are swallowed by the
    /// chain; logging must not break the request.
    async fn log(&self, ctx: &PluginContext) -> Result<(), PluginError> {
        let _ = ctx;
        Ok(())
    }
}

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Instant;
use torii_core::http::GatewayResponse;
use torii_plugin::plugin::{Phase, Plugin, PluginContext, PluginError, PluginInstance};

/// Local (in-process) rate limiting plugin.
///
/// One token bucket per `(identifier, period)` across the configured
/// second/minute/hour/day windows. The `policy` field is a seam for a
/// shared backend; only `local` buckets are implemented.
pub struct RateLimitingPlugin;

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RateLimitingConfig {
    second: Option<u64>,
    minute: Option<u64>,
    hour: Option<u64>,
    day: Option<u64>,
    /// ip (default), consumer, credential, or header.
    limit_by: String,
    policy: String,
    hide_client_headers: bool,
    error_code: u16,
    error_message: String,
    /// Header consulted when `limit_by = header`.
    header_name: Option<String>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            second: None,
            minute: Some(60),
            hour: None,
            day: None,
            limit_by: "ip".to_string(),
            policy: "local".to_string(),
            hide_client_headers: false,
            error_code: 429,
            error_message: "Rate limit exceeded".to_string(),
            header_name: None,
        }
    }
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
    capacity: f64,
    refill_rate: f64,
}

impl TokenBucket {
    fn new(limit: u64, window_secs: u64) -> Self {
        Self {
            tokens: limit as f64,
            last_update: Instant::now(),
            capacity: limit as f64,
            refill_rate: limit as f64 / window_secs as f64,
        }
    }

    fn consume(&mut self) -> (bool, f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            (true, self.tokens)
        } else {
            (false, self.tokens)
        }
    }
}

struct RateLimitingInstance {
    /// (period name, limit, window seconds) for each configured window.
    limits: Vec<(&'static str, u64, u64)>,
    limit_by: String,
    hide_client_headers: bool,
    error_code: u16,
    error_message: String,
    header_name: String,
    buckets: DashMap<String, TokenBucket>,
}

impl Plugin for RateLimitingPlugin {
    fn name(&self) -> &'static str {
        "rate-limiting"
    }

    fn priority(&self) -> i32 {
        900
    }

    fn phases(&self) -> &'static [Phase] {
        &[Phase::Access, Phase::HeaderFilter]
    }

    fn configure(&self, config: &Value) -> anyhow::Result<Box<dyn PluginInstance>> {
        let config: RateLimitingConfig = serde_json::from_value(config.clone())?;

        if config.policy != "local" {
            anyhow::bail!(
                "rate-limiting policy {:?} is not supported (only \"local\")",
                config.policy
            );
        }

        let mut limits = Vec::new();
        for (period, limit, window) in [
            ("second", config.second, 1),
            ("minute", config.minute, 60),
            ("hour", config.hour, 3600),
            ("day", config.day, 86400),
        ] {
            if let Some(limit) = limit {
                limits.push((period, limit, window));
            }
        }

        Ok(Box::new(RateLimitingInstance {
            limits,
            limit_by: config.limit_by,
            hide_client_headers: config.hide_client_headers,
            error_code: config.error_code,
            error_message: config.error_message,
            header_name: config
                .header_name
                .unwrap_or_else(|| "X-Consumer-ID".to_string()),
            buckets: DashMap::new(),
        }))
    }
}

impl RateLimitingInstance {
    fn identifier(&self, ctx: &PluginContext) -> String {
        match self.limit_by.as_str() {
            "consumer" => {
                let username = ctx.consumer_field("username").unwrap_or("anonymous");
                return format!("consumer:{username}");
            }
            "credential" => {
                if let Some(key) = ctx.get_str("api_key") {
                    return format!("credential:{key}");
                }
                if let Some(user_id) = ctx.get_str("user_id") {
                    return format!("credential:{user_id}");
                }
            }
            "header" => {
                if let Some(value) = ctx.request.header(&self.header_name) {
                    return format!("header:{value}");
                }
            }
            _ => {}
        }

        format!("ip:{}", ctx.request.client_ip)
    }

    fn check(&self, identifier: &str, period: &str, limit: u64, window: u64) -> (bool, f64) {
        let key = format!("{identifier}:{period}");
        let mut bucket = self
            .buckets
            .entry(key)
            .or_insert_with(|| TokenBucket::new(limit, window));
        bucket.consume()
    }

    fn retry_after(&self, identifier: &str, period: &str) -> u64 {
        let key = format!("{identifier}:{period}");
        match self.buckets.get(&key) {
            Some(bucket) => {
                let needed = 1.0 - bucket.tokens;
                ((needed / bucket.refill_rate) as u64).max(1)
            }
            None => 1,
        }
    }
}

#[async_trait]
impl PluginInstance for RateLimitingInstance {
    fn name(&self) -> &'static str {
        "rate-limiting"
    }

    fn priority(&self) -> i32 {
        900
    }

    fn phases(&self) -> &'static [Phase] {
        &[Phase::Access, Phase::HeaderFilter]
    }

    async fn access(&self, ctx: &mut PluginContext) -> Result<Option<GatewayResponse>, PluginError> {
        let identifier = self.identifier(ctx);
        let mut headers = Map::new();

        for (period, limit, window) in &self.limits {
            let (allowed, remaining) = self.check(&identifier, period, *limit, *window);

            if !self.hide_client_headers {
                headers.insert(
                    format!("X-RateLimit-Limit-{period}"),
                    Value::String(limit.to_string()),
                );
                headers.insert(
                    format!("X-RateLimit-Remaining-{period}"),
                    Value::String((remaining.max(0.0) as u64).to_string()),
                );
            }

            if !allowed {
                let mut resp = GatewayResponse::error(self.error_code, &self.error_message);
                for (name, value) in &headers {
                    if let Some(value) = value.as_str() {
                        resp.set_header(name, value);
                    }
                }
                resp.set_header(
                    "Retry-After",
                    self.retry_after(&identifier, period).to_string(),
                );
                return Ok(Some(resp));
            }
        }

        ctx.set("rate_limit_headers", Value::Object(headers));
        Ok(None)
    }

    /// Mirror the counters computed in ACCESS onto the response.
    async fn header_filter(&self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        if self.hide_client_headers {
            return Ok(());
        }
        let Some(Value::Object(headers)) = ctx.get("rate_limit_headers").cloned() else {
            return Ok(());
        };
        if let Some(response) = ctx.response.as_mut() {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    response.set_header(&name, value);
                }
            }
        }
        Ok(())
    }
}

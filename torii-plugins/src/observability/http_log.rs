use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::debug;
use torii_plugin::plugin::{Phase, Plugin, PluginContext, PluginError, PluginInstance};

/// Structured access logging in the LOG phase, optionally shipped to
/// an HTTP sink. Sink failures never affect response delivery.
pub struct HttpLogPlugin;

#[derive(Debug, Deserialize)]
#[serde(default)]
struct HttpLogConfig {
    /// POST each entry here when set.
    http_endpoint: Option<String>,
    content_type: String,
    include_request: bool,
    include_response: bool,
    include_latencies: bool,
    include_consumer: bool,
    custom_fields: Map<String, Value>,
}

impl Default for HttpLogConfig {
    fn default() -> Self {
        Self {
            http_endpoint: None,
            content_type: "application/json".to_string(),
            include_request: true,
            include_response: true,
            include_latencies: true,
            include_consumer: true,
            custom_fields: Map::new(),
        }
    }
}

struct HttpLogInstance {
    config: HttpLogConfig,
    client: reqwest::Client,
}

impl Plugin for HttpLogPlugin {
    fn name(&self) -> &'static str {
        "http-log"
    }

    fn priority(&self) -> i32 {
        100
    }

    fn phases(&self) -> &'static [Phase] {
        &[Phase::Log]
    }

    fn configure(&self, config: &Value) -> anyhow::Result<Box<dyn PluginInstance>> {
        let config: HttpLogConfig = serde_json::from_value(config.clone())?;
        // hard cap on sink latency
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Box::new(HttpLogInstance { config, client }))
    }
}

impl HttpLogInstance {
    fn build_entry(&self, ctx: &PluginContext) -> Value {
        let mut entry = Map::new();
        entry.insert(
            "timestamp".to_string(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );

        if self.config.include_request {
            let request = &ctx.request;
            let uri = if request.query.is_empty() {
                request.path.clone()
            } else {
                format!("{}?{}", request.path, request.query)
            };
            entry.insert(
                "request".to_string(),
                json!({
                    "method": request.method,
                    "uri": uri,
                    "path": request.path,
                    "querystring": request.query,
                    "headers": request.headers,
                    "size": request.body.len(),
                }),
            );
            entry.insert("client_ip".to_string(), Value::String(request.client_ip.clone()));
        }

        if self.config.include_response {
            if let Some(response) = &ctx.response {
                entry.insert(
                    "response".to_string(),
                    json!({
                        "status": response.status,
                        "headers": response.headers,
                        "size": response.body.len(),
                    }),
                );
            }
        }

        if self.config.include_latencies {
            entry.insert(
                "latencies".to_string(),
                json!({
                    "request": ctx.latencies.get("request").copied().unwrap_or(0.0),
                    "proxy": ctx.latencies.get("proxy").copied().unwrap_or(0.0),
                    "gateway": ctx.elapsed_ms(),
                }),
            );
        }

        if self.config.include_consumer {
            if let Some(consumer) = &ctx.consumer {
                entry.insert(
                    "consumer".to_string(),
                    json!({
                        "username": consumer.get("username"),
                        "custom_id": consumer.get("custom_id"),
                    }),
                );
            }
        }

        if ctx.authenticated {
            entry.insert("authenticated".to_string(), Value::Bool(true));
        }

        if let Some(service) = &ctx.service_name {
            entry.insert("service".to_string(), json!({ "name": service }));
        }
        if let Some(route) = &ctx.route_name {
            entry.insert("route".to_string(), json!({ "name": route }));
        }
        if let Some(upstream) = &ctx.upstream_name {
            entry.insert("upstream".to_string(), json!({ "name": upstream }));
        }

        for (key, value) in &self.config.custom_fields {
            entry.insert(key.clone(), value.clone());
        }

        Value::Object(entry)
    }
}

#[async_trait]
impl PluginInstance for HttpLogInstance {
    fn name(&self) -> &'static str {
        "http-log"
    }

    fn priority(&self) -> i32 {
        100
    }

    fn phases(&self) -> &'static [Phase] {
        &[Phase::Log]
    }

    async fn log(&self, ctx: &PluginContext) -> Result<(), PluginError> {
        let entry = self.build_entry(ctx);
        tracing::info!(target: "torii::access", entry = %entry, "access");

        if let Some(endpoint) = &self.config.http_endpoint {
            let result = self
                .client
                .post(endpoint)
                .header("Content-Type", &self.config.content_type)
                .json(&entry)
                .send()
                .await;
            if let Err(e) = result {
                debug!(endpoint = %endpoint, error = %e, "Log sink delivery failed");
            }
        }

        Ok(())
    }
}

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use torii_core::http::GatewayResponse;
use torii_plugin::plugin::{Phase, Plugin, PluginContext, PluginError, PluginInstance};

/// Rejects requests whose declared payload exceeds the configured
/// limit (413), optionally requiring `Content-Length` on body-carrying
/// methods (411).
pub struct RequestSizeLimitingPlugin;

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RequestSizeLimitingConfig {
    allowed_payload_size: u64,
    /// bytes, kilobytes, megabytes, or gigabytes.
    size_unit: String,
    require_content_length: bool,
}

impl Default for RequestSizeLimitingConfig {
    fn default() -> Self {
        Self {
            allowed_payload_size: 128,
            size_unit: "megabytes".to_string(),
            require_content_length: false,
        }
    }
}

struct RequestSizeLimitingInstance {
    config: RequestSizeLimitingConfig,
    max_bytes: u64,
}

impl Plugin for RequestSizeLimitingPlugin {
    fn name(&self) -> &'static str {
        "request-size-limiting"
    }

    fn priority(&self) -> i32 {
        990
    }

    fn phases(&self) -> &'static [Phase] {
        &[Phase::Access]
    }

    fn configure(&self, config: &Value) -> anyhow::Result<Box<dyn PluginInstance>> {
        let config: RequestSizeLimitingConfig = serde_json::from_value(config.clone())?;
        let multiplier: u64 = match config.size_unit.as_str() {
            "bytes" => 1,
            "kilobytes" => 1024,
            "megabytes" => 1024 * 1024,
            "gigabytes" => 1024 * 1024 * 1024,
            _ => 1024 * 1024,
        };
        let max_bytes = config.allowed_payload_size.saturating_mul(multiplier);
        Ok(Box::new(RequestSizeLimitingInstance { config, max_bytes }))
    }
}

#[async_trait]
impl PluginInstance for RequestSizeLimitingInstance {
    fn name(&self) -> &'static str {
        "request-size-limiting"
    }

    fn priority(&self) -> i32 {
        990
    }

    fn phases(&self) -> &'static [Phase] {
        &[Phase::Access]
    }

    async fn access(&self, ctx: &mut PluginContext) -> Result<Option<GatewayResponse>, PluginError> {
        let content_length = ctx.request.header("content-length");

        if self.config.require_content_length
            && content_length.is_none()
            && matches!(ctx.request.method.as_str(), "POST" | "PUT" | "PATCH")
        {
            return Ok(Some(GatewayResponse::error(
                411,
                "Missing Content-Length header",
            )));
        }

        if let Some(declared) = content_length.and_then(|v| v.parse::<u64>().ok()) {
            if declared > self.max_bytes {
                let mut resp = GatewayResponse::error(
                    413,
                    &format!(
                        "Request body too large. Maximum allowed size is {} {}",
                        self.config.allowed_payload_size, self.config.size_unit
                    ),
                );
                resp.set_header("Retry-After", "0");
                return Ok(Some(resp));
            }
        }

        Ok(None)
    }
}

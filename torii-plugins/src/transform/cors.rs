use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use torii_core::http::GatewayResponse;
use torii_plugin::plugin::{Phase, Plugin, PluginContext, PluginError, PluginInstance};

/// CORS plugin: answers preflight requests in ACCESS and decorates
/// responses in HEADER_FILTER.
pub struct CorsPlugin;

#[derive(Debug, Deserialize)]
#[serde(default)]
struct CorsConfig {
    origins: Vec<String>,
    methods: Vec<String>,
    headers: Vec<String>,
    exposed_headers: Vec<String>,
    credentials: bool,
    max_age: u64,
    /// Pass the preflight through to the upstream instead of
    /// answering it here.
    preflight_continue: bool,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            origins: vec!["*".to_string()],
            methods: ["GET", "POST", "PUT", "DELETE", "PATCH", "OPTIONS", "HEAD"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            headers: vec!["*".to_string()],
            exposed_headers: vec![],
            credentials: false,
            max_age: 86400,
            preflight_continue: false,
        }
    }
}

struct CorsInstance {
    config: CorsConfig,
}

impl Plugin for CorsPlugin {
    fn name(&self) -> &'static str {
        "cors"
    }

    fn priority(&self) -> i32 {
        2000
    }

    fn phases(&self) -> &'static [Phase] {
        &[Phase::Access, Phase::HeaderFilter]
    }

    fn configure(&self, config: &Value) -> anyhow::Result<Box<dyn PluginInstance>> {
        let config: CorsConfig = serde_json::from_value(config.clone())?;
        Ok(Box::new(CorsInstance { config }))
    }
}

impl CorsInstance {
    fn origin_allowed(&self, origin: &str) -> bool {
        self.config.origins.iter().any(|o| o == "*") || self.config.origins.iter().any(|o| o == origin)
    }

    fn cors_headers(&self, origin: &str, preflight: bool) -> Vec<(String, String)> {
        let mut headers = Vec::new();

        let allow_origin = if self.config.origins.iter().any(|o| o == "*") && !self.config.credentials
        {
            "*".to_string()
        } else {
            origin.to_string()
        };
        headers.push(("Access-Control-Allow-Origin".to_string(), allow_origin));

        if self.config.credentials {
            headers.push((
                "Access-Control-Allow-Credentials".to_string(),
                "true".to_string(),
            ));
        }

        if preflight {
            headers.push((
                "Access-Control-Allow-Methods".to_string(),
                self.config.methods.join(", "),
            ));
            let allow_headers = if self.config.headers.iter().any(|h| h == "*") {
                "*".to_string()
            } else {
                self.config.headers.join(", ")
            };
            headers.push(("Access-Control-Allow-Headers".to_string(), allow_headers));
            headers.push((
                "Access-Control-Max-Age".to_string(),
                self.config.max_age.to_string(),
            ));
        }

        if !self.config.exposed_headers.is_empty() {
            headers.push((
                "Access-Control-Expose-Headers".to_string(),
                self.config.exposed_headers.join(", "),
            ));
        }

        headers
    }
}

#[async_trait]
impl PluginInstance for CorsInstance {
    fn name(&self) -> &'static str {
        "cors"
    }

    fn priority(&self) -> i32 {
        2000
    }

    fn phases(&self) -> &'static [Phase] {
        &[Phase::Access, Phase::HeaderFilter]
    }

    async fn access(&self, ctx: &mut PluginContext) -> Result<Option<GatewayResponse>, PluginError> {
        if ctx.request.method != "OPTIONS" {
            return Ok(None);
        }

        let Some(origin) = ctx.request.header("origin").map(|o| o.to_string()) else {
            return Ok(None);
        };

        if !self.origin_allowed(&origin) {
            return Ok(Some(GatewayResponse::error(403, "Origin not allowed")));
        }

        if self.config.preflight_continue {
            return Ok(None);
        }

        let mut resp = GatewayResponse::new(204);
        for (name, value) in self.cors_headers(&origin, true) {
            resp.set_header(&name, value);
        }
        Ok(Some(resp))
    }

    async fn header_filter(&self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        let Some(origin) = ctx.request.header("origin").map(|o| o.to_string()) else {
            return Ok(());
        };
        if !self.origin_allowed(&origin) {
            return Ok(());
        }

        let headers = self.cors_headers(&origin, false);
        if let Some(response) = ctx.response.as_mut() {
            for (name, value) in headers {
                response.set_header(&name, value);
            }
        }
        Ok(())
    }
}

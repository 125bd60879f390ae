use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use torii_core::http::GatewayResponse;
use torii_plugin::plugin::{Phase, Plugin, PluginContext, PluginError, PluginInstance};

/// Key-auth plugin — authenticates requests via an API key carried in
/// a header or query parameter and resolves it to a consumer.
pub struct KeyAuthPlugin;

#[derive(Debug, Deserialize)]
#[serde(default)]
struct KeyAuthConfig {
    /// Header / query parameter names checked for the key, in order.
    key_names: Vec<String>,
    key_in_header: bool,
    key_in_query: bool,
    /// Strip the key from the request before proxying.
    hide_credentials: bool,
    /// Username assigned to requests without a key instead of a 401.
    anonymous: Option<String>,
    /// key → consumer: either a username string or a consumer object.
    keys: HashMap<String, Value>,
    run_on_preflight: bool,
}

impl Default for KeyAuthConfig {
    fn default() -> Self {
        Self {
            key_names: vec!["X-API-Key".to_string(), "apikey".to_string()],
            key_in_header: true,
            key_in_query: true,
            hide_credentials: true,
            anonymous: None,
            keys: HashMap::new(),
            run_on_preflight: true,
        }
    }
}

struct KeyAuthInstance {
    config: KeyAuthConfig,
}

impl Plugin for KeyAuthPlugin {
    fn name(&self) -> &'static str {
        "key-auth"
    }

    fn priority(&self) -> i32 {
        1001
    }

    fn phases(&self) -> &'static [Phase] {
        &[Phase::Access]
    }

    fn configure(&self, config: &Value) -> anyhow::Result<Box<dyn PluginInstance>> {
        let config: KeyAuthConfig = serde_json::from_value(config.clone())?;
        Ok(Box::new(KeyAuthInstance { config }))
    }
}

impl KeyAuthInstance {
    fn extract_key(&self, ctx: &PluginContext) -> Option<String> {
        if self.config.key_in_header {
            for name in &self.config.key_names {
                if let Some(value) = ctx.request.header(name) {
                    if !value.is_empty() {
                        return Some(value.to_string());
                    }
                }
            }
        }

        if self.config.key_in_query {
            for name in &self.config.key_names {
                if let Some(value) = ctx.request.query_param(&name.to_lowercase()) {
                    if !value.is_empty() {
                        return Some(value.to_string());
                    }
                }
            }
        }

        None
    }
}

#[async_trait]
impl PluginInstance for KeyAuthInstance {
    fn name(&self) -> &'static str {
        "key-auth"
    }

    fn priority(&self) -> i32 {
        1001
    }

    fn phases(&self) -> &'static [Phase] {
        &[Phase::Access]
    }

    async fn access(&self, ctx: &mut PluginContext) -> Result<Option<GatewayResponse>, PluginError> {
        if ctx.request.method == "OPTIONS" && !self.config.run_on_preflight {
            return Ok(None);
        }

        let Some(api_key) = self.extract_key(ctx) else {
            if let Some(anonymous) = &self.config.anonymous {
                ctx.consumer = Some(json!({ "username": anonymous }));
                ctx.authenticated = false;
                return Ok(None);
            }
            return Ok(Some(GatewayResponse::error(401, "Missing API key")));
        };

        let Some(consumer) = self.config.keys.get(&api_key) else {
            return Ok(Some(GatewayResponse::error(401, "Invalid API key")));
        };

        ctx.consumer = Some(match consumer {
            Value::String(username) => json!({ "username": username }),
            other => other.clone(),
        });
        ctx.authenticated = true;
        ctx.set("api_key", Value::String(api_key));

        if self.config.hide_credentials {
            for name in &self.config.key_names {
                ctx.request.remove_header(name);
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use torii_core::http::GatewayRequest;

    fn instance(config: Value) -> Box<dyn PluginInstance> {
        KeyAuthPlugin.configure(&config).unwrap()
    }

    fn ctx_with_header(name: &str, value: &str) -> PluginContext {
        let mut req = GatewayRequest::new("GET", "/api");
        req.set_header(name, value);
        PluginContext::new(req)
    }

    #[tokio::test]
    async fn missing_key_returns_401() {
        let inst = instance(json!({ "keys": { "k1": "alice" } }));
        let mut ctx = PluginContext::new(GatewayRequest::new("GET", "/api"));
        let resp = inst.access(&mut ctx).await.unwrap().unwrap();
        assert_eq!(resp.status, 401);
        assert!(!ctx.authenticated);
    }

    #[tokio::test]
    async fn invalid_key_returns_401() {
        let inst = instance(json!({ "keys": { "k1": "alice" } }));
        let mut ctx = ctx_with_header("X-API-Key", "wrong");
        let resp = inst.access(&mut ctx).await.unwrap().unwrap();
        assert_eq!(resp.status, 401);
        let body: Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(body["error"], "Invalid API key");
    }

    #[tokio::test]
    async fn valid_key_sets_consumer_and_hides_credentials() {
        let inst = instance(json!({ "keys": { "k1": "alice" } }));
        let mut ctx = ctx_with_header("X-API-Key", "k1");
        let resp = inst.access(&mut ctx).await.unwrap();
        assert!(resp.is_none());
        assert!(ctx.authenticated);
        assert_eq!(ctx.consumer_field("username"), Some("alice"));
        assert_eq!(ctx.get_str("api_key"), Some("k1"));
        assert_eq!(ctx.request.header("x-api-key"), None);
    }

    #[tokio::test]
    async fn consumer_object_is_passed_through() {
        let inst = instance(json!({
            "keys": { "k1": { "username": "alice", "custom_id": "u-1" } }
        }));
        let mut ctx = ctx_with_header("apikey", "k1");
        inst.access(&mut ctx).await.unwrap();
        assert_eq!(ctx.consumer_field("custom_id"), Some("u-1"));
    }

    #[tokio::test]
    async fn key_in_query_is_accepted() {
        let inst = instance(json!({ "keys": { "k1": "alice" } }));
        let mut req = GatewayRequest::new("GET", "/api");
        req.query = "apikey=k1".to_string();
        let mut ctx = PluginContext::new(req);
        assert!(inst.access(&mut ctx).await.unwrap().is_none());
        assert!(ctx.authenticated);
    }

    #[tokio::test]
    async fn anonymous_passes_without_key() {
        let inst = instance(json!({ "keys": {}, "anonymous": "guest" }));
        let mut ctx = PluginContext::new(GatewayRequest::new("GET", "/api"));
        assert!(inst.access(&mut ctx).await.unwrap().is_none());
        assert!(!ctx.authenticated);
        assert_eq!(ctx.consumer_field("username"), Some("guest"));
    }

    #[tokio::test]
    async fn preflight_skipped_when_configured() {
        let inst = instance(json!({ "keys": {}, "run_on_preflight": false }));
        let mut ctx = PluginContext::new(GatewayRequest::new("OPTIONS", "/api"));
        assert!(inst.access(&mut ctx).await.unwrap().is_none());
    }
}

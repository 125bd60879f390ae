use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;
use torii_core::http::GatewayResponse;
use torii_plugin::plugin::{Phase, Plugin, PluginContext, PluginError, PluginInstance};

/// JWT auth plugin — validates a bearer token and exposes its claims
/// as the consumer.
pub struct JwtAuthPlugin;

#[derive(Debug, Deserialize)]
#[serde(default)]
struct JwtAuthConfig {
    secret: String,
    algorithm: String,
    /// Headers checked for the token, in order.
    header_names: Vec<String>,
    claims_to_verify: Vec<String>,
    anonymous: Option<String>,
    run_on_preflight: bool,
}

impl Default for JwtAuthConfig {
    fn default() -> Self {
        Self {
            secret: "your-secret-key".to_string(),
            algorithm: "HS256".to_string(),
            header_names: vec!["Authorization".to_string()],
            claims_to_verify: vec!["exp".to_string()],
            anonymous: None,
            run_on_preflight: true,
        }
    }
}

struct JwtAuthInstance {
    key: DecodingKey,
    validation: Validation,
    header_names: Vec<String>,
    anonymous: Option<String>,
    run_on_preflight: bool,
}

impl Plugin for JwtAuthPlugin {
    fn name(&self) -> &'static str {
        "jwt-auth"
    }

    fn priority(&self) -> i32 {
        1000
    }

    fn phases(&self) -> &'static [Phase] {
        &[Phase::Access]
    }

    fn configure(&self, config: &Value) -> anyhow::Result<Box<dyn PluginInstance>> {
        let config: JwtAuthConfig = serde_json::from_value(config.clone())?;

        let algorithm = Algorithm::from_str(&config.algorithm)
            .map_err(|e| anyhow::anyhow!("unsupported JWT algorithm {:?}: {e}", config.algorithm))?;

        let mut validation = Validation::new(algorithm);
        validation.validate_aud = false;
        if !config.claims_to_verify.iter().any(|c| c == "exp") {
            validation.validate_exp = false;
            validation.required_spec_claims.clear();
        }

        Ok(Box::new(JwtAuthInstance {
            key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
            header_names: config.header_names,
            anonymous: config.anonymous,
            run_on_preflight: config.run_on_preflight,
        }))
    }
}

impl JwtAuthInstance {
    fn extract_token(&self, ctx: &PluginContext) -> Option<String> {
        for name in &self.header_names {
            if let Some(value) = ctx.request.header(name) {
                let token = value.strip_prefix("Bearer ").unwrap_or(value);
                if !token.is_empty() {
                    return Some(token.to_string());
                }
            }
        }

        ctx.request.query_param("jwt").map(|t| t.to_string())
    }
}

#[async_trait]
impl PluginInstance for JwtAuthInstance {
    fn name(&self) -> &'static str {
        "jwt-auth"
    }

    fn priority(&self) -> i32 {
        1000
    }

    fn phases(&self) -> &'static [Phase] {
        &[Phase::Access]
    }

    async fn access(&self, ctx: &mut PluginContext) -> Result<Option<GatewayResponse>, PluginError> {
        if ctx.request.method == "OPTIONS" && !self.run_on_preflight {
            return Ok(None);
        }

        let Some(token) = self.extract_token(ctx) else {
            if let Some(anonymous) = &self.anonymous {
                ctx.consumer = Some(json!({ "username": anonymous }));
                ctx.authenticated = false;
                return Ok(None);
            }
            let mut resp = GatewayResponse::error(401, "Missing authentication token");
            resp.set_header("WWW-Authenticate", "Bearer");
            return Ok(Some(resp));
        };

        match jsonwebtoken::decode::<Value>(&token, &self.key, &self.validation) {
            Ok(data) => {
                let claims = data.claims;
                ctx.set("jwt_claims", claims.clone());
                if let Some(sub) = claims.get("sub") {
                    ctx.set("user_id", sub.clone());
                }
                ctx.consumer = Some(claims);
                ctx.authenticated = true;
                Ok(None)
            }
            Err(e) => {
                let mut resp = GatewayResponse::error(401, &format!("Invalid token: {e}"));
                resp.set_header("WWW-Authenticate", "Bearer error=\"invalid_token\"");
                Ok(Some(resp))
            }
        }
    }
}

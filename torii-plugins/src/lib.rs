pub mod auth;
pub mod observability;
pub mod traffic;
pub mod transform;

use std::sync::Arc;
use torii_plugin::PluginRegistry;

/// Register all built-in plugins.
pub fn register_all(registry: &mut PluginRegistry) {
    registry.register(Arc::new(auth::key_auth::KeyAuthPlugin));
    registry.register(Arc::new(auth::jwt_auth::JwtAuthPlugin));
    registry.register(Arc::new(traffic::rate_limiting::RateLimitingPlugin));
    registry.register(Arc::new(traffic::ip_restriction::IpRestrictionPlugin));
    registry.register(Arc::new(traffic::request_size_limiting::RequestSizeLimitingPlugin));
    registry.register(Arc::new(transform::cors::CorsPlugin));
    registry.register(Arc::new(transform::request_transformer::RequestTransformerPlugin));
    registry.register(Arc::new(transform::response_transformer::ResponseTransformerPlugin));
    registry.register(Arc::new(observability::http_log::HttpLogPlugin));
}

use crate::http::GatewayResponse;
use thiserror::Error;

/// Unified error type for the Torii gateway.
///
/// Every variant that can reach a client maps to an HTTP status and a
/// JSON body with a single `error` field. Upstream failures are
/// converted inside the proxy retry loop and never cross the gateway
/// boundary as errors.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("No route matched")]
    RouteNotMatched,

    #[error("Upstream not found: {0}")]
    UpstreamNotFound(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("Missing Content-Length header")]
    MissingContentLength,

    #[error("Service temporarily unavailable (circuit open)")]
    CircuitOpen,

    #[error("No healthy targets available")]
    NoHealthyTarget,

    #[error("Gateway timeout")]
    UpstreamTimeout,

    #[error("Service unavailable")]
    UpstreamConnect,

    #[error("Bad gateway: {0}")]
    UpstreamOther(String),

    #[error("Plugin error: {0}")]
    PluginInternal(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl GatewayError {
    /// Map to HTTP status code.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::RouteNotMatched => 404,
            GatewayError::Unauthorized(_) => 401,
            GatewayError::Forbidden(_) => 403,
            GatewayError::RateLimited => 429,
            GatewayError::PayloadTooLarge(_) => 413,
            GatewayError::MissingContentLength => 411,
            GatewayError::CircuitOpen => 503,
            GatewayError::NoHealthyTarget => 503,
            GatewayError::UpstreamTimeout => 504,
            GatewayError::UpstreamConnect => 503,
            GatewayError::UpstreamNotFound(_) => 502,
            GatewayError::UpstreamOther(_) => 502,
            GatewayError::PluginInternal(_) => 500,
            _ => 500,
        }
    }

    /// JSON error body: `{"error": "..."}`.
    pub fn to_json_body(&self) -> Vec<u8> {
        serde_json::json!({ "error": self.to_string() })
            .to_string()
            .into_bytes()
    }

    /// Build the client-facing response for this error.
    pub fn to_response(&self) -> GatewayResponse {
        GatewayResponse::error(self.status_code(), &self.to_string())
    }
}

pub mod config;
pub mod error;
pub mod http;
pub mod router;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use http::{GatewayRequest, GatewayResponse};
pub use router::{MatchedRoute, Router};

use crate::server::AdminState;
use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};
use std::sync::Arc;

pub async fn status(State(state): State<Arc<AdminState>>) -> Json<Value> {
    Json(json!({
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
        "upstreams": state.gateway.upstream_manager().len(),
        "services": state.gateway.router().list_services().len(),
        "routes": state.gateway.router().route_count(),
        "plugins": state.registry.list(),
    }))
}

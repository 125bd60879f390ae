use crate::server::AdminState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde_json::{json, Value};
use std::sync::Arc;
use torii_core::config::{TargetConfig, UpstreamConfig};
use torii_proxy::Target;

pub async fn list_upstreams(State(state): State<Arc<AdminState>>) -> Json<Value> {
    let upstreams: Vec<Value> = state
        .gateway
        .upstream_manager()
        .list_upstreams()
        .iter()
        .map(|u| json!(u.snapshot()))
        .collect();
    Json(json!({ "data": upstreams, "total": upstreams.len() }))
}

pub async fn get_upstream(
    State(state): State<Arc<AdminState>>,
    Path(name): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.gateway.upstream_manager().get_upstream(&name) {
        Some(upstream) => (StatusCode::OK, Json(json!({ "data": upstream.snapshot() }))),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Upstream not found" })),
        ),
    }
}

pub async fn create_upstream(
    State(state): State<Arc<AdminState>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let config: UpstreamConfig = match serde_json::from_value(body) {
        Ok(config) => config,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": e.to_string() })),
            );
        }
    };

    let manager = state.gateway.upstream_manager();
    if manager.get_upstream(&config.name).is_some() {
        return (
            StatusCode::CONFLICT,
            Json(json!({ "error": "Upstream already exists" })),
        );
    }

    let upstream = manager.add_upstream(config);
    upstream.start();
    (StatusCode::CREATED, Json(json!({ "data": upstream.snapshot() })))
}

pub async fn delete_upstream(
    State(state): State<Arc<AdminState>>,
    Path(name): Path<String>,
) -> (StatusCode, Json<Value>) {
    if state.gateway.upstream_manager().remove_upstream(&name).await {
        (StatusCode::OK, Json(json!({ "deleted": true })))
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Upstream not found" })),
        )
    }
}

pub async fn list_targets(
    State(state): State<Arc<AdminState>>,
    Path(name): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.gateway.upstream_manager().get_upstream(&name) {
        Some(upstream) => {
            let targets: Vec<Value> = upstream.targets().iter().map(|t| json!(t.snapshot())).collect();
            (StatusCode::OK, Json(json!({ "data": targets })))
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Upstream not found" })),
        ),
    }
}

pub async fn add_target(
    State(state): State<Arc<AdminState>>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let config: TargetConfig = match serde_json::from_value(body) {
        Ok(config) => config,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": e.to_string() })),
            );
        }
    };

    match state.gateway.upstream_manager().get_upstream(&name) {
        Some(upstream) => {
            let target = Arc::new(Target::from_config(&config));
            let snapshot = target.snapshot();
            upstream.add_target(target);
            (StatusCode::CREATED, Json(json!({ "data": snapshot })))
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Upstream not found" })),
        ),
    }
}

pub async fn upstream_health(
    State(state): State<Arc<AdminState>>,
    Path(name): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.gateway.upstream_manager().get_upstream(&name) {
        Some(upstream) => {
            let targets: Vec<Value> = upstream
                .targets()
                .iter()
                .map(|t| {
                    json!({
                        "address": t.address(),
                        "state": t.state(),
                        "weight": t.weight,
                    })
                })
                .collect();
            (
                StatusCode::OK,
                Json(json!({
                    "data": {
                        "name": name,
                        "targets": targets,
                        "circuit_breaker": upstream.circuit_breaker().snapshot(),
                    }
                })),
            )
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Upstream not found" })),
        ),
    }
}

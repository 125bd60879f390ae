use crate::server::AdminState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde_json::{json, Value};
use std::sync::Arc;

pub async fn list_services(State(state): State<Arc<AdminState>>) -> Json<Value> {
    let services: Vec<Value> = state
        .gateway
        .router()
        .list_services()
        .iter()
        .map(|s| json!(**s))
        .collect();
    Json(json!({ "data": services, "total": services.len() }))
}

pub async fn get_service(
    State(state): State<Arc<AdminState>>,
    Path(name): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.gateway.router().get_service(&name) {
        Some(service) => (StatusCode::OK, Json(json!({ "data": *service }))),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Service not found" })),
        ),
    }
}

pub async fn list_routes(State(state): State<Arc<AdminState>>) -> Json<Value> {
    let routes: Vec<Value> = state
        .gateway
        .router()
        .list_routes()
        .iter()
        .map(|r| json!(**r))
        .collect();
    Json(json!({ "data": routes, "total": routes.len() }))
}

pub async fn get_route(
    State(state): State<Arc<AdminState>>,
    Path(name): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.gateway.router().get_route(&name) {
        Some((service, route)) => (
            StatusCode::OK,
            Json(json!({ "data": *route, "service": service.name })),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Route not found" })),
        ),
    }
}

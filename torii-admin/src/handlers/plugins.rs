use crate::server::AdminState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde_json::{json, Value};
use std::sync::Arc;

pub async fn list_plugins(State(state): State<Arc<AdminState>>) -> Json<Value> {
    Json(json!({ "data": state.registry.list() }))
}

pub async fn plugin_schema(
    State(state): State<Arc<AdminState>>,
    Path(name): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.registry.schema(&name) {
        Some(schema) => (StatusCode::OK, Json(json!({ "data": schema }))),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Plugin not found" })),
        ),
    }
}

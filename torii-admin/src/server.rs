use crate::handlers;
use axum::routing::{delete, get, post};
use axum::Router as AxumRouter;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;
use torii_plugin::PluginRegistry;
use torii_proxy::Gateway;

/// Shared state for the Admin API: the live gateway registries plus
/// the plugin registry for introspection.
pub struct AdminState {
    pub gateway: Arc<Gateway>,
    pub registry: Arc<PluginRegistry>,
}

/// Build the admin router.
pub fn build_router(state: Arc<AdminState>) -> AxumRouter {
    let api = AxumRouter::new()
        .route("/status", get(handlers::status::status))
        // Upstreams
        .route("/upstreams", get(handlers::upstreams::list_upstreams))
        .route("/upstreams", post(handlers::upstreams::create_upstream))
        .route("/upstreams/{name}", get(handlers::upstreams::get_upstream))
        .route("/upstreams/{name}", delete(handlers::upstreams::delete_upstream))
        .route("/upstreams/{name}/targets", get(handlers::upstreams::list_targets))
        .route("/upstreams/{name}/targets", post(handlers::upstreams::add_target))
        .route("/upstreams/{name}/health", get(handlers::upstreams::upstream_health))
        // Services & routes (read-only views over the router)
        .route("/services", get(handlers::services::list_services))
        .route("/services/{name}", get(handlers::services::get_service))
        .route("/routes", get(handlers::services::list_routes))
        .route("/routes/{name}", get(handlers::services::get_route))
        // Plugin registry introspection
        .route("/plugins", get(handlers::plugins::list_plugins))
        .route("/plugins/{name}/schema", get(handlers::plugins::plugin_schema));

    AxumRouter::new()
        .nest("/admin", api)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the admin API until the process shuts down.
pub async fn start_admin(addr: SocketAddr, state: Arc<AdminState>) -> anyhow::Result<()> {
    let app = build_router(state);
    info!(addr = %addr, "Starting Admin API server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

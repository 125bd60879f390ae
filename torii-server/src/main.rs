// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Torii — declarative API gateway
//
//  Data plane:  router → plugin chain → upstream engine (tokio)
//  Admin API:   axum on a separate listener
//  Config:      YAML file + TORII_* environment overrides
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderName, HeaderValue, Request, StatusCode};
use axum::response::Response;
use clap::Parser;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use torii_core::config::GatewayConfig;
use torii_core::http::{GatewayRequest, GatewayResponse};
use torii_plugin::PluginRegistry;
use torii_proxy::Gateway;

/// Largest request body the listener will buffer.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Parser, Debug)]
#[command(name = "torii", version, about = "Torii — declarative API gateway")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ── Tracing ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Torii starting");

    // ── Config ──
    let config_path = cli.config.as_ref().and_then(|p| p.to_str());
    let config = GatewayConfig::load(config_path)?;

    // ── Plugin registry ──
    let mut registry = PluginRegistry::new();
    torii_plugins::register_all(&mut registry);
    let registry = Arc::new(registry);
    info!(plugins = registry.len(), "Plugins registered");

    // ── Gateway ──
    let gateway = Arc::new(Gateway::from_config(config.clone(), &registry)?);
    gateway.start().await;

    // ── Admin API ──
    if config.gateway.admin_enabled {
        let admin_addr: SocketAddr =
            format!("{}:{}", config.gateway.host, config.gateway.admin_port).parse()?;
        let admin_state = Arc::new(torii_admin::AdminState {
            gateway: Arc::clone(&gateway),
            registry: Arc::clone(&registry),
        });
        tokio::spawn(async move {
            if let Err(e) = torii_admin::start_admin(admin_addr, admin_state).await {
                error!(error = %e, "Admin API failed");
            }
        });
    }

    // ── Proxy listener ──
    let proxy_addr: SocketAddr = format!("{}:{}", config.gateway.host, config.gateway.port).parse()?;
    let app = axum::Router::new()
        .fallback(proxy_handler)
        .with_state(Arc::clone(&gateway));

    let listener = tokio::net::TcpListener::bind(proxy_addr).await?;
    info!(proxy_addr = %proxy_addr, "Torii is ready — serving traffic");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Shutdown signal received, draining");
    gateway.stop().await;
    info!("Torii stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install shutdown handler");
    }
}

/// Catch-all handler: every request on the proxy listener goes through
/// the gateway pipeline.
async fn proxy_handler(
    State(gateway): State<Arc<Gateway>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    match into_gateway_request(request, peer).await {
        Ok(gateway_request) => {
            let response = gateway.handle_request(gateway_request).await;
            into_axum_response(response)
        }
        Err(status) => Response::builder()
            .status(status)
            .header("content-type", "application/json")
            .body(Body::from(r#"{"error":"Bad request"}"#))
            .unwrap_or_default(),
    }
}

async fn into_gateway_request(
    request: Request<Body>,
    peer: SocketAddr,
) -> Result<GatewayRequest, StatusCode> {
    let (parts, body) = request.into_parts();

    let mut headers = HashMap::with_capacity(parts.headers.len());
    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            headers.insert(name.as_str().to_string(), value.to_string());
        }
    }

    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| StatusCode::PAYLOAD_TOO_LARGE)?;

    Ok(GatewayRequest {
        method: parts.method.as_str().to_string(),
        path: parts.uri.path().to_string(),
        query: parts.uri.query().unwrap_or("").to_string(),
        headers,
        body,
        client_ip: peer.ip().to_string(),
        scheme: "http".to_string(),
    })
}

fn into_axum_response(response: GatewayResponse) -> Response {
    let mut builder = Response::builder().status(
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
    );

    if let Some(headers) = builder.headers_mut() {
        for (name, value) in &response.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, value);
            }
        }
        // the listener re-frames the body it actually sends
        headers.remove("content-length");
    }

    builder
        .body(Body::from(response.body))
        .unwrap_or_default()
}

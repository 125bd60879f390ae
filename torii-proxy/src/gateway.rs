use crate::manager::UpstreamManager;
use bytes::Bytes;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::info;
use torii_core::config::GatewayConfig;
use torii_core::http::{GatewayRequest, GatewayResponse};
use torii_core::{GatewayError, Router};
use torii_plugin::{PluginChain, PluginContext, PluginRegistry};

/// Orchestrator wiring router → plugin chain → upstream engine.
pub struct Gateway {
    config: GatewayConfig,
    router: Router,
    upstream_manager: UpstreamManager,
    plugin_chain: PluginChain,
}

impl Gateway {
    /// Assemble the gateway from a parsed configuration tree. A bad
    /// plugin or route definition is fatal here; nothing is re-checked
    /// at request time.
    pub fn from_config(config: GatewayConfig, registry: &PluginRegistry) -> anyhow::Result<Self> {
        let router = Router::new();
        let upstream_manager = UpstreamManager::new();
        let mut plugin_chain = PluginChain::new();

        for upstream in &config.upstreams {
            upstream_manager.add_upstream(upstream.clone());
        }

        for service in &config.services {
            for route in &service.routes {
                for plugin in &route.plugins {
                    plugin_chain.add_route_plugin(registry, &route.name, plugin)?;
                }
            }
            for plugin in &service.plugins {
                plugin_chain.add_service_plugin(registry, &service.name, plugin)?;
            }
            router.add_service(service.clone())?;
        }

        for plugin in &config.plugins {
            plugin_chain.add_global_plugin(registry, plugin)?;
        }

        info!(
            upstreams = upstream_manager.len(),
            services = config.services.len(),
            plugins = plugin_chain.plugin_count(),
            "Gateway assembled"
        );

        Ok(Self {
            config,
            router,
            upstream_manager,
            plugin_chain,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn upstream_manager(&self) -> &UpstreamManager {
        &self.upstream_manager
    }

    pub fn plugin_chain(&self) -> &PluginChain {
        &self.plugin_chain
    }

    /// Launch health checking and the shared upstream client.
    pub async fn start(&self) {
        self.upstream_manager.start().await;
    }

    /// Stop health checkers and release the upstream client.
    pub async fn stop(&self) {
        self.upstream_manager.stop().await;
    }

    /// The request pipeline: match → ACCESS → REWRITE → proxy →
    /// HEADER_FILTER → BODY_FILTER → LOG. The LOG phase runs exactly
    /// once for every request that produced a response, including
    /// short-circuited and error-converted ones.
    pub async fn handle_request(&self, request: GatewayRequest) -> GatewayResponse {
        let start_time = Instant::now();

        let Some(matched) = self
            .router
            .match_route(&request.path, &request.method, &request.headers)
        else {
            return GatewayError::RouteNotMatched.to_response();
        };

        let service_name = matched.service.name.clone();
        let route_name = matched.route.name.clone();

        let mut ctx = PluginContext::new(request);
        ctx.service_name = Some(service_name.clone());
        ctx.route_name = Some(route_name.clone());
        ctx.upstream_name = Some(matched.service.upstream.clone());
        ctx.path_params = matched.path_params.clone();
        ctx.start_time = start_time;

        let scope = (Some(service_name.as_str()), Some(route_name.as_str()));

        if let Some(response) = self.plugin_chain.run_access(&mut ctx, scope.0, scope.1).await {
            return self.finish(ctx, response, scope).await;
        }

        if let Some(response) = self.plugin_chain.run_rewrite(&mut ctx, scope.0, scope.1).await {
            return self.finish(ctx, response, scope).await;
        }

        let additional_headers = self.collect_additional_headers(&mut ctx, matched.route.preserve_host);

        let target_path = format!("{}{}", matched.service.path, matched.remaining_path);

        let proxy_start = Instant::now();
        let response = self
            .upstream_manager
            .proxy_request(
                &ctx.request,
                &matched.service.upstream,
                &target_path,
                &additional_headers,
            )
            .await;
        ctx.latencies.insert(
            "proxy".to_string(),
            proxy_start.elapsed().as_secs_f64() * 1000.0,
        );

        ctx.response = Some(response);

        if let Some(error_response) = self
            .plugin_chain
            .run_header_filter(&mut ctx, scope.0, scope.1)
            .await
        {
            ctx.response = Some(error_response);
        } else if self.plugin_chain.has_body_filters(scope.0, scope.1) {
            self.apply_body_filters(&mut ctx, scope).await;
        }

        ctx.latencies.insert(
            "request".to_string(),
            start_time.elapsed().as_secs_f64() * 1000.0,
        );

        let response = ctx
            .response
            .take()
            .unwrap_or_else(|| GatewayError::PluginInternal("response lost".to_string()).to_response());
        self.finish(ctx, response, scope).await
    }

    /// Park the response in the context for LOG plugins, run the LOG
    /// phase, and hand the response back.
    async fn finish(
        &self,
        mut ctx: PluginContext,
        response: GatewayResponse,
        scope: (Option<&str>, Option<&str>),
    ) -> GatewayResponse {
        if !ctx.latencies.contains_key("request") {
            ctx.latencies.insert(
                "request".to_string(),
                ctx.start_time.elapsed().as_secs_f64() * 1000.0,
            );
        }
        ctx.response = Some(response);
        self.plugin_chain.run_log(&ctx, scope.0, scope.1).await;
        ctx.response
            .take()
            .unwrap_or_else(|| GatewayError::PluginInternal("response lost".to_string()).to_response())
    }

    /// Headers the proxy overlays on the outbound request: consumer
    /// identity, REWRITE-phase transforms, and the preserved Host.
    /// Query-string and body transforms are applied to the request in
    /// place so the transport picks them up.
    fn collect_additional_headers(
        &self,
        ctx: &mut PluginContext,
        preserve_host: bool,
    ) -> std::collections::HashMap<String, String> {
        let mut additional = std::collections::HashMap::new();

        if let Some(consumer) = &ctx.consumer {
            let username = consumer
                .get("username")
                .and_then(Value::as_str)
                .unwrap_or("");
            let custom_id = consumer
                .get("custom_id")
                .and_then(Value::as_str)
                .unwrap_or("");
            additional.insert("X-Consumer-Username".to_string(), username.to_string());
            additional.insert("X-Consumer-Custom-ID".to_string(), custom_id.to_string());
            if ctx.authenticated {
                additional.insert("X-Authenticated-Consumer".to_string(), "true".to_string());
            }
        }

        if let Some(Value::Object(headers)) = ctx.get("transformed_headers").cloned() {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    additional.insert(name, value.to_string());
                }
            }
        }

        if let Some(Value::Object(params)) = ctx.get("transformed_querystring").cloned() {
            let ordered: BTreeMap<&String, &Value> = params.iter().collect();
            ctx.request.query = ordered
                .into_iter()
                .filter_map(|(k, v)| v.as_str().map(|v| format!("{k}={v}")))
                .collect::<Vec<_>>()
                .join("&");
        }

        if let Some(body) = ctx.get_str("transformed_body").map(|s| s.to_string()) {
            ctx.request.body = Bytes::from(body);
        }

        match ctx.get("user_id") {
            Some(Value::String(user_id)) => {
                additional.insert("X-User-ID".to_string(), user_id.clone());
            }
            Some(Value::Number(user_id)) => {
                additional.insert("X-User-ID".to_string(), user_id.to_string());
            }
            _ => {}
        }

        if preserve_host {
            if let Some(host) = ctx.request.host() {
                additional.insert("host".to_string(), host.to_string());
            }
        }

        additional
    }

    /// Feed the buffered response body through the BODY_FILTER chain
    /// as one chunk and fix up content-length to match the result.
    async fn apply_body_filters(
        &self,
        ctx: &mut PluginContext,
        scope: (Option<&str>, Option<&str>),
    ) {
        let Some(body) = ctx.response.as_mut().map(|r| std::mem::take(&mut r.body)) else {
            return;
        };

        match self
            .plugin_chain
            .run_body_filter(ctx, body, scope.0, scope.1)
            .await
        {
            Ok(filtered) => {
                if let Some(response) = ctx.response.as_mut() {
                    if response.header("content-length").is_some() {
                        response.set_header("content-length", filtered.len().to_string());
                    }
                    response.body = filtered;
                }
            }
            Err(error_response) => {
                ctx.response = Some(error_response);
            }
        }
    }
}

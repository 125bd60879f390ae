use crate::plugin::{Phase, PluginContext, PluginInstance};
use crate::registry::PluginRegistry;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};
use torii_core::config::PluginConfig;
use torii_core::http::GatewayResponse;
use torii_core::GatewayError;

struct BoundPlugin {
    instance: Arc<dyn PluginInstance>,
    enabled: bool,
}

/// Phased executor over plugins scoped at global, service, and route
/// level.
///
/// The effective set for a request is the union of the three scopes,
/// ordered by priority descending; ties keep registration order
/// (global, then service, then route). ACCESS short-circuits on the
/// first plugin returning a response; LOG failures never propagate.
pub struct PluginChain {
    global: Vec<BoundPlugin>,
    service: HashMap<String, Vec<BoundPlugin>>,
    route: HashMap<String, Vec<BoundPlugin>>,
}

impl PluginChain {
    pub fn new() -> Self {
        Self {
            global: Vec::new(),
            service: HashMap::new(),
            route: HashMap::new(),
        }
    }

    pub fn add_global_plugin(
        &mut self,
        registry: &PluginRegistry,
        config: &PluginConfig,
    ) -> anyhow::Result<()> {
        if let Some(bound) = Self::bind(registry, config)? {
            self.global.push(bound);
        }
        Ok(())
    }

    pub fn add_service_plugin(
        &mut self,
        registry: &PluginRegistry,
        service_name: &str,
        config: &PluginConfig,
    ) -> anyhow::Result<()> {
        if let Some(bound) = Self::bind(registry, config)? {
            self.service
                .entry(service_name.to_string())
                .or_default()
                .push(bound);
        }
        Ok(())
    }

    pub fn add_route_plugin(
        &mut self,
        registry: &PluginRegistry,
        route_name: &str,
        config: &PluginConfig,
    ) -> anyhow::Result<()> {
        if let Some(bound) = Self::bind(registry, config)? {
            self.route
                .entry(route_name.to_string())
                .or_default()
                .push(bound);
        }
        Ok(())
    }

    /// A bad plugin config is fatal at load time; an unknown plugin
    /// name is skipped with a warning.
    fn bind(registry: &PluginRegistry, config: &PluginConfig) -> anyhow::Result<Option<BoundPlugin>> {
        match registry.create(&config.name, &config.config) {
            Some(Ok(instance)) => Ok(Some(BoundPlugin {
                instance: Arc::from(instance),
                enabled: config.enabled,
            })),
            Some(Err(e)) => Err(e.context(format!("configuring plugin {:?}", config.name))),
            None => {
                warn!(plugin = %config.name, "Unknown plugin, skipping");
                Ok(None)
            }
        }
    }

    /// Effective set for a request, priority-descending, stable ties.
    fn effective(&self, service: Option<&str>, route: Option<&str>) -> Vec<&BoundPlugin> {
        let mut plugins: Vec<&BoundPlugin> = self.global.iter().collect();

        if let Some(bucket) = service.and_then(|name| self.service.get(name)) {
            plugins.extend(bucket.iter());
        }
        if let Some(bucket) = route.and_then(|name| self.route.get(name)) {
            plugins.extend(bucket.iter());
        }

        plugins.sort_by(|a, b| b.instance.priority().cmp(&a.instance.priority()));
        plugins
    }

    fn in_phase<'a>(
        &'a self,
        phase: Phase,
        service: Option<&str>,
        route: Option<&str>,
    ) -> impl Iterator<Item = &'a Arc<dyn PluginInstance>> {
        self.effective(service, route)
            .into_iter()
            .filter(move |b| b.enabled && b.instance.phases().contains(&phase))
            .map(|b| &b.instance)
    }

    /// ACCESS phase. Returns the short-circuit response, if any; a
    /// plugin failure is converted to an internal-error response.
    pub async fn run_access(
        &self,
        ctx: &mut PluginContext,
        service: Option<&str>,
        route: Option<&str>,
    ) -> Option<GatewayResponse> {
        let plugins: Vec<_> = self.in_phase(Phase::Access, service, route).cloned().collect();
        for instance in plugins {
            debug!(plugin = %instance.name(), phase = %Phase::Access, "Executing plugin");
            match instance.access(ctx).await {
                Ok(None) => {}
                Ok(Some(response)) => {
                    debug!(
                        plugin = %instance.name(),
                        status = response.status,
                        "Plugin short-circuited with response"
                    );
                    return Some(response);
                }
                Err(e) => {
                    error!(plugin = %instance.name(), phase = %Phase::Access, error = %e, "Plugin error");
                    return Some(GatewayError::PluginInternal(e.message).to_response());
                }
            }
        }
        None
    }

    /// REWRITE phase. Returns an error response when a plugin fails.
    pub async fn run_rewrite(
        &self,
        ctx: &mut PluginContext,
        service: Option<&str>,
        route: Option<&str>,
    ) -> Option<GatewayResponse> {
        let plugins: Vec<_> = self.in_phase(Phase::Rewrite, service, route).cloned().collect();
        for instance in plugins {
            if let Err(e) = instance.rewrite(ctx).await {
                error!(plugin = %instance.name(), phase = %Phase::Rewrite, error = %e, "Plugin error");
                return Some(GatewayError::PluginInternal(e.message).to_response());
            }
        }
        None
    }

    /// HEADER_FILTER phase. Returns an error response when a plugin fails.
    pub async fn run_header_filter(
        &self,
        ctx: &mut PluginContext,
        service: Option<&str>,
        route: Option<&str>,
    ) -> Option<GatewayResponse> {
        let plugins: Vec<_> = self
            .in_phase(Phase::HeaderFilter, service, route)
            .cloned()
            .collect();
        for instance in plugins {
            if let Err(e) = instance.header_filter(ctx).await {
                error!(plugin = %instance.name(), phase = %Phase::HeaderFilter, error = %e, "Plugin error");
                return Some(GatewayError::PluginInternal(e.message).to_response());
            }
        }
        None
    }

    /// BODY_FILTER phase: each plugin maps the chunk to a replacement.
    pub async fn run_body_filter(
        &self,
        ctx: &mut PluginContext,
        chunk: Bytes,
        service: Option<&str>,
        route: Option<&str>,
    ) -> Result<Bytes, GatewayResponse> {
        let plugins: Vec<_> = self
            .in_phase(Phase::BodyFilter, service, route)
            .cloned()
            .collect();
        let mut chunk = chunk;
        for instance in plugins {
            chunk = match instance.body_filter(ctx, chunk).await {
                Ok(replacement) => replacement,
                Err(e) => {
                    error!(plugin = %instance.name(), phase = %Phase::BodyFilter, error = %e, "Plugin error");
                    return Err(GatewayError::PluginInternal(e.message).to_response());
                }
            };
        }
        Ok(chunk)
    }

    /// LOG phase. Always runs to completion; failures are recorded and
    /// swallowed so logging cannot break response delivery.
    pub async fn run_log(&self, ctx: &PluginContext, service: Option<&str>, route: Option<&str>) {
        let plugins: Vec<_> = self.in_phase(Phase::Log, service, route).cloned().collect();
        for instance in plugins {
            if let Err(e) = instance.log(ctx).await {
                warn!(plugin = %instance.name(), error = %e, "Log phase plugin error (non-fatal)");
            }
        }
    }

    /// Whether any BODY_FILTER plugin is in scope; when none is, the
    /// response body streams through untouched.
    pub fn has_body_filters(&self, service: Option<&str>, route: Option<&str>) -> bool {
        self.in_phase(Phase::BodyFilter, service, route).next().is_some()
    }

    pub fn plugin_count(&self) -> usize {
        self.global.len()
            + self.service.values().map(|v| v.len()).sum::<usize>()
            + self.route.values().map(|v| v.len()).sum::<usize>()
    }
}

impl Default for PluginChain {
    fn default() -> Self {
        Self::new()
    }
}

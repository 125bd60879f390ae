use crate::config::{RouteConfig, ServiceConfig};
use crate::error::GatewayError;
use arc_swap::ArcSwap;
use dashmap::DashMap;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Result of a route match.
#[derive(Debug, Clone)]
pub struct MatchedRoute {
    pub service: Arc<ServiceConfig>,
    pub route: Arc<RouteConfig>,
    pub path_params: HashMap<String, String>,
    /// Path portion forwarded to the upstream (before the service prefix
    /// is prepended).
    pub remaining_path: String,
}

/// Required-header condition, pre-compiled at service registration.
#[derive(Debug, Clone)]
enum HeaderMatch {
    Exact(String),
    Pattern(Regex),
}

/// One compiled (pattern, route, service) entry.
#[derive(Clone)]
struct CompiledRoute {
    pattern: Regex,
    /// Literal prefix before the first `{`, used by strip_path.
    base_prefix: String,
    headers: Vec<(String, HeaderMatch)>,
    route: Arc<RouteConfig>,
    service: Arc<ServiceConfig>,
}

/// Pattern table resolving (path, method, host, headers) to a service
/// and route.
///
/// Routes are tried in insertion order; the first match wins. The
/// compiled table is swapped atomically on mutation so matching never
/// takes a lock.
pub struct Router {
    services: DashMap<String, Arc<ServiceConfig>>,
    table: ArcSwap<Vec<CompiledRoute>>,
}

impl Router {
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
            table: ArcSwap::new(Arc::new(Vec::new())),
        }
    }

    /// Register a service and compile its routes. Re-registering a name
    /// replaces the previous entry.
    pub fn add_service(&self, service: ServiceConfig) -> Result<(), GatewayError> {
        if self.services.contains_key(&service.name) {
            self.remove_service(&service.name);
        }

        let service = Arc::new(service);
        let mut compiled = Vec::new();
        for route in &service.routes {
            let route = Arc::new(route.clone());
            let headers = compile_header_matches(&route)?;
            for path in &route.paths {
                compiled.push(CompiledRoute {
                    pattern: compile_pattern(path)?,
                    base_prefix: base_prefix(path),
                    headers: headers.clone(),
                    route: Arc::clone(&route),
                    service: Arc::clone(&service),
                });
            }
        }

        info!(service = %service.name, routes = service.routes.len(), "Service registered");
        self.services.insert(service.name.clone(), service);

        let mut table: Vec<CompiledRoute> = self.table.load().as_ref().clone();
        table.extend(compiled);
        self.table.store(Arc::new(table));
        Ok(())
    }

    /// Remove a service and all of its routes.
    pub fn remove_service(&self, name: &str) -> bool {
        if self.services.remove(name).is_none() {
            return false;
        }

        let table: Vec<CompiledRoute> = self
            .table
            .load()
            .iter()
            .filter(|c| c.service.name != name)
            .cloned()
            .collect();
        self.table.store(Arc::new(table));
        info!(service = %name, "Service removed");
        true
    }

    pub fn get_service(&self, name: &str) -> Option<Arc<ServiceConfig>> {
        self.services.get(name).map(|s| Arc::clone(s.value()))
    }

    pub fn list_services(&self) -> Vec<Arc<ServiceConfig>> {
        self.services.iter().map(|s| Arc::clone(s.value())).collect()
    }

    pub fn list_routes(&self) -> Vec<Arc<RouteConfig>> {
        let mut seen = Vec::new();
        let mut routes = Vec::new();
        for entry in self.table.load().iter() {
            if !seen.contains(&entry.route.name) {
                seen.push(entry.route.name.clone());
                routes.push(Arc::clone(&entry.route));
            }
        }
        routes
    }

    pub fn get_route(&self, name: &str) -> Option<(Arc<ServiceConfig>, Arc<RouteConfig>)> {
        self.table
            .load()
            .iter()
            .find(|c| c.route.name == name)
            .map(|c| (Arc::clone(&c.service), Arc::clone(&c.route)))
    }

    pub fn route_count(&self) -> usize {
        self.table.load().len()
    }

    /// Match an incoming request. Pure: no request side effects.
    pub fn match_route(
        &self,
        path: &str,
        method: &str,
        headers: &HashMap<String, String>,
    ) -> Option<MatchedRoute> {
        let table = self.table.load();

        for entry in table.iter() {
            if !entry.service.enabled {
                continue;
            }

            if !entry.route.method_allowed(method) {
                continue;
            }

            if !entry.route.hosts.is_empty() {
                let host = headers.get("host").map(|h| h.as_str()).unwrap_or("");
                if !host_allowed(host, &entry.route.hosts) {
                    continue;
                }
            }

            if !headers_allowed(headers, &entry.headers) {
                continue;
            }

            let Some(caps) = entry.pattern.captures(path) else {
                continue;
            };

            let full = caps.get(0).map(|m| m.end()).unwrap_or(0);
            let mut remaining_path = path[full..].to_string();

            if entry.route.strip_path {
                for route_path in &entry.route.paths {
                    let base = base_prefix(route_path);
                    if path.starts_with(base.as_str()) {
                        remaining_path = path[base.len()..].to_string();
                        break;
                    }
                }
            }

            let mut path_params = HashMap::new();
            for name in entry.pattern.capture_names().flatten() {
                if let Some(m) = caps.name(name) {
                    path_params.insert(name.to_string(), m.as_str().to_string());
                }
            }

            return Some(MatchedRoute {
                service: Arc::clone(&entry.service),
                route: Arc::clone(&entry.route),
                path_params,
                remaining_path,
            });
        }

        None
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

/// Compile a route path into an anchored regex.
///
/// `{name}` segments capture `[^/]+`; a trailing `*` matches any
/// suffix; everything else gets trailing-slash tolerance (`/?.*`
/// appended after trimming trailing slashes).
fn compile_pattern(path: &str) -> Result<Regex, GatewayError> {
    let param_re = Regex::new(r"\{(\w+)\}").expect("static pattern");
    let mut pattern = param_re.replace_all(path, "(?P<$1>[^/]+)").into_owned();

    if let Some(stripped) = pattern.strip_suffix('*') {
        pattern = format!("{stripped}.*");
    }

    if !pattern.ends_with(".*") {
        pattern = format!("{}/?.*", pattern.trim_end_matches('/'));
    }

    Regex::new(&format!("^{pattern}"))
        .map_err(|e| GatewayError::Config(format!("invalid route path {path:?}: {e}")))
}

/// Literal portion before the first `{`, with trailing slashes trimmed.
fn base_prefix(path: &str) -> String {
    let literal = path.split('{').next().unwrap_or(path);
    let literal = literal.trim_end_matches('*');
    literal.trim_end_matches('/').to_string()
}

fn compile_header_matches(
    route: &RouteConfig,
) -> Result<Vec<(String, HeaderMatch)>, GatewayError> {
    let mut compiled = Vec::new();
    for (name, value) in &route.headers {
        let matcher = match value.strip_prefix('~') {
            Some(pattern) => HeaderMatch::Pattern(Regex::new(pattern).map_err(|e| {
                GatewayError::Config(format!(
                    "invalid header pattern for {name:?} on route {:?}: {e}",
                    route.name
                ))
            })?),
            None => HeaderMatch::Exact(value.clone()),
        };
        compiled.push((name.to_lowercase(), matcher));
    }
    Ok(compiled)
}

/// Host filter: port-stripped exact match, or `*.`-prefixed suffix rule
/// where `*.x.y` also matches the bare `x.y`.
fn host_allowed(host: &str, allowed: &[String]) -> bool {
    let host = host.split(':').next().unwrap_or(host);

    for entry in allowed {
        if let Some(bare) = entry.strip_prefix("*.") {
            let suffix = &entry[1..];
            if host.ends_with(suffix) || host == bare {
                return true;
            }
        } else if host == entry {
            return true;
        }
    }

    false
}

fn headers_allowed(headers: &HashMap<String, String>, required: &[(String, HeaderMatch)]) -> bool {
    for (name, matcher) in required {
        let Some(value) = headers.get(name) else {
            return false;
        };
        let ok = match matcher {
            HeaderMatch::Exact(expected) => value == expected,
            // `~` patterns match from the start of the value
            HeaderMatch::Pattern(re) => re.find(value).is_some_and(|m| m.start() == 0),
        };
        if !ok {
            return false;
        }
    }
    true
}

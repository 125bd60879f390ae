use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use torii_core::config::PluginConfig;
use torii_core::http::{GatewayRequest, GatewayResponse};
use torii_plugin::plugin::{Phase, Plugin, PluginContext, PluginError, PluginInstance};
use torii_plugin::{PluginChain, PluginRegistry};

/// Test plugin that records execution order and can short-circuit,
/// fail, or transform body chunks depending on its config.
struct ProbePlugin {
    trace: Arc<Mutex<Vec<String>>>,
    log_calls: Arc<AtomicUsize>,
}

struct ProbeInstance {
    label: String,
    priority: i32,
    phases: &'static [Phase],
    short_circuit: bool,
    fail: bool,
    append: Option<String>,
    trace: Arc<Mutex<Vec<String>>>,
    log_calls: Arc<AtomicUsize>,
}

impl Plugin for ProbePlugin {
    fn name(&self) -> &'static str {
        "probe"
    }

    fn configure(&self, config: &Value) -> anyhow::Result<Box<dyn PluginInstance>> {
        let phases: &'static [Phase] = match config.get("phase").and_then(|v| v.as_str()) {
            Some("body_filter") => &[Phase::BodyFilter],
            Some("log") => &[Phase::Log],
            _ => &[Phase::Access],
        };
        Ok(Box::new(ProbeInstance {
            label: config
                .get("label")
                .and_then(|v| v.as_str())
                .unwrap_or("probe")
                .to_string(),
            priority: config.get("priority").and_then(|v| v.as_i64()).unwrap_or(0) as i32,
            phases,
            short_circuit: config
                .get("short_circuit")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            fail: config.get("fail").and_then(|v| v.as_bool()).unwrap_or(false),
            append: config
                .get("append")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            trace: Arc::clone(&self.trace),
            log_calls: Arc::clone(&self.log_calls),
        }))
    }
}

#[async_trait]
impl PluginInstance for ProbeInstance {
    fn name(&self) -> &'static str {
        "probe"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn phases(&self) -> &'static [Phase] {
        self.phases
    }

    async fn access(&self, _ctx: &mut PluginContext) -> Result<Option<GatewayResponse>, PluginError> {
        self.trace.lock().unwrap().push(self.label.clone());
        if self.fail {
            return Err(PluginError::new("probe exploded"));
        }
        if self.short_circuit {
            return Ok(Some(GatewayResponse::error(401, "denied")));
        }
        Ok(None)
    }

    async fn body_filter(
        &self,
        _ctx: &mut PluginContext,
        chunk: Bytes,
    ) -> Result<Bytes, PluginError> {
        if let Some(suffix) = &self.append {
            let mut out = chunk.to_vec();
            out.extend_from_slice(suffix.as_bytes());
            return Ok(Bytes::from(out));
        }
        Ok(chunk)
    }

    async fn log(&self, _ctx: &PluginContext) -> Result<(), PluginError> {
        self.log_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(PluginError::new("log sink unreachable"));
        }
        Ok(())
    }
}

fn registry_with_probe() -> (PluginRegistry, Arc<Mutex<Vec<String>>>, Arc<AtomicUsize>) {
    let trace = Arc::new(Mutex::new(Vec::new()));
    let log_calls = Arc::new(AtomicUsize::new(0));
    let mut registry = PluginRegistry::new();
    registry.register(Arc::new(ProbePlugin {
        trace: Arc::clone(&trace),
        log_calls: Arc::clone(&log_calls),
    }));
    (registry, trace, log_calls)
}

fn plugin_config(config: Value) -> PluginConfig {
    PluginConfig {
        name: "probe".to_string(),
        enabled: true,
        config,
    }
}

fn ctx() -> PluginContext {
    PluginContext::new(GatewayRequest::new("GET", "/api"))
}

#[tokio::test]
async fn access_runs_in_priority_order_across_scopes() {
    let (registry, trace, _) = registry_with_probe();
    let mut chain = PluginChain::new();
    chain
        .add_global_plugin(&registry, &plugin_config(json!({"label": "global", "priority": 50})))
        .unwrap();
    chain
        .add_service_plugin(
            &registry,
            "svc",
            &plugin_config(json!({"label": "service", "priority": 100})),
        )
        .unwrap();
    chain
        .add_route_plugin(
            &registry,
            "route",
            &plugin_config(json!({"label": "route", "priority": 75})),
        )
        .unwrap();

    let result = chain.run_access(&mut ctx(), Some("svc"), Some("route")).await;
    assert!(result.is_none());
    assert_eq!(
        *trace.lock().unwrap(),
        vec!["service".to_string(), "route".to_string(), "global".to_string()]
    );
}

#[tokio::test]
async fn equal_priority_ties_keep_scope_order() {
    let (registry, trace, _) = registry_with_probe();
    let mut chain = PluginChain::new();
    chain
        .add_route_plugin(&registry, "r", &plugin_config(json!({"label": "route", "priority": 10})))
        .unwrap();
    chain
        .add_global_plugin(&registry, &plugin_config(json!({"label": "global", "priority": 10})))
        .unwrap();
    chain
        .add_service_plugin(&registry, "s", &plugin_config(json!({"label": "service", "priority": 10})))
        .unwrap();

    chain.run_access(&mut ctx(), Some("s"), Some("r")).await;
    assert_eq!(
        *trace.lock().unwrap(),
        vec!["global".to_string(), "service".to_string(), "route".to_string()]
    );
}

#[tokio::test]
async fn access_short_circuit_stops_iteration() {
    let (registry, trace, _) = registry_with_probe();
    let mut chain = PluginChain::new();
    chain
        .add_global_plugin(
            &registry,
            &plugin_config(json!({"label": "first", "priority": 100, "short_circuit": true})),
        )
        .unwrap();
    chain
        .add_global_plugin(&registry, &plugin_config(json!({"label": "second", "priority": 50})))
        .unwrap();

    let response = chain.run_access(&mut ctx(), None, None).await.unwrap();
    assert_eq!(response.status, 401);
    assert_eq!(*trace.lock().unwrap(), vec!["first".to_string()]);
}

#[tokio::test]
async fn disabled_plugins_are_skipped() {
    let (registry, trace, _) = registry_with_probe();
    let mut chain = PluginChain::new();
    let mut disabled = plugin_config(json!({"label": "off", "short_circuit": true}));
    disabled.enabled = false;
    chain.add_global_plugin(&registry, &disabled).unwrap();

    let result = chain.run_access(&mut ctx(), None, None).await;
    assert!(result.is_none());
    assert!(trace.lock().unwrap().is_empty());
}

#[tokio::test]
async fn scope_buckets_only_apply_to_their_owner() {
    let (registry, trace, _) = registry_with_probe();
    let mut chain = PluginChain::new();
    chain
        .add_service_plugin(&registry, "svc-a", &plugin_config(json!({"label": "a"})))
        .unwrap();

    chain.run_access(&mut ctx(), Some("svc-b"), None).await;
    assert!(trace.lock().unwrap().is_empty());

    chain.run_access(&mut ctx(), Some("svc-a"), None).await;
    assert_eq!(*trace.lock().unwrap(), vec!["a".to_string()]);
}

#[tokio::test]
async fn access_error_becomes_internal_error_response() {
    let (registry, _, _) = registry_with_probe();
    let mut chain = PluginChain::new();
    chain
        .add_global_plugin(&registry, &plugin_config(json!({"label": "boom", "fail": true})))
        .unwrap();

    let response = chain.run_access(&mut ctx(), None, None).await.unwrap();
    assert_eq!(response.status, 500);
}

#[tokio::test]
async fn log_errors_are_swallowed_and_all_plugins_run() {
    let (registry, _, log_calls) = registry_with_probe();
    let mut chain = PluginChain::new();
    chain
        .add_global_plugin(
            &registry,
            &plugin_config(json!({"label": "l1", "phase": "log", "fail": true, "priority": 10})),
        )
        .unwrap();
    chain
        .add_global_plugin(&registry, &plugin_config(json!({"label": "l2", "phase": "log"})))
        .unwrap();

    chain.run_log(&ctx(), None, None).await;
    assert_eq!(log_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn body_filter_chains_replacements() {
    let (registry, _, _) = registry_with_probe();
    let mut chain = PluginChain::new();
    chain
        .add_global_plugin(
            &registry,
            &plugin_config(json!({"label": "b1", "phase": "body_filter", "append": "-x", "priority": 20})),
        )
        .unwrap();
    chain
        .add_global_plugin(
            &registry,
            &plugin_config(json!({"label": "b2", "phase": "body_filter", "append": "-y", "priority": 10})),
        )
        .unwrap();

    assert!(chain.has_body_filters(None, None));
    let out = chain
        .run_body_filter(&mut ctx(), Bytes::from_static(b"body"), None, None)
        .await
        .unwrap();
    assert_eq!(&out[..], b"body-x-y");
}

#[tokio::test]
async fn unknown_plugin_is_skipped() {
    let (registry, _, _) = registry_with_probe();
    let mut chain = PluginChain::new();
    let missing = PluginConfig {
        name: "no-such-plugin".to_string(),
        enabled: true,
        config: json!({}),
    };
    chain.add_global_plugin(&registry, &missing).unwrap();
    assert_eq!(chain.plugin_count(), 0);
    assert!(!chain.has_body_filters(None, None));
}

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use torii_core::config::{
    GatewayConfig, HealthCheckConfig, PluginConfig, RetryConfig, RouteConfig, ServiceConfig,
    TargetConfig, UpstreamConfig,
};
use torii_core::http::GatewayRequest;
use torii_plugin::plugin::{Phase, Plugin, PluginContext, PluginError, PluginInstance};
use torii_plugin::PluginRegistry;
use torii_proxy::Gateway;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn base_upstream(name: &str, port: u16) -> UpstreamConfig {
    UpstreamConfig {
        name: name.to_string(),
        targets: vec![TargetConfig {
            host: "127.0.0.1".to_string(),
            port,
            weight: 100,
            priority: 0,
            tags: vec![],
        }],
        algorithm: Default::default(),
        health_check: HealthCheckConfig {
            enabled: false,
            ..Default::default()
        },
        circuit_breaker: Default::default(),
        retry: RetryConfig {
            enabled: false,
            ..Default::default()
        },
        connect_timeout: 1000,
        read_timeout: 5000,
        write_timeout: 5000,
    }
}

fn route(name: &str, paths: &[&str], plugins: Vec<PluginConfig>) -> RouteConfig {
    RouteConfig {
        name: name.to_string(),
        paths: paths.iter().map(|p| p.to_string()).collect(),
        methods: vec!["GET".to_string(), "POST".to_string()],
        hosts: vec![],
        headers: Default::default(),
        strip_path: true,
        preserve_host: false,
        plugins,
    }
}

fn service(name: &str, upstream: &str, routes: Vec<RouteConfig>) -> ServiceConfig {
    ServiceConfig {
        name: name.to_string(),
        upstream: upstream.to_string(),
        routes,
        plugins: vec![],
        protocol: "http".to_string(),
        path: String::new(),
        enabled: true,
    }
}

fn plugin(name: &str, config: serde_json::Value) -> PluginConfig {
    PluginConfig {
        name: name.to_string(),
        enabled: true,
        config,
    }
}

fn registry() -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    torii_plugins::register_all(&mut registry);
    registry
}

fn gateway(config: GatewayConfig, registry: &PluginRegistry) -> Gateway {
    Gateway::from_config(config, registry).unwrap()
}

fn request(method: &str, path: &str) -> GatewayRequest {
    let mut req = GatewayRequest::new(method, path);
    req.client_ip = "198.51.100.7".to_string();
    req.set_header("host", "gw.example.com");
    req
}

#[tokio::test]
async fn route_match_auth_pass_strips_path_and_sets_consumer_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/items"))
        .and(header("x-consumer-username", "alice"))
        .and(header("x-authenticated-consumer", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_string("upstream-body"))
        .mount(&server)
        .await;

    let config = GatewayConfig {
        upstreams: vec![base_upstream("u", server.address().port())],
        services: vec![service(
            "s",
            "u",
            vec![route(
                "items",
                &["/api/*"],
                vec![plugin("key-auth", json!({ "keys": { "k1": "alice" } }))],
            )],
        )],
        ..Default::default()
    };

    let registry = registry();
    let gw = gateway(config, &registry);

    let mut req = request("GET", "/api/v1/items");
    req.set_header("X-API-Key", "k1");
    let resp = gw.handle_request(req).await;

    assert_eq!(resp.status, 200);
    assert_eq!(&resp.body[..], b"upstream-body");
}

#[tokio::test]
async fn missing_key_is_401_before_proxying() {
    let server = MockServer::start().await;
    // no mock mounted: reaching the upstream would 404 via wiremock

    let config = GatewayConfig {
        upstreams: vec![base_upstream("u", server.address().port())],
        services: vec![service(
            "s",
            "u",
            vec![route(
                "items",
                &["/api/*"],
                vec![plugin("key-auth", json!({ "keys": { "k1": "alice" } }))],
            )],
        )],
        ..Default::default()
    };

    let registry = registry();
    let gw = gateway(config, &registry);

    let resp = gw.handle_request(request("GET", "/api/v1/items")).await;
    assert_eq!(resp.status, 401);
}

#[tokio::test]
async fn unmatched_path_is_404() {
    let registry = registry();
    let gw = gateway(GatewayConfig::default(), &registry);

    let resp = gw.handle_request(request("GET", "/nope")).await;
    assert_eq!(resp.status, 404);
    let body: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
    assert_eq!(body["error"], "No route matched");
}

#[tokio::test]
async fn rate_limit_trips_on_third_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let config = GatewayConfig {
        upstreams: vec![base_upstream("u", server.address().port())],
        services: vec![service(
            "s",
            "u",
            vec![route(
                "limited",
                &["/api/*"],
                vec![plugin(
                    "rate-limiting",
                    json!({ "minute": 2, "limit_by": "ip" }),
                )],
            )],
        )],
        ..Default::default()
    };

    let registry = registry();
    let gw = gateway(config, &registry);

    for _ in 0..2 {
        let resp = gw.handle_request(request("GET", "/api/x")).await;
        assert_eq!(resp.status, 200);
    }

    let resp = gw.handle_request(request("GET", "/api/x")).await;
    assert_eq!(resp.status, 429);
    assert_eq!(resp.header("x-ratelimit-remaining-minute"), Some("0"));
    let retry_after: u64 = resp.header("retry-after").unwrap().parse().unwrap();
    assert!(retry_after >= 1);
}

#[tokio::test]
async fn service_path_prefix_is_prepended() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/users"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut svc = service("s", "u", vec![route("users", &["/api/*"], vec![])]);
    svc.path = "/v2".to_string();
    let config = GatewayConfig {
        upstreams: vec![base_upstream("u", server.address().port())],
        services: vec![svc],
        ..Default::default()
    };

    let registry = registry();
    let gw = gateway(config, &registry);
    let resp = gw.handle_request(request("GET", "/api/users")).await;
    assert_eq!(resp.status, 200);
}

#[tokio::test]
async fn request_transformer_headers_and_query_reach_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("x-gateway", "torii"))
        .and(query_param("version", "2"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let config = GatewayConfig {
        upstreams: vec![base_upstream("u", server.address().port())],
        services: vec![service(
            "s",
            "u",
            vec![route(
                "api",
                &["/api/*"],
                vec![plugin(
                    "request-transformer",
                    json!({
                        "add": {
                            "headers": { "X-Gateway": "torii" },
                            "querystring": { "version": "2" }
                        }
                    }),
                )],
            )],
        )],
        ..Default::default()
    };

    let registry = registry();
    let gw = gateway(config, &registry);
    let resp = gw.handle_request(request("GET", "/api/thing")).await;
    assert_eq!(resp.status, 200);
}

#[tokio::test]
async fn response_transformer_edits_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/json")
                .set_body_string(r#"{"secret":"x","ok":true}"#),
        )
        .mount(&server)
        .await;

    let config = GatewayConfig {
        upstreams: vec![base_upstream("u", server.address().port())],
        services: vec![service(
            "s",
            "u",
            vec![route(
                "api",
                &["/api/*"],
                vec![plugin(
                    "response-transformer",
                    json!({ "remove": { "json": ["secret"] } }),
                )],
            )],
        )],
        ..Default::default()
    };

    let registry = registry();
    let gw = gateway(config, &registry);
    let resp = gw.handle_request(request("GET", "/api/data")).await;
    assert_eq!(resp.status, 200);
    let body: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
    assert!(body.get("secret").is_none());
    assert_eq!(body["ok"], true);
}

// ── LOG phase accounting ─────────────────────────────────────────

struct CountingLogPlugin {
    calls: Arc<AtomicUsize>,
}

struct CountingLogInstance {
    calls: Arc<AtomicUsize>,
}

impl Plugin for CountingLogPlugin {
    fn name(&self) -> &'static str {
        "counting-log"
    }
    fn priority(&self) -> i32 {
        50
    }
    fn phases(&self) -> &'static [Phase] {
        &[Phase::Log]
    }
    fn configure(&self, _config: &serde_json::Value) -> anyhow::Result<Box<dyn PluginInstance>> {
        Ok(Box::new(CountingLogInstance {
            calls: Arc::clone(&self.calls),
        }))
    }
}

#[async_trait]
impl PluginInstance for CountingLogInstance {
    fn name(&self) -> &'static str {
        "counting-log"
    }
    fn priority(&self) -> i32 {
        50
    }
    fn phases(&self) -> &'static [Phase] {
        &[Phase::Log]
    }
    async fn log(&self, ctx: &PluginContext) -> Result<(), PluginError> {
        assert!(ctx.response.is_some(), "log phase must see the response");
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn log_phase_runs_once_for_proxied_and_short_circuited_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = registry();
    registry.register(Arc::new(CountingLogPlugin {
        calls: Arc::clone(&calls),
    }));

    let config = GatewayConfig {
        upstreams: vec![base_upstream("u", server.address().port())],
        services: vec![service(
            "s",
            "u",
            vec![route(
                "api",
                &["/api/*"],
                vec![plugin("key-auth", json!({ "keys": { "k1": "alice" } }))],
            )],
        )],
        plugins: vec![plugin("counting-log", json!({}))],
        ..Default::default()
    };

    let gw = gateway(config, &registry);

    // proxied request → one log call
    let mut req = request("GET", "/api/a");
    req.set_header("X-API-Key", "k1");
    gw.handle_request(req).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // short-circuited 401 → still exactly one more log call
    let resp = gw.handle_request(request("GET", "/api/a")).await;
    assert_eq!(resp.status, 401);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn cors_preflight_short_circuits_with_204() {
    let registry = registry();
    let config = GatewayConfig {
        upstreams: vec![base_upstream("u", 1)],
        services: vec![service(
            "s",
            "u",
            vec![RouteConfig {
                methods: vec!["GET".to_string(), "OPTIONS".to_string()],
                ..route("api", &["/api/*"], vec![plugin("cors", json!({}))])
            }],
        )],
        ..Default::default()
    };

    let gw = gateway(config, &registry);
    let mut req = request("OPTIONS", "/api/a");
    req.set_header("Origin", "https://app.example.com");
    let resp = gw.handle_request(req).await;
    assert_eq!(resp.status, 204);
    assert_eq!(resp.header("access-control-allow-origin"), Some("*"));
}

#[tokio::test]
async fn gateway_responses_keep_upstream_body_verbatim() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("x-upstream-id", "abc")
                .set_body_string("created"),
        )
        .mount(&server)
        .await;

    let config = GatewayConfig {
        upstreams: vec![base_upstream("u", server.address().port())],
        services: vec![service(
            "s",
            "u",
            vec![RouteConfig {
                strip_path: false,
                ..route("echo", &["/echo"], vec![])
            }],
        )],
        ..Default::default()
    };

    let registry = registry();
    let gw = gateway(config, &registry);
    let resp = gw.handle_request(request("POST", "/echo")).await;
    assert_eq!(resp.status, 201);
    assert_eq!(&resp.body[..], b"created");
    assert_eq!(resp.header("x-upstream-id"), Some("abc"));
}

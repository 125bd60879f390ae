use std::collections::HashMap;
use std::time::Instant;
use torii_core::config::{
    CircuitBreakerConfig, HealthCheckConfig, RetryConfig, TargetConfig, UpstreamConfig,
};
use torii_core::http::GatewayRequest;
use torii_proxy::UpstreamManager;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn upstream_config(name: &str, port: u16) -> UpstreamConfig {
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
        // probes stay off; these tests drive state by hand
        health_check: HealthCheckConfig {
            enabled: false,
            ..Default::default()
        },
        circuit_breaker: CircuitBreakerConfig::default(),
        retry: RetryConfig {
            enabled: false,
            ..Default::default()
        },
        connect_timeout: 1000,
        read_timeout: 5000,
        write_timeout: 5000,
    }
}

fn request(method: &str, path: &str) -> GatewayRequest {
    let mut req = GatewayRequest::new(method, path);
    req.client_ip = "203.0.113.10".to_string();
    req.set_header("host", "gw.example.com");
    req
}

#[tokio::test]
async fn proxies_and_injects_forwarding_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/items"))
        .and(header("x-forwarded-for", "203.0.113.10"))
        .and(header("x-forwarded-proto", "http"))
        .and(header("x-forwarded-host", "gw.example.com"))
        .respond_with(ResponseTemplate::new(200).set_body_string("upstream-body"))
        .mount(&server)
        .await;

    let manager = UpstreamManager::new();
    manager.add_upstream(upstream_config("backend", server.address().port()));
    manager.start().await;

    let resp = manager
        .proxy_request(&request("GET", "/api"), "backend", "/v1/items", &HashMap::new())
        .await;

    assert_eq!(resp.status, 200);
    assert_eq!(&resp.body[..], b"upstream-body");
    manager.stop().await;
}

#[tokio::test]
async fn additional_headers_overlay_inbound_ones() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("x-consumer-username", "alice"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let manager = UpstreamManager::new();
    manager.add_upstream(upstream_config("backend", server.address().port()));

    let mut additional = HashMap::new();
    additional.insert("X-Consumer-Username".to_string(), "alice".to_string());

    let resp = manager
        .proxy_request(&request("GET", "/api"), "backend", "/", &additional)
        .await;
    assert_eq!(resp.status, 200);
}

#[tokio::test]
async fn query_string_is_forwarded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let manager = UpstreamManager::new();
    manager.add_upstream(upstream_config("backend", server.address().port()));

    let mut req = request("GET", "/api/items");
    req.query = "page=2".to_string();
    let resp = manager
        .proxy_request(&req, "backend", "/items", &HashMap::new())
        .await;
    assert_eq!(resp.status, 200);
}

#[tokio::test]
async fn response_hop_by_hop_headers_are_stripped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-upstream", "yes")
                .insert_header("transfer-encoding", "identity"),
        )
        .mount(&server)
        .await;

    let manager = UpstreamManager::new();
    manager.add_upstream(upstream_config("backend", server.address().port()));

    let resp = manager
        .proxy_request(&request("GET", "/"), "backend", "/", &HashMap::new())
        .await;
    assert_eq!(resp.header("x-upstream"), Some("yes"));
    assert!(resp.header("transfer-encoding").is_none());
    assert!(resp.header("connection").is_none());
}

#[tokio::test]
async fn unknown_upstream_is_502() {
    let manager = UpstreamManager::new();
    let resp = manager
        .proxy_request(&request("GET", "/"), "ghost", "/", &HashMap::new())
        .await;
    assert_eq!(resp.status, 502);
    let body: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
    assert!(body["error"].as_str().unwrap().contains("ghost"));
}

#[tokio::test]
async fn no_healthy_targets_is_503() {
    let server = MockServer::start().await;
    let manager = UpstreamManager::new();
    let upstream = manager.add_upstream(upstream_config("backend", server.address().port()));
    for target in upstream.targets() {
        target.mark_unhealthy();
    }

    let resp = manager
        .proxy_request(&request("GET", "/"), "backend", "/", &HashMap::new())
        .await;
    assert_eq!(resp.status, 503);
    let body: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
    assert_eq!(body["error"], "No healthy targets available");
}

#[tokio::test]
async fn connect_failure_without_retry_is_503() {
    // bind and drop a listener to get a port nothing listens on
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let manager = UpstreamManager::new();
    manager.add_upstream(upstream_config("backend", port));

    let resp = manager
        .proxy_request(&request("GET", "/"), "backend", "/", &HashMap::new())
        .await;
    assert_eq!(resp.status, 503);

    let upstream = manager.get_upstream("backend").unwrap();
    assert_eq!(upstream.targets()[0].total_failures(), 1);
}

#[tokio::test]
async fn retries_on_503_then_returns_200_with_backoff() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
        .mount(&server)
        .await;

    let mut config = upstream_config("backend", server.address().port());
    config.retry = RetryConfig {
        enabled: true,
        max_retries: 2,
        retry_on_status: vec![503],
        backoff_factor: 0.1,
    };
    let manager = UpstreamManager::new();
    manager.add_upstream(config);

    let started = Instant::now();
    let resp = manager
        .proxy_request(&request("GET", "/"), "backend", "/", &HashMap::new())
        .await;

    assert_eq!(resp.status, 200);
    assert_eq!(&resp.body[..], b"recovered");
    // backoffs: 0.1 * 2^0 + 0.1 * 2^1
    assert!(
        started.elapsed().as_millis() >= 300,
        "expected backoff latency, got {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn retry_exhaustion_returns_last_response_as_is() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("still down"))
        .mount(&server)
        .await;

    let mut config = upstream_config("backend", server.address().port());
    config.retry = RetryConfig {
        enabled: true,
        max_retries: 1,
        retry_on_status: vec![503],
        backoff_factor: 0.01,
    };
    let manager = UpstreamManager::new();
    manager.add_upstream(config);

    let resp = manager
        .proxy_request(&request("GET", "/"), "backend", "/", &HashMap::new())
        .await;
    assert_eq!(resp.status, 503);
    assert_eq!(&resp.body[..], b"still down");
}

#[tokio::test]
async fn attempt_count_is_bounded_by_max_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3) // max_retries = 2 → exactly 3 attempts
        .mount(&server)
        .await;

    let mut config = upstream_config("backend", server.address().port());
    config.retry = RetryConfig {
        enabled: true,
        max_retries: 2,
        retry_on_status: vec![503],
        backoff_factor: 0.01,
    };
    let manager = UpstreamManager::new();
    manager.add_upstream(config);

    let resp = manager
        .proxy_request(&request("GET", "/"), "backend", "/", &HashMap::new())
        .await;
    assert_eq!(resp.status, 503);
    server.verify().await;
}

#[tokio::test]
async fn circuit_opens_after_repeated_server_errors_then_recovers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut config = upstream_config("backend", server.address().port());
    config.circuit_breaker = CircuitBreakerConfig {
        enabled: true,
        failure_threshold: 3,
        success_threshold: 2,
        timeout: 1,
        half_open_requests: 2,
    };
    let manager = UpstreamManager::new();
    manager.add_upstream(config);

    // three 500s trip the breaker
    for _ in 0..3 {
        let resp = manager
            .proxy_request(&request("GET", "/"), "backend", "/", &HashMap::new())
            .await;
        assert_eq!(resp.status, 500);
    }

    // fourth request fails fast
    let resp = manager
        .proxy_request(&request("GET", "/"), "backend", "/", &HashMap::new())
        .await;
    assert_eq!(resp.status, 503);
    let body: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
    assert!(body["error"].as_str().unwrap().contains("circuit open"));

    // after the open timeout the target is fixed; two half-open
    // successes close the breaker again
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    for _ in 0..2 {
        let resp = manager
            .proxy_request(&request("GET", "/"), "backend", "/", &HashMap::new())
            .await;
        assert_eq!(resp.status, 200);
    }

    let upstream = manager.get_upstream("backend").unwrap();
    assert_eq!(
        upstream.circuit_breaker().state(),
        torii_proxy::CircuitState::Closed
    );
    let resp = manager
        .proxy_request(&request("GET", "/"), "backend", "/", &HashMap::new())
        .await;
    assert_eq!(resp.status, 200);
}

#[tokio::test]
async fn active_connections_return_to_zero_after_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let manager = UpstreamManager::new();
    let upstream = manager.add_upstream(upstream_config("backend", server.address().port()));

    for _ in 0..5 {
        manager
            .proxy_request(&request("GET", "/"), "backend", "/", &HashMap::new())
            .await;
    }

    let target = &upstream.targets()[0];
    assert_eq!(target.active_connections(), 0);
    assert_eq!(target.total_requests(), 5);
    assert!(target.total_failures() <= target.total_requests());
}

#[tokio::test]
async fn remove_upstream_stops_it() {
    let manager = UpstreamManager::new();
    manager.add_upstream(upstream_config("backend", 1));
    assert!(manager.remove_upstream("backend").await);
    assert!(!manager.remove_upstream("backend").await);
    assert!(manager.get_upstream("backend").is_none());
}

//! Router-level tests: requests go through the full axum stack.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use tokio::sync::watch;
use tower::ServiceExt;

use lagscale_api::{ApiState, build_router};
use lagscale_broker::{BrokerError, Lookup, MemoryBroker};
use lagscale_core::ScalerPolicy;
use lagscale_engine::Scaler;

fn broker() -> MemoryBroker {
    let broker = MemoryBroker::new();
    broker.create_topic("orders", 3);
    broker.create_topic("audit", 1);
    for p in 0..3 {
        broker.commit("orders-workers", "orders", p, 0);
    }
    broker.produce("orders", 1, 25).unwrap();
    broker
}

async fn state(broker: &MemoryBroker) -> (ApiState, watch::Sender<bool>) {
    let orders = ScalerPolicy::builder("orders-workers")
        .topic("orders")
        .lag_threshold(10)
        .build()
        .unwrap();
    let audit = ScalerPolicy::builder("audit-workers")
        .topic("audit")
        .scale_to_zero_on_invalid_offset(true)
        .build()
        .unwrap();
    let scalers = vec![
        ("orders".to_string(), Scaler::new(orders, Arc::new(broker.clone()))),
        ("audit".to_string(), Scaler::new(audit, Arc::new(broker.clone()))),
    ];
    let (tx, rx) = watch::channel(false);
    (ApiState::new(scalers, Duration::from_secs(5), rx).await, tx)
}

async fn json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn lists_configured_scalers() {
    let (state, _tx) = state(&broker()).await;
    let router = build_router(state);

    let resp = router.oneshot(get("/api/v1/scalers")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = json(resp).await;
    let names: Vec<_> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["audit", "orders"]);
}

#[tokio::test]
async fn evaluate_returns_the_decision() {
    let (state, _tx) = state(&broker()).await;
    let router = build_router(state);

    let resp = router
        .clone()
        .oneshot(post("/api/v1/scalers/orders/evaluate"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = json(resp).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["metric_name"], "s0-kafka-orders");
    assert_eq!(body["data"]["decision"]["total_lag"], 25);
    assert_eq!(body["data"]["decision"]["desired_replicas"], 3);
    assert_eq!(body["data"]["decision"]["active"], true);

    let resp = router.oneshot(get("/api/v1/scalers/orders")).await.unwrap();
    let body = json(resp).await;
    assert_eq!(body["data"]["total_evaluations"], 1);
}

#[tokio::test]
async fn audit_scaler_scales_to_zero_without_commits() {
    let broker = broker();
    broker.produce("audit", 0, 40).unwrap();
    let (state, _tx) = state(&broker).await;

    let resp = build_router(state)
        .oneshot(post("/api/v1/scalers/audit/evaluate"))
        .await
        .unwrap();
    let body = json(resp).await;
    assert_eq!(body["data"]["decision"]["active"], false);
    assert_eq!(body["data"]["decision"]["desired_replicas"], 0);
}

#[tokio::test]
async fn broker_failure_is_503_with_held_decision() {
    let broker = broker();
    let (state, _tx) = state(&broker).await;
    let router = build_router(state);

    let resp = router
        .clone()
        .oneshot(post("/api/v1/scalers/orders/evaluate"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    broker.fail_next(
        Lookup::Committed,
        BrokerError::Authentication("bad credentials".into()),
        100,
    );
    let resp = router
        .clone()
        .oneshot(post("/api/v1/scalers/orders/evaluate"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body = json(resp).await;
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("bad credentials"));
    assert_eq!(body["data"]["decision"]["desired_replicas"], 3);
    assert_eq!(body["data"]["cancelled"], false);

    let resp = router.oneshot(get("/metrics")).await.unwrap();
    let text = String::from_utf8(to_bytes(resp.into_body(), usize::MAX).await.unwrap().to_vec()).unwrap();
    assert!(text.contains(
        "lagscale_consecutive_failures{scaler=\"orders\",metric=\"s0-kafka-orders\"} 1"
    ));
    assert!(text.contains(
        "lagscale_desired_replicas{scaler=\"orders\",metric=\"s0-kafka-orders\"} 3"
    ));
}

#[tokio::test]
async fn unknown_scaler_is_404() {
    let (state, _tx) = state(&broker()).await;
    let resp = build_router(state)
        .oneshot(post("/api/v1/scalers/nope/evaluate"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test(start_paused = true)]
async fn slow_broker_exceeds_evaluation_timeout() {
    let broker = broker();
    broker.set_latency(Duration::from_secs(2));
    let orders = ScalerPolicy::builder("orders-workers").topic("orders").build().unwrap();
    let (_tx, rx) = watch::channel(false);
    let state = ApiState::new(
        vec![("orders".to_string(), Scaler::new(orders, Arc::new(broker.clone())))],
        Duration::from_millis(500),
        rx,
    )
    .await;

    let resp = build_router(state)
        .oneshot(post("/api/v1/scalers/orders/evaluate"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json(resp).await;
    assert_eq!(body["data"]["cancelled"], true);
    assert!(body["data"]["decision"].is_null());
}

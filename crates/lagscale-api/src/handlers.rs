//! REST API handlers.
//!
//! Every JSON response uses the same envelope: `success`, then `data`
//! and/or `error`.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;
use tracing::info;

use lagscale_core::ScaleDecision;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

/// Body of a successful or failed evaluation.
#[derive(Debug, Serialize)]
pub struct EvaluationView {
    pub scaler: String,
    pub metric_name: String,
    /// The new decision on success; the held one on failure.
    pub decision: Option<ScaleDecision>,
    pub cancelled: bool,
}

// ── Scalers ────────────────────────────────────────────────────

/// GET /api/v1/scalers
pub async fn list_scalers(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.outcomes.snapshot().await)
}

/// GET /api/v1/scalers/{name}
pub async fn get_scaler(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.outcomes.get(&name).await {
        Some(status) => ApiResponse::ok(status).into_response(),
        None => error_response("scaler not found", StatusCode::NOT_FOUND).into_response(),
    }
}

/// POST /api/v1/scalers/{name}/evaluate
pub async fn evaluate_scaler(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let Some(result) = state.evaluate(&name).await else {
        return error_response("scaler not found", StatusCode::NOT_FOUND).into_response();
    };
    let status = state.outcomes.get(&name).await;
    let metric_name = status
        .as_ref()
        .map(|s| s.metric_name.clone())
        .unwrap_or_default();

    match result {
        Ok(decision) => {
            info!(scaler = %name, desired = decision.desired_replicas, "evaluation served");
            ApiResponse::ok(EvaluationView {
                scaler: name,
                metric_name,
                decision: Some(decision),
                cancelled: false,
            })
            .into_response()
        }
        Err(e) => {
            let held = EvaluationView {
                scaler: name,
                metric_name,
                decision: status.and_then(|s| s.last_decision),
                cancelled: e.is_cancelled(),
            };
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse {
                    success: false,
                    data: Some(held),
                    error: Some(e.to_string()),
                }),
            )
                .into_response()
        }
    }
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let statuses = state.outcomes.snapshot().await;
    let body = lagscale_metrics::render_prometheus(&statuses);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use lagscale_broker::{BrokerError, Lookup, MemoryBroker};
    use lagscale_core::ScalerPolicy;
    use lagscale_engine::Scaler;
    use tokio::sync::watch;

    async fn test_state(broker: &MemoryBroker) -> (ApiState, watch::Sender<bool>) {
        let policy = ScalerPolicy::builder("workers")
            .topic("orders")
            .lag_threshold(5)
            .build()
            .unwrap();
        let scaler = Scaler::new(policy, Arc::new(broker.clone()));
        let (tx, rx) = watch::channel(false);
        let state = ApiState::new(vec![("orders".to_string(), scaler)], Duration::from_secs(5), rx).await;
        (state, tx)
    }

    fn orders_broker() -> MemoryBroker {
        let broker = MemoryBroker::new();
        broker.create_topic("orders", 2);
        broker.commit("workers", "orders", 0, 0);
        broker.commit("workers", "orders", 1, 0);
        broker.produce("orders", 0, 12).unwrap();
        broker
    }

    #[tokio::test]
    async fn list_scalers_ok() {
        let (state, _tx) = test_state(&orders_broker()).await;
        let resp = list_scalers(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn get_unknown_scaler() {
        let (state, _tx) = test_state(&orders_broker()).await;
        let resp = get_scaler(State(state), Path("nope".to_string())).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn evaluate_records_success() {
        let (state, _tx) = test_state(&orders_broker()).await;
        let resp = evaluate_scaler(State(state.clone()), Path("orders".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let status = state.outcomes.get("orders").await.unwrap();
        let decision = status.last_decision.unwrap();
        assert_eq!(decision.total_lag, 12);
        assert_eq!(decision.desired_replicas, 2);
        assert_eq!(status.metric_name, "s0-kafka-orders");
    }

    #[tokio::test]
    async fn evaluate_unknown_scaler() {
        let (state, _tx) = test_state(&orders_broker()).await;
        let resp = evaluate_scaler(State(state), Path("ghost".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn failed_pass_is_unavailable_and_holds_decision() {
        let broker = orders_broker();
        let (state, _tx) = test_state(&broker).await;
        state.evaluate("orders").await.unwrap().unwrap();

        broker.fail_next(Lookup::Metadata, BrokerError::Authentication("denied".into()), 10);
        let resp = evaluate_scaler(State(state.clone()), Path("orders".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        let status = state.outcomes.get("orders").await.unwrap();
        assert_eq!(status.consecutive_failures, 1);
        assert_eq!(status.last_decision.unwrap().desired_replicas, 2);
    }

    #[tokio::test]
    async fn shutdown_cancels_evaluation() {
        let (state, tx) = test_state(&orders_broker()).await;
        tx.send(true).unwrap();
        let err = state.evaluate("orders").await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn prometheus_endpoint_returns_text() {
        let (state, _tx) = test_state(&orders_broker()).await;
        let resp = prometheus_metrics(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
        assert!(content_type.contains("text/plain"));
    }
}

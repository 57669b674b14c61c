//! lagscale-api — HTTP surface for the autoscaling control loop.
//!
//! The control loop owns the polling interval, stabilization windows and
//! replica bounds; it calls `evaluate` once per interval and applies the
//! decision. A failed pass answers 503 with the last decision so the caller
//! can hold it.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/scalers` | List scalers with their last outcome |
//! | GET | `/api/v1/scalers/{name}` | One scaler's last outcome |
//! | POST | `/api/v1/scalers/{name}/evaluate` | Run one evaluation pass |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use tokio::sync::{Mutex, watch};
use tracing::error;

use lagscale_core::ScaleDecision;
use lagscale_engine::{Scaler, ScalerResult};
use lagscale_metrics::OutcomeRegistry;

/// A scaler behind its own lock: passes for one scaler run one at a time,
/// different scalers run independently.
pub type ScalerHandle = Arc<Mutex<Scaler>>;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub scalers: Arc<BTreeMap<String, ScalerHandle>>,
    pub outcomes: OutcomeRegistry,
    /// Budget for one pass; an unfinished pass is cancelled.
    pub evaluation_timeout: Duration,
    /// Flips to `true` on shutdown, cancelling in-flight passes.
    pub shutdown: watch::Receiver<bool>,
}

impl ApiState {
    /// Wrap named scalers and register each with the outcome registry. The
    /// metric name uses the scaler's position in `scalers`.
    pub async fn new(
        scalers: Vec<(String, Scaler)>,
        evaluation_timeout: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let outcomes = OutcomeRegistry::new();
        let mut handles = BTreeMap::new();
        for (index, (name, scaler)) in scalers.into_iter().enumerate() {
            outcomes
                .register(&name, &scaler.policy().metric_name(index))
                .await;
            handles.insert(name, Arc::new(Mutex::new(scaler)));
        }
        Self {
            scalers: Arc::new(handles),
            outcomes,
            evaluation_timeout,
            shutdown,
        }
    }

    /// Run one pass of `name` and record its outcome. `None` if no such
    /// scaler is configured.
    pub async fn evaluate(&self, name: &str) -> Option<ScalerResult<ScaleDecision>> {
        let handle = self.scalers.get(name)?;
        let mut cancel = self.shutdown.clone();

        let result = {
            let mut scaler = handle.lock().await;
            scaler
                .evaluate_within(self.evaluation_timeout, &mut cancel)
                .await
        };

        match &result {
            Ok(decision) => self.outcomes.record_success(name, *decision).await,
            Err(e) => {
                if !e.is_cancelled() {
                    error!(scaler = name, error = %e, "evaluation failed, holding last decision");
                }
                self.outcomes.record_failure(name, &e.to_string()).await
            }
        }
        Some(result)
    }
}

/// Build the complete router (REST + metrics).
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/scalers", get(handlers::list_scalers))
        .route("/scalers/{name}", get(handlers::get_scaler))
        .route("/scalers/{name}/evaluate", post(handlers::evaluate_scaler))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::prometheus_metrics).with_state(state))
}

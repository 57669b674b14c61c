//! Outcome registry — last decision and failure counters per scaler.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use lagscale_core::ScaleDecision;

/// What the registry knows about one scaler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScalerStatus {
    pub name: String,
    pub metric_name: String,
    /// Decision of the most recent successful pass. Held across failures.
    pub last_decision: Option<ScaleDecision>,
    pub last_success_epoch: Option<u64>,
    pub consecutive_failures: u64,
    pub total_failures: u64,
    pub total_evaluations: u64,
    pub last_error: Option<String>,
}

impl ScalerStatus {
    fn new(name: &str, metric_name: &str) -> Self {
        Self {
            name: name.to_string(),
            metric_name: metric_name.to_string(),
            last_decision: None,
            last_success_epoch: None,
            consecutive_failures: 0,
            total_failures: 0,
            total_evaluations: 0,
            last_error: None,
        }
    }
}

/// Shared, cloneable registry of scaler outcomes.
#[derive(Debug, Clone, Default)]
pub struct OutcomeRegistry {
    statuses: Arc<RwLock<BTreeMap<String, ScalerStatus>>>,
}

impl OutcomeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a scaler. Re-registering keeps existing counters.
    pub async fn register(&self, name: &str, metric_name: &str) {
        let mut statuses = self.statuses.write().await;
        statuses
            .entry(name.to_string())
            .or_insert_with(|| ScalerStatus::new(name, metric_name));
        debug!(scaler = name, metric_name, "registered scaler outcome tracking");
    }

    pub async fn record_success(&self, name: &str, decision: ScaleDecision) {
        let mut statuses = self.statuses.write().await;
        let status = statuses
            .entry(name.to_string())
            .or_insert_with(|| ScalerStatus::new(name, ""));
        status.total_evaluations += 1;
        status.consecutive_failures = 0;
        status.last_error = None;
        status.last_decision = Some(decision);
        status.last_success_epoch = Some(epoch_secs());
    }

    /// Record a failed pass. The previous decision stays in place.
    pub async fn record_failure(&self, name: &str, error: &str) {
        let mut statuses = self.statuses.write().await;
        let status = statuses
            .entry(name.to_string())
            .or_insert_with(|| ScalerStatus::new(name, ""));
        status.total_evaluations += 1;
        status.total_failures += 1;
        status.consecutive_failures += 1;
        status.last_error = Some(error.to_string());
        warn!(
            scaler = name,
            consecutive = status.consecutive_failures,
            error,
            "evaluation failed, holding last decision"
        );
    }

    pub async fn get(&self, name: &str) -> Option<ScalerStatus> {
        self.statuses.read().await.get(name).cloned()
    }

    /// All statuses, ordered by scaler name.
    pub async fn snapshot(&self) -> Vec<ScalerStatus> {
        self.statuses.read().await.values().cloned().collect()
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

//! Scaler — one policy, one broker, one tracker; `evaluate` runs a pass.
//!
//! A pass first gathers every offset it needs, then computes the decision
//! synchronously. The tracker is only touched in the second half, so a
//! pass that fails or is cancelled while talking to the broker leaves it
//! exactly as it was.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use lagscale_broker::BrokerClient;
use lagscale_core::{PartitionOffsets, ScaleDecision, ScalerPolicy};

use crate::aggregator::aggregate;
use crate::decision::decide;
use crate::error::{ScalerError, ScalerResult};
use crate::fetcher::OffsetFetcher;
use crate::lag::{PartitionLag, partition_lag};
use crate::resolver::resolve_partitions;
use crate::retry::EvaluationOptions;
use crate::tracker::PersistentLagTracker;

pub struct Scaler {
    policy: ScalerPolicy,
    broker: Arc<dyn BrokerClient>,
    fetcher: OffsetFetcher,
    tracker: PersistentLagTracker,
}

impl Scaler {
    pub fn new(policy: ScalerPolicy, broker: Arc<dyn BrokerClient>) -> Self {
        Self::with_options(policy, broker, EvaluationOptions::default())
    }

    pub fn with_options(
        policy: ScalerPolicy,
        broker: Arc<dyn BrokerClient>,
        options: EvaluationOptions,
    ) -> Self {
        let fetcher = OffsetFetcher::new(Arc::clone(&broker), options);
        Self {
            policy,
            broker,
            fetcher,
            tracker: PersistentLagTracker::new(),
        }
    }

    pub fn policy(&self) -> &ScalerPolicy {
        &self.policy
    }

    pub fn tracker(&self) -> &PersistentLagTracker {
        &self.tracker
    }

    /// Run one pass.
    pub async fn evaluate(&mut self) -> ScalerResult<ScaleDecision> {
        let offsets = self.collect_offsets().await?;
        Ok(self.complete(&offsets))
    }

    /// Run one pass, abandoning it as soon as `cancel` turns `true`.
    ///
    /// A cancelled pass returns [`ScalerError::Cancelled`] and leaves the
    /// tracker untouched. A dropped sender never cancels.
    pub async fn evaluate_with_cancel(
        &mut self,
        cancel: &mut watch::Receiver<bool>,
    ) -> ScalerResult<ScaleDecision> {
        let offsets = tokio::select! {
            biased;
            _ = cancelled(cancel) => {
                debug!(group = self.policy.consumer_group(), "evaluation cancelled");
                return Err(ScalerError::Cancelled);
            }
            result = self.collect_offsets() => result?,
        };
        Ok(self.complete(&offsets))
    }

    /// Run one pass bounded by `budget`; running out counts as cancellation.
    pub async fn evaluate_within(
        &mut self,
        budget: Duration,
        cancel: &mut watch::Receiver<bool>,
    ) -> ScalerResult<ScaleDecision> {
        match tokio::time::timeout(budget, self.evaluate_with_cancel(cancel)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    group = self.policy.consumer_group(),
                    budget_ms = budget.as_millis() as u64,
                    "evaluation exceeded its budget"
                );
                Err(ScalerError::Cancelled)
            }
        }
    }

    async fn collect_offsets(&self) -> ScalerResult<Vec<PartitionOffsets>> {
        let partitions =
            resolve_partitions(self.broker.as_ref(), &self.policy, self.fetcher.options()).await?;
        if partitions.is_empty() {
            return Ok(Vec::new());
        }
        self.fetcher
            .fetch(self.policy.consumer_group(), &partitions)
            .await
    }

    fn complete(&mut self, offsets: &[PartitionOffsets]) -> ScaleDecision {
        evaluate_offsets(&self.policy, offsets, &mut self.tracker, epoch_secs())
    }
}

/// The synchronous half of a pass: offsets to decision.
pub fn evaluate_offsets(
    policy: &ScalerPolicy,
    offsets: &[PartitionOffsets],
    tracker: &mut PersistentLagTracker,
    now: u64,
) -> ScaleDecision {
    let lags: Vec<PartitionLag> = offsets.iter().map(|o| partition_lag(o, policy)).collect();
    for lag in &lags {
        debug!(
            group = policy.consumer_group(),
            partition = %lag.topic_partition,
            lag = lag.lag,
            invalid_offset = lag.invalid_offset,
            "partition lag"
        );
    }

    let summary = aggregate(policy, &lags, tracker, now);
    let decision = decide(policy, &summary);

    info!(
        group = policy.consumer_group(),
        active = decision.active,
        desired = decision.desired_replicas,
        total_lag = decision.total_lag,
        partitions = decision.resolved_partitions,
        with_lag = decision.partitions_with_lag,
        excluded = decision.excluded_partitions,
        "scaling decision"
    );
    decision
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let sender_gone = cancel.wait_for(|c| *c).await.is_err();
    if sender_gone {
        std::future::pending::<()>().await;
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

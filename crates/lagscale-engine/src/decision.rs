//! Scaling Decision Engine.

use lagscale_core::{ScaleDecision, ScalerPolicy};

use crate::aggregator::LagSummary;

/// Turn a pass summary into a decision.
///
/// Activation looks at all observed lag, persistent lag included, so a
/// group whose every lagging partition is excluded keeps one replica
/// rather than stopping for good. Sizing uses only the non-excluded total.
/// `desired_replicas` is bounded by partitions with lag when
/// `limitToPartitionsWithLag` is set, and by resolved partitions otherwise,
/// and never drops below one while active.
pub fn decide(policy: &ScalerPolicy, summary: &LagSummary) -> ScaleDecision {
    let threshold = policy.lag_threshold().max(1);
    let total_lag = summary.total_lag.max(0);

    let cap = if policy.limit_to_partitions_with_lag() {
        summary.partitions_with_lag
    } else {
        summary.resolved_partitions
    };

    let active = summary.observed_lag().max(0) > policy.activation_lag_threshold();
    let desired_replicas = if active {
        let wanted = total_lag / threshold + i64::from(total_lag % threshold != 0);
        u32::try_from(wanted).unwrap_or(u32::MAX).min(cap).max(1)
    } else {
        0
    };

    ScaleDecision {
        active,
        desired_replicas,
        total_lag,
        metric_value: total_lag.min(threshold.saturating_mul(i64::from(cap))),
        partitions_with_lag: summary.partitions_with_lag,
        resolved_partitions: summary.resolved_partitions,
        excluded_partitions: summary.excluded_partitions,
    }
}

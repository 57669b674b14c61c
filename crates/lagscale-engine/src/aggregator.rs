//! Aggregator — per-partition lag to pass totals, with persistent-lag
//! exclusion.

use std::collections::BTreeSet;

use lagscale_core::ScalerPolicy;

use crate::lag::PartitionLag;
use crate::tracker::PersistentLagTracker;

/// Totals of one pass, input to the decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LagSummary {
    /// Lag summed over resolved, non-excluded partitions.
    pub total_lag: i64,
    /// Non-excluded partitions with lag above zero.
    pub partitions_with_lag: u32,
    pub resolved_partitions: u32,
    pub excluded_partitions: u32,
    /// Lag held by excluded partitions; counts toward activation only.
    pub excluded_lag: i64,
}

impl LagSummary {
    /// Lag over every resolved partition, excluded ones included.
    pub fn observed_lag(&self) -> i64 {
        self.total_lag.saturating_add(self.excluded_lag)
    }
}

/// Sum `lags` for one pass.
///
/// The tracker is read and updated only when the policy excludes persistent
/// lag; otherwise every partition contributes unconditionally.
pub fn aggregate(
    policy: &ScalerPolicy,
    lags: &[PartitionLag],
    tracker: &mut PersistentLagTracker,
    now: u64,
) -> LagSummary {
    let group = policy.consumer_group();
    let exclude = policy.exclude_persistent_lag();

    if exclude {
        let resolved: BTreeSet<_> = lags.iter().map(|l| &l.topic_partition).collect();
        tracker.retain_partitions(group, &resolved);
    }

    let mut summary = LagSummary {
        resolved_partitions: count(lags.len()),
        ..LagSummary::default()
    };

    for lag in lags {
        if exclude && tracker.observe(group, &lag.topic_partition, lag.lag, now) {
            summary.excluded_partitions += 1;
            summary.excluded_lag = summary.excluded_lag.saturating_add(lag.lag);
            continue;
        }
        summary.total_lag = summary.total_lag.saturating_add(lag.lag);
        if lag.lag > 0 {
            summary.partitions_with_lag += 1;
        }
    }

    summary
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

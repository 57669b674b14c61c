//! Lag Calculator.

use tracing::{debug, warn};

use lagscale_core::{OffsetResetPolicy, PartitionOffsets, ScalerPolicy, TopicPartition};

/// Lag of one partition on one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionLag {
    pub topic_partition: TopicPartition,
    /// Always `>= 0`.
    pub lag: i64,
    /// The group had no usable commit on this partition.
    pub invalid_offset: bool,
}

/// Turn one partition's offsets into a lag value.
///
/// A missing or out-of-range commit yields `0` under
/// `scaleToZeroOnInvalidOffset`. Otherwise the reset policy decides: a
/// consumer resetting to `earliest` replays the whole retained log, so its
/// lag is that count; one resetting to `latest` has an unknown position and
/// gets a value that alone exceeds both `lagThreshold` and
/// `activationLagThreshold`, so the workload is not left at zero replicas.
pub fn partition_lag(offsets: &PartitionOffsets, policy: &ScalerPolicy) -> PartitionLag {
    let tp = &offsets.topic_partition;

    let (lag, invalid_offset) = match offsets.valid_committed() {
        Some(committed) => (offsets.latest_offset.saturating_sub(committed), false),
        None if policy.scale_to_zero_on_invalid_offset() => {
            debug!(
                partition = %tp,
                committed = ?offsets.committed_offset,
                "no valid committed offset, counting as caught up"
            );
            (0, true)
        }
        None => match policy.offset_reset_policy() {
            OffsetResetPolicy::Earliest => {
                let lag = offsets.retained();
                debug!(
                    partition = %tp,
                    committed = ?offsets.committed_offset,
                    lag,
                    "no valid committed offset, counting the retained log"
                );
                (lag, true)
            }
            OffsetResetPolicy::Latest => {
                let lag = policy
                    .lag_threshold()
                    .max(policy.activation_lag_threshold())
                    .saturating_add(1);
                warn!(
                    partition = %tp,
                    committed = ?offsets.committed_offset,
                    offset_reset_policy = %policy.offset_reset_policy(),
                    lag,
                    "no valid committed offset, forcing activation"
                );
                (lag, true)
            }
        },
    };

    PartitionLag {
        topic_partition: tp.clone(),
        lag: lag.max(0),
        invalid_offset,
    }
}

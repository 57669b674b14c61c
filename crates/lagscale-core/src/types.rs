//! Shared types used across lagscale crates.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single partition of a topic.
///
/// Ordering is by topic name, then partition index, so sorted collections of
/// partitions iterate the same way on every pass.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.topic, self.partition)
    }
}

/// Offset facts for one partition, captured fresh on every evaluation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionOffsets {
    pub topic_partition: TopicPartition,
    /// Log end offset.
    pub latest_offset: i64,
    /// Log start offset (moves forward with retention).
    pub earliest_offset: i64,
    /// Last offset committed by the consumer group, if any.
    pub committed_offset: Option<i64>,
}

impl PartitionOffsets {
    /// The committed offset if it lies inside `[earliest, latest]`.
    ///
    /// An out-of-range commit is treated exactly like a missing one.
    pub fn valid_committed(&self) -> Option<i64> {
        self.committed_offset
            .filter(|c| (self.earliest_offset..=self.latest_offset).contains(c))
    }

    /// Messages currently retained in the partition.
    pub fn retained(&self) -> i64 {
        (self.latest_offset - self.earliest_offset).max(0)
    }
}

/// The outcome of one evaluation pass.
///
/// `active` and `desired_replicas` are the decision proper; the remaining
/// fields are the aggregate the decision was derived from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleDecision {
    /// Whether the workload should run at all. Persistent lag counts here
    /// even though it is left out of `total_lag`.
    pub active: bool,
    /// Target replica count, bounded by partition cardinality. Zero when
    /// inactive, at least one when active.
    pub desired_replicas: u32,
    /// Lag summed over resolved, non-excluded partitions.
    pub total_lag: i64,
    /// `total_lag` capped at `lag_threshold * cap`, for average-value style control loops.
    pub metric_value: i64,
    /// Non-excluded partitions whose lag is above zero.
    pub partitions_with_lag: u32,
    /// Partitions evaluated on this pass.
    pub resolved_partitions: u32,
    /// Partitions left out of `total_lag` as persistently stuck.
    pub excluded_partitions: u32,
}

impl ScaleDecision {
    /// Decision for a pass with nothing to scale on.
    pub fn inactive() -> Self {
        Self::default()
    }
}

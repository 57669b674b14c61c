//! Persistent-lag tracker.
//!
//! Remembers each partition's lag between passes so a consumer that is
//! stuck can be told apart from one that is catching up. Entries are keyed
//! by consumer group and partition. The tracker is a plain owned value: each
//! scaler holds its own and nothing else mutates it.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use lagscale_core::TopicPartition;

/// Consecutive non-decreasing observations after which a partition is
/// excluded. The first observation is only a baseline, so exclusion starts
/// on the third pass.
pub const STUCK_PASSES_BEFORE_EXCLUSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedLag {
    pub last_observed_lag: i64,
    /// Epoch seconds of the first pass in the current non-decreasing run.
    pub first_stuck_at: Option<u64>,
    /// Length of the current non-decreasing run.
    pub stuck_passes: u32,
}

impl TrackedLag {
    pub fn is_stuck(&self) -> bool {
        self.stuck_passes >= STUCK_PASSES_BEFORE_EXCLUSION
    }
}

#[derive(Debug, Clone, Default)]
pub struct PersistentLagTracker {
    groups: BTreeMap<String, BTreeMap<TopicPartition, TrackedLag>>,
}

impl PersistentLagTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record this pass's `lag` and report whether the partition is now
    /// excluded as stuck.
    pub fn observe(&mut self, group: &str, tp: &TopicPartition, lag: i64, now: u64) -> bool {
        if lag <= 0 {
            self.remove(group, tp);
            return false;
        }

        let entries = self.groups.entry(group.to_string()).or_default();
        let Some(entry) = entries.get_mut(tp) else {
            entries.insert(
                tp.clone(),
                TrackedLag {
                    last_observed_lag: lag,
                    first_stuck_at: None,
                    stuck_passes: 0,
                },
            );
            return false;
        };

        if lag < entry.last_observed_lag {
            entry.first_stuck_at = None;
            entry.stuck_passes = 0;
        } else {
            entry.first_stuck_at.get_or_insert(now);
            entry.stuck_passes = entry.stuck_passes.saturating_add(1);
        }
        entry.last_observed_lag = lag;

        if entry.is_stuck() {
            debug!(
                group,
                partition = %tp,
                lag,
                stuck_since = entry.first_stuck_at,
                passes = entry.stuck_passes,
                "partition lag is not decreasing, excluding"
            );
        }
        entry.is_stuck()
    }

    /// Drop entries of `group` for partitions no longer resolved.
    pub fn retain_partitions(&mut self, group: &str, resolved: &BTreeSet<&TopicPartition>) {
        if let Some(entries) = self.groups.get_mut(group) {
            entries.retain(|tp, _| resolved.contains(&tp));
            if entries.is_empty() {
                self.groups.remove(group);
            }
        }
    }

    pub fn get(&self, group: &str, tp: &TopicPartition) -> Option<&TrackedLag> {
        self.groups.get(group)?.get(tp)
    }

    /// Entries tracked for `group`, in partition order.
    pub fn entries(&self, group: &str) -> impl Iterator<Item = (&TopicPartition, &TrackedLag)> {
        self.groups.get(group).into_iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.groups.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    fn remove(&mut self, group: &str, tp: &TopicPartition) {
        if let Some(entries) = self.groups.get_mut(group) {
            entries.remove(tp);
            if entries.is_empty() {
                self.groups.remove(group);
            }
        }
    }
}

//! In-process broker.
//!
//! Behaves like a small Kafka cluster from the engine's point of view:
//! topics with partitions, producers advancing log end offsets, consumer
//! groups committing and subscribing, retention moving log start offsets.
//! Lookups can be delayed or made to fail, which is how the engine's retry
//! and cancellation paths are exercised.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::debug;

use lagscale_core::TopicPartition;

use crate::client::{BrokerClient, BrokerFuture, Lookup};
use crate::error::{BrokerError, BrokerResult};
use crate::snapshot::{BrokerSnapshot, PartitionWatermarks};

#[derive(Debug, Default)]
struct BrokerState {
    log: BrokerSnapshot,
    faults: HashMap<Lookup, VecDeque<BrokerError>>,
    calls: HashMap<Lookup, usize>,
    latency: Duration,
}

/// Shared, cloneable in-memory broker.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current log state.
    pub fn snapshot(&self) -> BrokerSnapshot {
        self.lock().log.clone()
    }

    /// Create `topic` with `partitions` empty partitions. Existing topics are left alone.
    pub fn create_topic(&self, topic: &str, partitions: usize) {
        self.lock()
            .log
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![PartitionWatermarks::default(); partitions]);
    }

    /// Append `count` messages to a partition.
    pub fn produce(&self, topic: &str, partition: i32, count: i64) -> BrokerResult<i64> {
        let mut state = self.lock();
        let marks = state.log.watermarks_mut(&TopicPartition::new(topic, partition))?;
        marks.latest += count.max(0);
        Ok(marks.latest)
    }

    /// Record a commit for `group`.
    pub fn commit(&self, group: &str, topic: &str, partition: i32, offset: i64) {
        self.lock()
            .log
            .groups
            .entry(group.to_string())
            .or_default()
            .committed
            .entry(topic.to_string())
            .or_default()
            .insert(partition, offset);
    }

    /// Commit every partition of `topic` at its log end, as a consumer
    /// draining the topic would.
    pub fn commit_to_latest(&self, group: &str, topic: &str) -> BrokerResult<()> {
        let mut state = self.lock();
        let latest: BTreeMap<i32, i64> = state
            .log
            .topics
            .get(topic)
            .ok_or_else(|| BrokerError::UnknownTopicOrPartition(topic.to_string()))?
            .iter()
            .enumerate()
            .filter_map(|(i, marks)| Some((i32::try_from(i).ok()?, marks.latest)))
            .collect();
        state
            .log
            .groups
            .entry(group.to_string())
            .or_default()
            .committed
            .insert(topic.to_string(), latest);
        Ok(())
    }

    pub fn subscribe(&self, group: &str, topic: &str) {
        self.lock()
            .log
            .groups
            .entry(group.to_string())
            .or_default()
            .subscriptions
            .insert(topic.to_string());
    }

    /// Drop every live subscription of `group`; commits are kept.
    pub fn unsubscribe_all(&self, group: &str) {
        if let Some(g) = self.lock().log.groups.get_mut(group) {
            g.subscriptions.clear();
        }
    }

    /// Move a partition's log start forward, as retention would.
    pub fn truncate(&self, topic: &str, partition: i32, earliest: i64) -> BrokerResult<()> {
        let mut state = self.lock();
        let marks = state.log.watermarks_mut(&TopicPartition::new(topic, partition))?;
        marks.earliest = earliest.max(marks.earliest).min(marks.latest);
        Ok(())
    }

    /// Make the next `times` lookups of kind `lookup` fail with `error`.
    pub fn fail_next(&self, lookup: Lookup, error: BrokerError, times: usize) {
        let mut state = self.lock();
        let queue = state.faults.entry(lookup).or_default();
        queue.extend(std::iter::repeat_n(error, times));
    }

    /// Delay every lookup by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Number of lookups of kind `lookup` served so far, failed ones included.
    pub fn calls(&self, lookup: Lookup) -> usize {
        self.lock().calls.get(&lookup).copied().unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn enter(&self, lookup: Lookup) -> BrokerResult<()> {
        let (latency, fault) = {
            let mut state = self.lock();
            *state.calls.entry(lookup).or_default() += 1;
            let fault = state.faults.get_mut(&lookup).and_then(VecDeque::pop_front);
            (state.latency, fault)
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        match fault {
            Some(error) => {
                debug!(%lookup, %error, "injected broker fault");
                Err(error)
            }
            None => Ok(()),
        }
    }
}

impl BrokerClient for MemoryBroker {
    fn topic_partitions<'a>(
        &'a self,
        topics: &'a [String],
    ) -> BrokerFuture<'a, BTreeMap<String, Vec<i32>>> {
        Box::pin(async move {
            self.enter(Lookup::Metadata).await?;
            Ok(self.lock().log.partitions(topics))
        })
    }

    fn subscribed_topics<'a>(&'a self, group: &'a str) -> BrokerFuture<'a, Vec<String>> {
        Box::pin(async move {
            self.enter(Lookup::Subscription).await?;
            Ok(self.lock().log.subscriptions(group))
        })
    }

    fn latest_offset<'a>(&'a self, tp: &'a TopicPartition) -> BrokerFuture<'a, i64> {
        Box::pin(async move {
            self.enter(Lookup::Latest).await?;
            Ok(self.lock().log.watermarks(tp)?.latest)
        })
    }

    fn earliest_offset<'a>(&'a self, tp: &'a TopicPartition) -> BrokerFuture<'a, i64> {
        Box::pin(async move {
            self.enter(Lookup::Earliest).await?;
            Ok(self.lock().log.watermarks(tp)?.earliest)
        })
    }

    fn committed_offset<'a>(
        &'a self,
        group: &'a str,
        tp: &'a TopicPartition,
    ) -> BrokerFuture<'a, Option<i64>> {
        Box::pin(async move {
            self.enter(Lookup::Committed).await?;
            Ok(self.lock().log.committed(group, tp))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn produce_and_commit_move_offsets() {
        let broker = MemoryBroker::new();
        broker.create_topic("orders", 3);
        broker.produce("orders", 1, 5).unwrap();
        broker.commit("workers", "orders", 1, 2);

        let tp = TopicPartition::new("orders", 1);
        assert_eq!(broker.latest_offset(&tp).await.unwrap(), 5);
        assert_eq!(broker.earliest_offset(&tp).await.unwrap(), 0);
        assert_eq!(broker.committed_offset("workers", &tp).await.unwrap(), Some(2));
        assert_eq!(
            broker
                .committed_offset("workers", &TopicPartition::new("orders", 0))
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn metadata_omits_unknown_topics() {
        let broker = MemoryBroker::new();
        broker.create_topic("orders", 2);
        let parts = broker
            .topic_partitions(&["orders".to_string(), "ghost".to_string()])
            .await
            .unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts["orders"], vec![0, 1]);
    }

    #[tokio::test]
    async fn subscriptions_follow_group_membership() {
        let broker = MemoryBroker::new();
        broker.subscribe("workers", "b");
        broker.subscribe("workers", "a");
        assert_eq!(
            broker.subscribed_topics("workers").await.unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
        broker.unsubscribe_all("workers");
        assert!(broker.subscribed_topics("workers").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn commit_to_latest_drains_every_partition() {
        let broker = MemoryBroker::new();
        broker.create_topic("orders", 2);
        broker.produce("orders", 0, 3).unwrap();
        broker.produce("orders", 1, 7).unwrap();
        broker.commit_to_latest("workers", "orders").unwrap();

        let snap = broker.snapshot();
        assert_eq!(snap.committed("workers", &TopicPartition::new("orders", 0)), Some(3));
        assert_eq!(snap.committed("workers", &TopicPartition::new("orders", 1)), Some(7));
    }

    #[test]
    fn truncate_never_passes_log_end() {
        let broker = MemoryBroker::new();
        broker.create_topic("orders", 1);
        broker.produce("orders", 0, 4).unwrap();
        broker.truncate("orders", 0, 10).unwrap();
        let marks = broker
            .snapshot()
            .watermarks(&TopicPartition::new("orders", 0))
            .unwrap();
        assert_eq!(marks.earliest, 4);
    }

    #[test]
    fn produce_to_unknown_partition_fails() {
        let broker = MemoryBroker::new();
        broker.create_topic("orders", 1);
        assert!(broker.produce("orders", 3, 1).is_err());
        assert!(broker.produce("ghost", 0, 1).is_err());
    }

    #[tokio::test]
    async fn injected_faults_are_consumed_in_order() {
        let broker = MemoryBroker::new();
        broker.create_topic("orders", 1);
        broker.fail_next(Lookup::Latest, BrokerError::Timeout("slow".into()), 2);

        let tp = TopicPartition::new("orders", 0);
        assert!(broker.latest_offset(&tp).await.is_err());
        assert!(broker.latest_offset(&tp).await.is_err());
        assert_eq!(broker.latest_offset(&tp).await.unwrap(), 0);
        assert_eq!(broker.calls(Lookup::Latest), 3);
        assert_eq!(broker.calls(Lookup::Earliest), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn latency_delays_lookups() {
        let broker = MemoryBroker::new();
        broker.create_topic("orders", 1);
        broker.set_latency(Duration::from_secs(5));

        let tp = TopicPartition::new("orders", 0);
        let started = tokio::time::Instant::now();
        broker.latest_offset(&tp).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(5));
    }
}

//! Point-in-time broker state and the file-backed broker that serves it.
//!
//! A snapshot is plain JSON:
//!
//! ```json
//! {
//!   "topics": {
//!     "orders": [ { "earliest": 0, "latest": 12 }, { "earliest": 4, "latest": 9 } ]
//!   },
//!   "groups": {
//!     "orders-workers": {
//!       "subscriptions": ["orders"],
//!       "committed": { "orders": { "0": 10, "1": 9 } }
//!     }
//!   }
//! }
//! ```
//!
//! Partition ids are positions in each topic's array.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::debug;

use lagscale_core::TopicPartition;

use crate::client::{BrokerClient, BrokerFuture};
use crate::error::{BrokerError, BrokerResult};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerSnapshot {
    #[serde(default)]
    pub topics: BTreeMap<String, Vec<PartitionWatermarks>>,
    #[serde(default)]
    pub groups: BTreeMap<String, GroupSnapshot>,
}

/// Log start and end offsets of one partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionWatermarks {
    #[serde(default)]
    pub earliest: i64,
    pub latest: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSnapshot {
    /// Topics the group's live members are assigned.
    #[serde(default)]
    pub subscriptions: BTreeSet<String>,
    /// topic → partition → committed offset.
    #[serde(default)]
    pub committed: BTreeMap<String, BTreeMap<i32, i64>>,
}

impl BrokerSnapshot {
    pub fn from_json(content: &str) -> BrokerResult<Self> {
        serde_json::from_str(content).map_err(|e| BrokerError::Snapshot(e.to_string()))
    }

    pub fn to_json_pretty(&self) -> BrokerResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| BrokerError::Snapshot(e.to_string()))
    }

    /// Partition ids of each known topic in `topics`.
    pub fn partitions(&self, topics: &[String]) -> BTreeMap<String, Vec<i32>> {
        topics
            .iter()
            .filter_map(|topic| {
                let count = self.topics.get(topic)?.len();
                let ids = (0..count).filter_map(|i| i32::try_from(i).ok()).collect();
                Some((topic.clone(), ids))
            })
            .collect()
    }

    pub fn subscriptions(&self, group: &str) -> Vec<String> {
        self.groups
            .get(group)
            .map(|g| g.subscriptions.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn watermarks(&self, tp: &TopicPartition) -> BrokerResult<PartitionWatermarks> {
        usize::try_from(tp.partition)
            .ok()
            .and_then(|index| self.topics.get(&tp.topic)?.get(index))
            .copied()
            .ok_or_else(|| BrokerError::UnknownTopicOrPartition(tp.to_string()))
    }

    pub fn committed(&self, group: &str, tp: &TopicPartition) -> Option<i64> {
        self.groups
            .get(group)?
            .committed
            .get(&tp.topic)?
            .get(&tp.partition)
            .copied()
    }

    pub(crate) fn watermarks_mut(
        &mut self,
        tp: &TopicPartition,
    ) -> BrokerResult<&mut PartitionWatermarks> {
        usize::try_from(tp.partition)
            .ok()
            .and_then(|index| self.topics.get_mut(&tp.topic)?.get_mut(index))
            .ok_or_else(|| BrokerError::UnknownTopicOrPartition(tp.to_string()))
    }
}

/// Broker backed by a snapshot file.
///
/// The file is re-read by the metadata and subscription lookups that open
/// every pass; offset lookups answer from the copy loaded then, so one pass
/// never mixes two versions of the file. Rewriting the file between passes
/// changes what the next pass sees.
#[derive(Debug, Clone)]
pub struct SnapshotBroker {
    path: PathBuf,
    loaded: Arc<Mutex<Option<Arc<BrokerSnapshot>>>>,
}

impl SnapshotBroker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            loaded: Arc::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn reload(&self) -> BrokerResult<Arc<BrokerSnapshot>> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            BrokerError::Connection(format!("reading {}: {e}", self.path.display()))
        })?;
        let snapshot = Arc::new(BrokerSnapshot::from_json(&content)?);
        debug!(path = %self.path.display(), topics = snapshot.topics.len(), "snapshot loaded");
        *self.lock() = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    async fn current(&self) -> BrokerResult<Arc<BrokerSnapshot>> {
        let loaded = self.lock().clone();
        match loaded {
            Some(snapshot) => Ok(snapshot),
            None => self.reload().await,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<BrokerSnapshot>>> {
        self.loaded.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BrokerClient for SnapshotBroker {
    fn topic_partitions<'a>(
        &'a self,
        topics: &'a [String],
    ) -> BrokerFuture<'a, BTreeMap<String, Vec<i32>>> {
        Box::pin(async move { Ok(self.reload().await?.partitions(topics)) })
    }

    fn subscribed_topics<'a>(&'a self, group: &'a str) -> BrokerFuture<'a, Vec<String>> {
        Box::pin(async move { Ok(self.reload().await?.subscriptions(group)) })
    }

    fn latest_offset<'a>(&'a self, tp: &'a TopicPartition) -> BrokerFuture<'a, i64> {
        Box::pin(async move { Ok(self.current().await?.watermarks(tp)?.latest) })
    }

    fn earliest_offset<'a>(&'a self, tp: &'a TopicPartition) -> BrokerFuture<'a, i64> {
        Box::pin(async move { Ok(self.current().await?.watermarks(tp)?.earliest) })
    }

    fn committed_offset<'a>(
        &'a self,
        group: &'a str,
        tp: &'a TopicPartition,
    ) -> BrokerFuture<'a, Option<i64>> {
        Box::pin(async move { Ok(self.current().await?.committed(group, tp)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "topics": {
            "orders": [ { "earliest": 0, "latest": 12 }, { "earliest": 4, "latest": 9 } ]
        },
        "groups": {
            "workers": {
                "subscriptions": ["orders"],
                "committed": { "orders": { "0": 10 } }
            }
        }
    }"#;

    #[test]
    fn parse_and_query() {
        let snap = BrokerSnapshot::from_json(SAMPLE).unwrap();
        let parts = snap.partitions(&["orders".to_string(), "missing".to_string()]);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts["orders"], vec![0, 1]);

        let tp1 = TopicPartition::new("orders", 1);
        assert_eq!(
            snap.watermarks(&tp1).unwrap(),
            PartitionWatermarks {
                earliest: 4,
                latest: 9
            }
        );
        assert_eq!(snap.committed("workers", &TopicPartition::new("orders", 0)), Some(10));
        assert_eq!(snap.committed("workers", &tp1), None);
        assert_eq!(snap.committed("nobody", &tp1), None);
        assert_eq!(snap.subscriptions("workers"), vec!["orders".to_string()]);
        assert!(snap.subscriptions("nobody").is_empty());
    }

    #[test]
    fn unknown_partition_is_an_error() {
        let snap = BrokerSnapshot::from_json(SAMPLE).unwrap();
        assert!(matches!(
            snap.watermarks(&TopicPartition::new("orders", 7)),
            Err(BrokerError::UnknownTopicOrPartition(_))
        ));
        assert!(snap.watermarks(&TopicPartition::new("orders", -1)).is_err());
    }

    #[test]
    fn malformed_json_is_a_snapshot_error() {
        assert!(matches!(
            BrokerSnapshot::from_json("{ not json"),
            Err(BrokerError::Snapshot(_))
        ));
    }

    #[tokio::test]
    async fn snapshot_broker_reloads_once_per_pass() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let broker = SnapshotBroker::new(file.path());
        let tp = TopicPartition::new("orders", 0);
        let topics = vec!["orders".to_string()];

        broker.topic_partitions(&topics).await.unwrap();
        assert_eq!(broker.latest_offset(&tp).await.unwrap(), 12);

        let mut snap = BrokerSnapshot::from_json(SAMPLE).unwrap();
        snap.topics.get_mut("orders").unwrap()[0].latest = 20;
        std::fs::write(broker.path(), snap.to_json_pretty().unwrap()).unwrap();

        // Same pass: offsets still come from the copy loaded with the metadata.
        assert_eq!(broker.latest_offset(&tp).await.unwrap(), 12);
        assert_eq!(broker.committed_offset("workers", &tp).await.unwrap(), Some(10));

        broker.topic_partitions(&topics).await.unwrap();
        assert_eq!(broker.latest_offset(&tp).await.unwrap(), 20);
    }

    #[tokio::test]
    async fn offset_lookup_loads_when_nothing_is_cached() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let broker = SnapshotBroker::new(file.path());
        let tp = TopicPartition::new("orders", 1);
        assert_eq!(broker.earliest_offset(&tp).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn missing_file_is_a_connection_error() {
        let broker = SnapshotBroker::new("/nonexistent/snapshot.json");
        let err = broker.subscribed_topics("g").await.unwrap_err();
        assert!(err.is_transient());
    }
}

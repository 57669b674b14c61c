//! librdkafka-backed broker client.
//!
//! librdkafka's metadata, watermark and group calls block, so each lookup
//! runs on the blocking pool. Committed offsets are read through a consumer
//! whose `group.id` is the group being measured; those consumers never
//! subscribe or commit and are cached per group.

mod protocol;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::{Offset, TopicPartitionList};
use tracing::{debug, warn};

use lagscale_core::TopicPartition;

use crate::client::{BrokerClient, BrokerFuture};
use crate::error::{BrokerError, BrokerResult};

/// `group.id` of the consumer used for metadata and watermark lookups.
const METADATA_GROUP: &str = "lagscale-metadata";

pub struct KafkaBroker {
    bootstrap_servers: String,
    timeout: Duration,
    metadata: Arc<BaseConsumer>,
    groups: Mutex<HashMap<String, Arc<BaseConsumer>>>,
}

impl KafkaBroker {
    pub fn new(bootstrap_servers: &[String], timeout: Duration) -> BrokerResult<Self> {
        let bootstrap_servers = bootstrap_servers.join(",");
        let metadata = Arc::new(create_consumer(&bootstrap_servers, METADATA_GROUP)?);
        Ok(Self {
            bootstrap_servers,
            timeout,
            metadata,
            groups: Mutex::new(HashMap::new()),
        })
    }

    fn group_consumer(&self, group: &str) -> BrokerResult<Arc<BaseConsumer>> {
        let mut groups = self.groups.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(consumer) = groups.get(group) {
            return Ok(Arc::clone(consumer));
        }
        let consumer = Arc::new(create_consumer(&self.bootstrap_servers, group)?);
        groups.insert(group.to_string(), Arc::clone(&consumer));
        debug!(group, "created group consumer");
        Ok(consumer)
    }
}

impl std::fmt::Debug for KafkaBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaBroker")
            .field("bootstrap_servers", &self.bootstrap_servers)
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn create_consumer(bootstrap_servers: &str, group: &str) -> BrokerResult<BaseConsumer> {
    ClientConfig::new()
        .set("bootstrap.servers", bootstrap_servers)
        .set("group.id", group)
        .set("enable.auto.commit", "false")
        .set("enable.auto.offset.store", "false")
        .create()
        .map_err(|e| BrokerError::Connection(format!("creating consumer for {group}: {e}")))
}

/// Run a blocking librdkafka call off the async runtime.
async fn blocking<T, F>(f: F) -> BrokerResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> BrokerResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BrokerError::Connection(format!("blocking lookup task failed: {e}")))?
}

fn map_kafka_error(context: &str, err: KafkaError) -> BrokerError {
    let detail = format!("{context}: {err}");
    match err.rdkafka_error_code() {
        Some(
            RDKafkaErrorCode::OperationTimedOut
            | RDKafkaErrorCode::RequestTimedOut
            | RDKafkaErrorCode::MessageTimedOut,
        ) => BrokerError::Timeout(detail),
        Some(
            RDKafkaErrorCode::UnknownTopicOrPartition
            | RDKafkaErrorCode::UnknownTopic
            | RDKafkaErrorCode::UnknownPartition,
        ) => BrokerError::UnknownTopicOrPartition(detail),
        Some(
            RDKafkaErrorCode::SaslAuthenticationFailed
            | RDKafkaErrorCode::Authentication
            | RDKafkaErrorCode::TopicAuthorizationFailed
            | RDKafkaErrorCode::GroupAuthorizationFailed
            | RDKafkaErrorCode::ClusterAuthorizationFailed,
        ) => BrokerError::Authentication(detail),
        _ => BrokerError::Connection(detail),
    }
}

fn leader_error(tp: &TopicPartition, err: KafkaError) -> BrokerError {
    match err.rdkafka_error_code() {
        Some(RDKafkaErrorCode::LeaderNotAvailable | RDKafkaErrorCode::NotLeaderForPartition) => {
            BrokerError::LeaderNotAvailable {
                topic: tp.topic.clone(),
                partition: tp.partition,
            }
        }
        _ => map_kafka_error(&format!("watermarks of {tp}"), err),
    }
}

fn watermarks(
    consumer: &BaseConsumer,
    tp: &TopicPartition,
    timeout: Duration,
) -> BrokerResult<(i64, i64)> {
    consumer
        .fetch_watermarks(&tp.topic, tp.partition, timeout)
        .map_err(|e| leader_error(tp, e))
}

impl BrokerClient for KafkaBroker {
    fn topic_partitions<'a>(
        &'a self,
        topics: &'a [String],
    ) -> BrokerFuture<'a, BTreeMap<String, Vec<i32>>> {
        let consumer = Arc::clone(&self.metadata);
        let timeout = self.timeout;
        let topics = topics.to_vec();
        Box::pin(blocking(move || {
            let mut out = BTreeMap::new();
            for topic in &topics {
                let metadata = consumer
                    .fetch_metadata(Some(topic), timeout)
                    .map_err(|e| map_kafka_error(&format!("metadata of {topic}"), e))?;
                for entry in metadata.topics() {
                    if let Some(code) = entry.error() {
                        debug!(topic = entry.name(), ?code, "topic metadata carries an error");
                        continue;
                    }
                    let ids: Vec<i32> = entry.partitions().iter().map(|p| p.id()).collect();
                    out.insert(entry.name().to_string(), ids);
                }
            }
            Ok(out)
        }))
    }

    fn subscribed_topics<'a>(&'a self, group: &'a str) -> BrokerFuture<'a, Vec<String>> {
        let consumer = Arc::clone(&self.metadata);
        let timeout = self.timeout;
        let group = group.to_string();
        Box::pin(blocking(move || {
            let list = consumer
                .fetch_group_list(Some(&group), timeout)
                .map_err(|e| map_kafka_error(&format!("group list of {group}"), e))?;

            let mut topics = BTreeSet::new();
            for info in list.groups().iter().filter(|g| g.name() == group) {
                if info.protocol_type() != "consumer" {
                    continue;
                }
                for member in info.members() {
                    let assigned = match member.assignment() {
                        Some(blob) => protocol::assignment_topics(blob)?,
                        None => BTreeSet::new(),
                    };
                    if !assigned.is_empty() {
                        topics.extend(assigned);
                    } else if let Some(blob) = member.metadata() {
                        // Mid-rebalance members have no assignment yet.
                        topics.extend(protocol::subscription_topics(blob)?);
                    }
                }
            }
            Ok(topics.into_iter().collect())
        }))
    }

    fn latest_offset<'a>(&'a self, tp: &'a TopicPartition) -> BrokerFuture<'a, i64> {
        let consumer = Arc::clone(&self.metadata);
        let timeout = self.timeout;
        let tp = tp.clone();
        Box::pin(blocking(move || Ok(watermarks(&consumer, &tp, timeout)?.1)))
    }

    fn earliest_offset<'a>(&'a self, tp: &'a TopicPartition) -> BrokerFuture<'a, i64> {
        let consumer = Arc::clone(&self.metadata);
        let timeout = self.timeout;
        let tp = tp.clone();
        Box::pin(blocking(move || Ok(watermarks(&consumer, &tp, timeout)?.0)))
    }

    fn committed_offset<'a>(
        &'a self,
        group: &'a str,
        tp: &'a TopicPartition,
    ) -> BrokerFuture<'a, Option<i64>> {
        let timeout = self.timeout;
        let tp = tp.clone();
        let consumer = self.group_consumer(group);
        Box::pin(async move {
            let consumer = consumer?;
            blocking(move || {
                let mut tpl = TopicPartitionList::new();
                tpl.add_partition(&tp.topic, tp.partition);
                let committed = consumer
                    .committed_offsets(tpl, timeout)
                    .map_err(|e| map_kafka_error(&format!("committed offset of {tp}"), e))?;
                let offset = committed
                    .find_partition(&tp.topic, tp.partition)
                    .map(|elem| elem.offset());
                match offset {
                    Some(Offset::Offset(n)) => Ok(Some(n)),
                    Some(Offset::Invalid) | None => Ok(None),
                    Some(other) => {
                        warn!(%tp, ?other, "unexpected committed offset form");
                        Ok(None)
                    }
                }
            })
            .await
        })
    }
}

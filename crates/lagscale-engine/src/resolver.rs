//! Partition Resolver — policy plus broker metadata to the set of
//! partitions a pass evaluates.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use lagscale_broker::{BrokerClient, BrokerError, BrokerResult, Lookup};
use lagscale_core::{ScalerPolicy, TopicPartition};

use crate::error::ScalerResult;
use crate::retry::{EvaluationOptions, with_retry};

/// Resolve the partitions to evaluate, sorted by topic then partition.
///
/// With no explicit topics the group's current subscription is used. A
/// group with no live subscription resolves to an empty set.
pub async fn resolve_partitions(
    broker: &dyn BrokerClient,
    policy: &ScalerPolicy,
    options: &EvaluationOptions,
) -> ScalerResult<Vec<TopicPartition>> {
    let group = policy.consumer_group();

    let topics: Vec<String> = if policy.topics().is_empty() {
        with_retry(options, Lookup::Subscription, group, move || {
            broker.subscribed_topics(group)
        })
        .await?
    } else {
        policy.topics().iter().cloned().collect()
    };

    if topics.is_empty() {
        debug!(group, "consumer group has no subscribed topics");
        return Ok(Vec::new());
    }

    let requested = topics.as_slice();
    let metadata = with_retry(options, Lookup::Metadata, group, move || {
        broker.topic_partitions(requested)
    })
    .await?;

    let partitions = expand(policy, &topics, &metadata)?;
    debug!(group, topics = topics.len(), partitions = partitions.len(), "partitions resolved");
    Ok(partitions)
}

/// Expand `topics` into partitions using broker `metadata`.
///
/// A requested topic missing from the metadata is an inconsistency, not an
/// empty topic: skipping it would under-count lag.
pub fn expand(
    policy: &ScalerPolicy,
    topics: &[String],
    metadata: &BTreeMap<String, Vec<i32>>,
) -> BrokerResult<Vec<TopicPartition>> {
    let mut resolved = BTreeSet::new();
    for topic in topics {
        let ids = metadata.get(topic).ok_or_else(|| {
            BrokerError::MetadataInconsistent(format!("topic {topic} missing from broker metadata"))
        })?;
        resolved.extend(
            ids.iter()
                .copied()
                .filter(|id| policy.allows_partition(*id))
                .map(|id| TopicPartition::new(topic.clone(), id)),
        );
    }
    Ok(resolved.into_iter().collect())
}

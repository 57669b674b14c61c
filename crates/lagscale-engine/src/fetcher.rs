//! Offset Fetcher — three lookups per partition, all partitions concurrently.
//!
//! The pass is all-or-nothing: the first partition to fail aborts every
//! other in-flight lookup and the error is returned. A partial result would
//! under-count lag.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, warn};

use lagscale_broker::{BrokerClient, BrokerError, BrokerResult, Lookup};
use lagscale_core::{PartitionOffsets, TopicPartition};

use crate::error::ScalerResult;
use crate::retry::{EvaluationOptions, with_retry};

#[derive(Clone)]
pub struct OffsetFetcher {
    broker: Arc<dyn BrokerClient>,
    options: EvaluationOptions,
}

impl OffsetFetcher {
    pub fn new(broker: Arc<dyn BrokerClient>, options: EvaluationOptions) -> Self {
        Self { broker, options }
    }

    pub fn options(&self) -> &EvaluationOptions {
        &self.options
    }

    /// Fetch offsets for every partition in `partitions`, preserving order.
    pub async fn fetch(
        &self,
        group: &str,
        partitions: &[TopicPartition],
    ) -> ScalerResult<Vec<PartitionOffsets>> {
        let mut tasks = JoinSet::new();
        for (index, tp) in partitions.iter().cloned().enumerate() {
            let broker = Arc::clone(&self.broker);
            let options = self.options.clone();
            let group = group.to_string();
            tasks.spawn(async move {
                let result = fetch_partition(broker.as_ref(), &options, &group, tp).await;
                (index, result)
            });
        }

        let mut slots: Vec<Option<PartitionOffsets>> = vec![None; partitions.len()];
        while let Some(joined) = tasks.join_next().await {
            let (index, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    tasks.abort_all();
                    return Err(BrokerError::Connection(format!("offset lookup task failed: {e}")).into());
                }
            };
            match result {
                Ok(offsets) => slots[index] = Some(offsets),
                Err(error) => {
                    tasks.abort_all();
                    warn!(group, partition = %partitions[index], %error, "offset lookup failed, abandoning pass");
                    return Err(error.into());
                }
            }
        }

        slots
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| BrokerError::Connection("offset lookup produced no result".to_string()).into())
    }
}

async fn fetch_partition(
    broker: &dyn BrokerClient,
    options: &EvaluationOptions,
    group: &str,
    tp: TopicPartition,
) -> BrokerResult<PartitionOffsets> {
    let label = tp.to_string();
    let target = tp.clone();
    let tp_ref = &target;

    let (latest, earliest, committed) = tokio::try_join!(
        with_retry(options, Lookup::Latest, &label, move || broker.latest_offset(tp_ref)),
        with_retry(options, Lookup::Earliest, &label, move || broker.earliest_offset(tp_ref)),
        with_retry(options, Lookup::Committed, &label, move || {
            broker.committed_offset(group, tp_ref)
        }),
    )?;

    let earliest = if earliest > latest {
        // Retention raced the log-end lookup.
        debug!(partition = %tp, earliest, latest, "log start ahead of log end, clamping");
        latest
    } else {
        earliest
    };

    Ok(PartitionOffsets {
        topic_partition: tp,
        latest_offset: latest,
        earliest_offset: earliest,
        committed_offset: committed,
    })
}

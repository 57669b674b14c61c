//! The broker client trait.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use lagscale_core::TopicPartition;

use crate::error::BrokerResult;

/// Boxed future returned by every broker lookup.
pub type BrokerFuture<'a, T> = Pin<Box<dyn Future<Output = BrokerResult<T>> + Send + 'a>>;

/// The kinds of lookup a broker serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Lookup {
    Metadata,
    Subscription,
    Latest,
    Earliest,
    Committed,
}

impl fmt::Display for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Lookup::Metadata => "metadata",
            Lookup::Subscription => "subscription",
            Lookup::Latest => "latest_offset",
            Lookup::Earliest => "earliest_offset",
            Lookup::Committed => "committed_offset",
        };
        f.write_str(label)
    }
}

/// Read-only view of a broker, shared by every pass of a scaler.
///
/// Every method is independent and may be called concurrently.
pub trait BrokerClient: Send + Sync {
    /// Partition ids for each requested topic. Topics the broker does not
    /// know are left out of the map.
    fn topic_partitions<'a>(
        &'a self,
        topics: &'a [String],
    ) -> BrokerFuture<'a, BTreeMap<String, Vec<i32>>>;

    /// Topics `group` is currently subscribed to. Empty when the group has
    /// no live members.
    fn subscribed_topics<'a>(&'a self, group: &'a str) -> BrokerFuture<'a, Vec<String>>;

    /// Log end offset of `tp`.
    fn latest_offset<'a>(&'a self, tp: &'a TopicPartition) -> BrokerFuture<'a, i64>;

    /// Log start offset of `tp`.
    fn earliest_offset<'a>(&'a self, tp: &'a TopicPartition) -> BrokerFuture<'a, i64>;

    /// Offset `group` last committed on `tp`, or `None` if it never has.
    fn committed_offset<'a>(
        &'a self,
        group: &'a str,
        tp: &'a TopicPartition,
    ) -> BrokerFuture<'a, Option<i64>>;
}

//! Scaler policy — the validated form of a trigger's metadata.
//!
//! Trigger metadata arrives as a flat string map with camelCase keys:
//!
//! ```text
//! topic                       "orders,payments"   (empty = follow the group's subscription)
//! bootstrapServers            "kafka-0:9092,kafka-1:9092"
//! consumerGroup               "orders-workers"
//! lagThreshold                "10"
//! activationLagThreshold      "0"
//! offsetResetPolicy           "latest" | "earliest"
//! scaleToZeroOnInvalidOffset  "false"
//! excludePersistentLag        "false"
//! limitToPartitionsWithLag    "false"
//! partitionLimitation         "0,2,5-7"
//! ```
//!
//! Every check happens here, once, so a misconfigured policy never reaches
//! an evaluation pass.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

pub const DEFAULT_LAG_THRESHOLD: i64 = 10;
pub const DEFAULT_ACTIVATION_LAG_THRESHOLD: i64 = 0;

/// Widest `partitionLimitation` range accepted, in partitions.
pub const MAX_PARTITION_RANGE: i64 = 10_000;

/// Metadata keys recognised by [`ScalerPolicy::from_metadata`].
pub mod keys {
    pub const TOPIC: &str = "topic";
    pub const BOOTSTRAP_SERVERS: &str = "bootstrapServers";
    pub const CONSUMER_GROUP: &str = "consumerGroup";
    pub const LAG_THRESHOLD: &str = "lagThreshold";
    pub const ACTIVATION_LAG_THRESHOLD: &str = "activationLagThreshold";
    pub const OFFSET_RESET_POLICY: &str = "offsetResetPolicy";
    pub const SCALE_TO_ZERO_ON_INVALID_OFFSET: &str = "scaleToZeroOnInvalidOffset";
    pub const EXCLUDE_PERSISTENT_LAG: &str = "excludePersistentLag";
    pub const LIMIT_TO_PARTITIONS_WITH_LAG: &str = "limitToPartitionsWithLag";
    pub const PARTITION_LIMITATION: &str = "partitionLimitation";
}

/// Where the operator says a consumer without a valid commit would start reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetResetPolicy {
    Earliest,
    #[default]
    Latest,
}

impl FromStr for OffsetResetPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "earliest" => Ok(OffsetResetPolicy::Earliest),
            "latest" => Ok(OffsetResetPolicy::Latest),
            other => Err(ConfigError::InvalidValue {
                key: keys::OFFSET_RESET_POLICY,
                value: other.to_string(),
                reason: "expected \"earliest\" or \"latest\"".to_string(),
            }),
        }
    }
}

impl fmt::Display for OffsetResetPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OffsetResetPolicy::Earliest => write!(f, "earliest"),
            OffsetResetPolicy::Latest => write!(f, "latest"),
        }
    }
}

/// Validated scaling policy for one consumer group.
///
/// Only obtainable through [`PolicyBuilder::build`] or
/// [`ScalerPolicy::from_metadata`], both of which enforce every invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScalerPolicy {
    topics: BTreeSet<String>,
    bootstrap_servers: Vec<String>,
    consumer_group: String,
    lag_threshold: i64,
    activation_lag_threshold: i64,
    offset_reset_policy: OffsetResetPolicy,
    scale_to_zero_on_invalid_offset: bool,
    exclude_persistent_lag: bool,
    limit_to_partitions_with_lag: bool,
    partition_limitation: Option<BTreeSet<i32>>,
}

impl ScalerPolicy {
    /// Start building a policy for `consumer_group`.
    pub fn builder(consumer_group: impl Into<String>) -> PolicyBuilder {
        PolicyBuilder::new(consumer_group)
    }

    /// Build a policy from trigger metadata. Unknown keys are ignored.
    pub fn from_metadata(metadata: &BTreeMap<String, String>) -> ConfigResult<Self> {
        let get = |key: &'static str| {
            metadata
                .get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
        };

        let group = get(keys::CONSUMER_GROUP).ok_or(ConfigError::MissingKey(keys::CONSUMER_GROUP))?;
        let servers =
            get(keys::BOOTSTRAP_SERVERS).ok_or(ConfigError::MissingKey(keys::BOOTSTRAP_SERVERS))?;

        let mut builder = ScalerPolicy::builder(group).bootstrap_servers(split_list(servers));

        if let Some(topics) = get(keys::TOPIC) {
            builder = builder.topics(split_list(topics));
        }
        if let Some(v) = get(keys::LAG_THRESHOLD) {
            builder = builder.lag_threshold(parse_int(keys::LAG_THRESHOLD, v)?);
        }
        if let Some(v) = get(keys::ACTIVATION_LAG_THRESHOLD) {
            builder = builder.activation_lag_threshold(parse_int(keys::ACTIVATION_LAG_THRESHOLD, v)?);
        }
        if let Some(v) = get(keys::OFFSET_RESET_POLICY) {
            builder = builder.offset_reset_policy(v.parse()?);
        }
        if let Some(v) = get(keys::SCALE_TO_ZERO_ON_INVALID_OFFSET) {
            builder = builder
                .scale_to_zero_on_invalid_offset(parse_bool(keys::SCALE_TO_ZERO_ON_INVALID_OFFSET, v)?);
        }
        if let Some(v) = get(keys::EXCLUDE_PERSISTENT_LAG) {
            builder = builder.exclude_persistent_lag(parse_bool(keys::EXCLUDE_PERSISTENT_LAG, v)?);
        }
        if let Some(v) = get(keys::LIMIT_TO_PARTITIONS_WITH_LAG) {
            builder = builder
                .limit_to_partitions_with_lag(parse_bool(keys::LIMIT_TO_PARTITIONS_WITH_LAG, v)?);
        }
        if let Some(v) = get(keys::PARTITION_LIMITATION) {
            builder = builder.partition_limitation(parse_partition_limitation(v)?);
        }

        builder.build()
    }

    /// Explicit topics. Empty means "every topic the group subscribes to".
    pub fn topics(&self) -> &BTreeSet<String> {
        &self.topics
    }

    pub fn bootstrap_servers(&self) -> &[String] {
        &self.bootstrap_servers
    }

    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }

    /// Lag units per desired replica. Always positive.
    pub fn lag_threshold(&self) -> i64 {
        self.lag_threshold
    }

    /// Total lag must strictly exceed this to activate.
    pub fn activation_lag_threshold(&self) -> i64 {
        self.activation_lag_threshold
    }

    pub fn offset_reset_policy(&self) -> OffsetResetPolicy {
        self.offset_reset_policy
    }

    pub fn scale_to_zero_on_invalid_offset(&self) -> bool {
        self.scale_to_zero_on_invalid_offset
    }

    pub fn exclude_persistent_lag(&self) -> bool {
        self.exclude_persistent_lag
    }

    pub fn limit_to_partitions_with_lag(&self) -> bool {
        self.limit_to_partitions_with_lag
    }

    /// Partition ids to evaluate, when restricted.
    pub fn partition_limitation(&self) -> Option<&BTreeSet<i32>> {
        self.partition_limitation.as_ref()
    }

    /// Whether partition `id` is inside the configured limitation (if any).
    pub fn allows_partition(&self, id: i32) -> bool {
        self.partition_limitation
            .as_ref()
            .is_none_or(|allowed| allowed.contains(&id))
    }

    /// External metric name for this policy at trigger position `index`.
    pub fn metric_name(&self, index: usize) -> String {
        let subject = if self.topics.is_empty() {
            self.consumer_group.clone()
        } else {
            self.topics.iter().cloned().collect::<Vec<_>>().join(",")
        };
        format!("s{index}-kafka-{subject}")
    }
}

/// Builder for [`ScalerPolicy`]. Defaults mirror the metadata defaults.
#[derive(Debug, Clone)]
pub struct PolicyBuilder {
    topics: BTreeSet<String>,
    bootstrap_servers: Vec<String>,
    consumer_group: String,
    lag_threshold: i64,
    activation_lag_threshold: i64,
    offset_reset_policy: OffsetResetPolicy,
    scale_to_zero_on_invalid_offset: bool,
    exclude_persistent_lag: bool,
    limit_to_partitions_with_lag: bool,
    partition_limitation: Option<BTreeSet<i32>>,
}

impl PolicyBuilder {
    pub fn new(consumer_group: impl Into<String>) -> Self {
        Self {
            topics: BTreeSet::new(),
            bootstrap_servers: Vec::new(),
            consumer_group: consumer_group.into(),
            lag_threshold: DEFAULT_LAG_THRESHOLD,
            activation_lag_threshold: DEFAULT_ACTIVATION_LAG_THRESHOLD,
            offset_reset_policy: OffsetResetPolicy::default(),
            scale_to_zero_on_invalid_offset: false,
            exclude_persistent_lag: false,
            limit_to_partitions_with_lag: false,
            partition_limitation: None,
        }
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topics.insert(topic.into());
        self
    }

    pub fn topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics.extend(topics.into_iter().map(Into::into));
        self
    }

    pub fn bootstrap_servers<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bootstrap_servers = servers.into_iter().map(Into::into).collect();
        self
    }

    pub fn lag_threshold(mut self, threshold: i64) -> Self {
        self.lag_threshold = threshold;
        self
    }

    pub fn activation_lag_threshold(mut self, threshold: i64) -> Self {
        self.activation_lag_threshold = threshold;
        self
    }

    pub fn offset_reset_policy(mut self, policy: OffsetResetPolicy) -> Self {
        self.offset_reset_policy = policy;
        self
    }

    pub fn scale_to_zero_on_invalid_offset(mut self, enabled: bool) -> Self {
        self.scale_to_zero_on_invalid_offset = enabled;
        self
    }

    pub fn exclude_persistent_lag(mut self, enabled: bool) -> Self {
        self.exclude_persistent_lag = enabled;
        self
    }

    pub fn limit_to_partitions_with_lag(mut self, enabled: bool) -> Self {
        self.limit_to_partitions_with_lag = enabled;
        self
    }

    pub fn partition_limitation<I>(mut self, partitions: I) -> Self
    where
        I: IntoIterator<Item = i32>,
    {
        self.partition_limitation = Some(partitions.into_iter().collect());
        self
    }

    /// Validate and produce the policy.
    pub fn build(self) -> ConfigResult<ScalerPolicy> {
        let consumer_group = self.consumer_group.trim().to_string();
        if consumer_group.is_empty() {
            return Err(ConfigError::MissingKey(keys::CONSUMER_GROUP));
        }

        if self.lag_threshold <= 0 {
            return Err(ConfigError::InvalidValue {
                key: keys::LAG_THRESHOLD,
                value: self.lag_threshold.to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }

        if self.activation_lag_threshold < 0 {
            return Err(ConfigError::InvalidValue {
                key: keys::ACTIVATION_LAG_THRESHOLD,
                value: self.activation_lag_threshold.to_string(),
                reason: "must not be negative".to_string(),
            });
        }

        let topics: BTreeSet<String> = self
            .topics
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        if self.limit_to_partitions_with_lag && topics.is_empty() {
            return Err(ConfigError::Conflict(format!(
                "{} requires an explicit {}",
                keys::LIMIT_TO_PARTITIONS_WITH_LAG,
                keys::TOPIC
            )));
        }

        if let Some(partitions) = &self.partition_limitation {
            if topics.is_empty() {
                return Err(ConfigError::Conflict(format!(
                    "{} requires an explicit {}",
                    keys::PARTITION_LIMITATION,
                    keys::TOPIC
                )));
            }
            if partitions.is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: keys::PARTITION_LIMITATION,
                    value: String::new(),
                    reason: "must name at least one partition".to_string(),
                });
            }
        }

        Ok(ScalerPolicy {
            topics,
            bootstrap_servers: self.bootstrap_servers,
            consumer_group,
            lag_threshold: self.lag_threshold,
            activation_lag_threshold: self.activation_lag_threshold,
            offset_reset_policy: self.offset_reset_policy,
            scale_to_zero_on_invalid_offset: self.scale_to_zero_on_invalid_offset,
            exclude_persistent_lag: self.exclude_persistent_lag,
            limit_to_partitions_with_lag: self.limit_to_partitions_with_lag,
            partition_limitation: self.partition_limitation,
        })
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_int(key: &'static str, raw: &str) -> ConfigResult<i64> {
    raw.parse::<i64>().map_err(|e| ConfigError::InvalidValue {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(key: &'static str, raw: &str) -> ConfigResult<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "t" | "1" => Ok(true),
        "false" | "f" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: raw.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

/// Parse `"0,2,5-7"` into `{0, 2, 5, 6, 7}`.
fn parse_partition_limitation(raw: &str) -> ConfigResult<BTreeSet<i32>> {
    let invalid = |reason: &str| ConfigError::InvalidValue {
        key: keys::PARTITION_LIMITATION,
        value: raw.to_string(),
        reason: reason.to_string(),
    };

    let mut partitions = BTreeSet::new();
    for item in split_list(raw) {
        match item.split_once('-') {
            Some((start, end)) => {
                let start: i32 = start.trim().parse().map_err(|_| invalid("bad range start"))?;
                let end: i32 = end.trim().parse().map_err(|_| invalid("bad range end"))?;
                if start < 0 || end < start {
                    return Err(invalid("range must be ascending and non-negative"));
                }
                if i64::from(end) - i64::from(start) >= MAX_PARTITION_RANGE {
                    return Err(invalid("range spans too many partitions"));
                }
                partitions.extend(start..=end);
            }
            None => {
                let id: i32 = item.parse().map_err(|_| invalid("bad partition id"))?;
                if id < 0 {
                    return Err(invalid("partition ids are non-negative"));
                }
                partitions.insert(id);
            }
        }
    }
    Ok(partitions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn base() -> Vec<(&'static str, &'static str)> {
        vec![
            ("bootstrapServers", "kafka:9092"),
            ("consumerGroup", "workers"),
        ]
    }

    #[test]
    fn defaults_apply_when_keys_absent() {
        let policy = ScalerPolicy::from_metadata(&metadata(&base())).unwrap();
        assert!(policy.topics().is_empty());
        assert_eq!(policy.consumer_group(), "workers");
        assert_eq!(policy.bootstrap_servers(), &["kafka:9092".to_string()]);
        assert_eq!(policy.lag_threshold(), DEFAULT_LAG_THRESHOLD);
        assert_eq!(policy.activation_lag_threshold(), 0);
        assert_eq!(policy.offset_reset_policy(), OffsetResetPolicy::Latest);
        assert!(!policy.scale_to_zero_on_invalid_offset());
        assert!(!policy.exclude_persistent_lag());
        assert!(!policy.limit_to_partitions_with_lag());
        assert!(policy.partition_limitation().is_none());
    }

    #[test]
    fn parses_every_recognised_key() {
        let mut pairs = base();
        pairs.extend([
            ("topic", "orders, payments"),
            ("lagThreshold", "5"),
            ("activationLagThreshold", "1"),
            ("offsetResetPolicy", "earliest"),
            ("scaleToZeroOnInvalidOffset", "true"),
            ("excludePersistentLag", "TRUE"),
            ("limitToPartitionsWithLag", "1"),
            ("partitionLimitation", "0,2,5-7"),
        ]);
        let policy = ScalerPolicy::from_metadata(&metadata(&pairs)).unwrap();

        assert_eq!(
            policy.topics().iter().collect::<Vec<_>>(),
            vec!["orders", "payments"]
        );
        assert_eq!(policy.lag_threshold(), 5);
        assert_eq!(policy.activation_lag_threshold(), 1);
        assert_eq!(policy.offset_reset_policy(), OffsetResetPolicy::Earliest);
        assert!(policy.scale_to_zero_on_invalid_offset());
        assert!(policy.exclude_persistent_lag());
        assert!(policy.limit_to_partitions_with_lag());
        assert_eq!(
            policy.partition_limitation().unwrap().iter().copied().collect::<Vec<_>>(),
            vec![0, 2, 5, 6, 7]
        );
        assert!(policy.allows_partition(6));
        assert!(!policy.allows_partition(3));
    }

    #[test]
    fn missing_consumer_group_is_rejected() {
        let err = ScalerPolicy::from_metadata(&metadata(&[("bootstrapServers", "k:9092")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey("consumerGroup")));
    }

    #[test]
    fn missing_bootstrap_servers_is_rejected() {
        let err = ScalerPolicy::from_metadata(&metadata(&[("consumerGroup", "g")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey("bootstrapServers")));
    }

    #[test]
    fn non_positive_lag_threshold_is_rejected() {
        for bad in ["0", "-3"] {
            let mut pairs = base();
            pairs.push(("lagThreshold", bad));
            let err = ScalerPolicy::from_metadata(&metadata(&pairs)).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidValue { key: "lagThreshold", .. }),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn negative_activation_threshold_is_rejected() {
        let mut pairs = base();
        pairs.push(("activationLagThreshold", "-1"));
        assert!(ScalerPolicy::from_metadata(&metadata(&pairs)).is_err());
    }

    #[test]
    fn unparsable_values_are_rejected() {
        for (key, value) in [
            ("lagThreshold", "ten"),
            ("offsetResetPolicy", "smallest"),
            ("excludePersistentLag", "yes please"),
            ("partitionLimitation", "3-1"),
            ("partitionLimitation", "a,b"),
        ] {
            let mut pairs = base();
            pairs.push(("topic", "orders"));
            pairs.push((key, value));
            assert!(
                ScalerPolicy::from_metadata(&metadata(&pairs)).is_err(),
                "{key}={value} should be rejected"
            );
        }
    }

    #[test]
    fn oversized_partition_range_is_rejected() {
        for range in ["0-2147483647", "0-10000"] {
            let mut pairs = base();
            pairs.push(("topic", "orders"));
            pairs.push(("partitionLimitation", range));
            let err = ScalerPolicy::from_metadata(&metadata(&pairs)).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidValue { key: "partitionLimitation", .. }),
                "{range} should be rejected"
            );
        }

        let mut pairs = base();
        pairs.push(("topic", "orders"));
        pairs.push(("partitionLimitation", "0-9999"));
        let policy = ScalerPolicy::from_metadata(&metadata(&pairs)).unwrap();
        assert_eq!(policy.partition_limitation().unwrap().len(), 10_000);
    }

    #[test]
    fn limit_to_partitions_with_lag_requires_topic() {
        let mut pairs = base();
        pairs.push(("limitToPartitionsWithLag", "true"));
        let err = ScalerPolicy::from_metadata(&metadata(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::Conflict(_)));
    }

    #[test]
    fn partition_limitation_requires_topic() {
        let mut pairs = base();
        pairs.push(("partitionLimitation", "1"));
        let err = ScalerPolicy::from_metadata(&metadata(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::Conflict(_)));
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let mut pairs = base();
        pairs.push(("topic", "  "));
        pairs.push(("lagThreshold", ""));
        let policy = ScalerPolicy::from_metadata(&metadata(&pairs)).unwrap();
        assert!(policy.topics().is_empty());
        assert_eq!(policy.lag_threshold(), DEFAULT_LAG_THRESHOLD);
    }

    #[test]
    fn builder_deduplicates_topics() {
        let policy = ScalerPolicy::builder("g")
            .topic("orders")
            .topics(["orders", "payments"])
            .build()
            .unwrap();
        assert_eq!(policy.topics().len(), 2);
    }

    #[test]
    fn metric_name_uses_topics_or_group() {
        let explicit = ScalerPolicy::builder("g")
            .topics(["b", "a"])
            .build()
            .unwrap();
        assert_eq!(explicit.metric_name(0), "s0-kafka-a,b");

        let discovered = ScalerPolicy::builder("workers").build().unwrap();
        assert_eq!(discovered.metric_name(2), "s2-kafka-workers");
    }

    #[test]
    fn offset_reset_policy_round_trips_through_display() {
        for policy in [OffsetResetPolicy::Earliest, OffsetResetPolicy::Latest] {
            assert_eq!(policy.to_string().parse::<OffsetResetPolicy>().unwrap(), policy);
        }
    }
}

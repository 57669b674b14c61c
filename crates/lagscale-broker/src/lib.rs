//! lagscale-broker — the broker collaborator seam.
//!
//! The engine never talks to a broker directly. It holds an
//! `Arc<dyn BrokerClient>` and issues five read-only lookups:
//!
//! ```text
//! topic_partitions(topics)      → topic → partition ids
//! subscribed_topics(group)      → topics the group currently consumes
//! latest_offset(tp)             → log end offset
//! earliest_offset(tp)           → log start offset
//! committed_offset(group, tp)   → last commit, if any
//! ```
//!
//! Implementations:
//!
//! - [`MemoryBroker`] — mutable in-process broker with fault injection.
//! - [`SnapshotBroker`] — serves a JSON [`BrokerSnapshot`] file, reloaded once per pass.
//! - `KafkaBroker` — librdkafka-backed, behind the `kafka` feature.

pub mod client;
pub mod error;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;
pub mod snapshot;

pub use client::{BrokerClient, BrokerFuture, Lookup};
pub use error::{BrokerError, BrokerResult};
#[cfg(feature = "kafka")]
pub use kafka::KafkaBroker;
pub use memory::MemoryBroker;
pub use snapshot::{BrokerSnapshot, GroupSnapshot, PartitionWatermarks, SnapshotBroker};

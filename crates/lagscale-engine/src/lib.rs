//! lagscale-engine — consumer-group lag to scaling decision.
//!
//! One evaluation pass:
//!
//! ```text
//! resolve   policy.topics (or the group's subscription) → sorted partitions
//! fetch     per partition, concurrently: latest, earliest, committed
//!           (bounded retry on transient errors; any failure fails the pass)
//! lag       valid commit  → latest - committed
//!           invalid commit → 0 if scaleToZeroOnInvalidOffset, else a sentinel
//!                            above both thresholds
//! aggregate sum non-excluded lag; partitions stuck for two passes are excluded
//!           when excludePersistentLag is set
//! decide    active  = total > activationLagThreshold
//!           desired = min(ceil(total / lagThreshold), cap)
//!           cap     = partitions with lag, or resolved partitions
//! ```
//!
//! The engine has no timer. The caller drives passes and keeps the previous
//! decision when a pass returns an error.

pub mod aggregator;
pub mod decision;
pub mod error;
pub mod fetcher;
pub mod lag;
pub mod resolver;
pub mod retry;
pub mod scaler;
pub mod tracker;

pub use aggregator::{LagSummary, aggregate};
pub use decision::decide;
pub use error::{ScalerError, ScalerResult};
pub use fetcher::OffsetFetcher;
pub use lag::{PartitionLag, partition_lag};
pub use resolver::resolve_partitions;
pub use retry::EvaluationOptions;
pub use scaler::{Scaler, evaluate_offsets};
pub use tracker::{PersistentLagTracker, STUCK_PASSES_BEFORE_EXCLUSION, TrackedLag};

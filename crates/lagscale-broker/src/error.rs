//! Broker error taxonomy.

use thiserror::Error;

/// Result type alias for broker lookups.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Errors a broker lookup can surface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("broker connection failed: {0}")]
    Connection(String),

    #[error("broker request timed out: {0}")]
    Timeout(String),

    #[error("leader not available for {topic}[{partition}]")]
    LeaderNotAvailable { topic: String, partition: i32 },

    #[error("broker authentication failed: {0}")]
    Authentication(String),

    #[error("unknown topic or partition: {0}")]
    UnknownTopicOrPartition(String),

    #[error("broker metadata inconsistent: {0}")]
    MetadataInconsistent(String),

    #[error("broker snapshot unusable: {0}")]
    Snapshot(String),
}

impl BrokerError {
    /// Whether the lookup is retried with backoff. Authentication failures
    /// are retried like connectivity failures.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BrokerError::Connection(_)
                | BrokerError::Timeout(_)
                | BrokerError::LeaderNotAvailable { .. }
                | BrokerError::Authentication(_)
        )
    }
}

use lagscale_broker::BrokerError;
use thiserror::Error;

/// Why a pass produced no decision. The caller keeps its previous decision.
#[derive(Debug, Error)]
pub enum ScalerError {
    #[error("broker query failed: {0}")]
    Broker(#[from] BrokerError),

    #[error("evaluation cancelled before completion; retry next interval")]
    Cancelled,
}

impl ScalerError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ScalerError::Cancelled)
    }
}

pub type ScalerResult<T> = Result<T, ScalerError>;

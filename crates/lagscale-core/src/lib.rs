//! lagscale-core — shared types and configuration for lagscale.
//!
//! Holds the per-partition offset facts exchanged with the broker, the
//! validated [`ScalerPolicy`] built from trigger metadata, the decision type
//! emitted by each evaluation pass, and the `lagscale.toml` daemon config.

pub mod config;
pub mod duration;
pub mod error;
pub mod policy;
pub mod types;

pub use config::{DaemonSettings, LagscaleConfig, RetryConfig, ScalerEntry};
pub use error::{ConfigError, ConfigResult};
pub use policy::{OffsetResetPolicy, PolicyBuilder, ScalerPolicy};
pub use types::*;

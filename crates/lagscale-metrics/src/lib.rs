//! lagscale-metrics — observability for scaler evaluations.
//!
//! Records the outcome of every pass per scaler so repeated broker failures
//! are visible to whoever drives the control loop, and renders them in
//! Prometheus text format.
//!
//! # Architecture
//!
//! ```text
//! OutcomeRegistry
//!   ├── register()        ← once per configured scaler
//!   ├── record_success()  ← pass returned a decision
//!   ├── record_failure()  ← pass failed or was cancelled
//!   └── snapshot()        → Vec<ScalerStatus>
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics endpoint
//! ```

pub mod prometheus;
pub mod registry;

pub use prometheus::render_prometheus;
pub use registry::{OutcomeRegistry, ScalerStatus};

//! # appetite-engine
//!
//! Risk-appetite computation on top of [`appetite_store::AppetiteStorage`]:
//!
//! - [`evaluator`]: pure traffic-light evaluation of one metric
//! - [`aggregation`]: worst-of roll-up
//! - [`breach`]: point-in-time, sustained and windowed breach rules
//! - [`residual`]: compounding control effectiveness into residual risk
//! - [`governance`]: lifecycle and maker-checker guardrails
//! - [`category`]: depth-capped category tree
//! - [`dispatch`]: recompute tasks emitted by control-link changes
//! - [`sweep`]: organization-wide recompute runs under a per-org lock
//!
//! [`ToleranceService`] ties these together behind one facade.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

pub mod aggregation;
pub mod breach;
pub mod category;
pub mod config;
pub mod dispatch;
mod error;
pub mod evaluator;
pub mod governance;
pub mod residual;
pub mod service;
pub mod sweep;

pub use breach::{BreachOutcome, BreachRuleEngine, Escalation};
pub use config::EngineConfig;
pub use dispatch::{RecomputeReason, RecomputeTask, ResidualWorker, TaskDispatcher, WorkerStats};
pub use error::{AppetiteError, AppetiteResult};
pub use evaluator::{EvaluationPoint, MetricStatus};
pub use residual::ResidualUpdate;
pub use service::{
    ContainerStatus, MetricDefinition, ObservationApproval, RecomputeOutcome, ToleranceService,
};
pub use sweep::{SweepFailure, SweepReport, SweepRunner};

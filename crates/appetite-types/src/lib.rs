//! # appetite-types
//!
//! Shared record types for risk-appetite monitoring: governed tolerance
//! metrics, the indicator observations that evidence them, the coverage graph
//! between the two, breach events, and the controls that reduce inherent risk.
//!
//! Nothing in this crate computes a status. Derived values (RAG levels,
//! residual scores) live in `appetite-engine` and are always recomputable from
//! the records defined here.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod breach;
pub mod catalog;
pub mod control;
pub mod coverage;
pub mod ids;
pub mod lifecycle;
pub mod metric;
pub mod observation;
pub mod period;
pub mod run;
pub mod status;

pub use catalog::{Category, Indicator, Outcome};
pub use control::{Control, LinkStatus, ResidualScore, Risk, RiskControlLink};
pub use coverage::{CoverageLink, CoverageStrength, SignalType};
pub use ids::{
    ActorId, BreachId, CategoryId, ControlId, IndicatorId, MetricId, MetricKey, ObservationId,
    OrgId, OutcomeId, RiskId, RunId,
};
pub use lifecycle::{GovernanceStatus, ObservationStatus};
pub use breach::{BreachEvent, BreachMode, BreachRule, BreachType, EscalationSeverity};
pub use metric::{validate_margin, BoundConfig, BoundError, Direction, Limits, ToleranceMetric};
pub use observation::Observation;
pub use period::{Frequency, PeriodParseError, ReportingPeriod};
pub use run::{RecalcRun, RunStatus, RunType};
pub use status::RagStatus;

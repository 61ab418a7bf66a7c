//! Breach events and per-metric breach rules.

use crate::ids::{BreachId, MetricId, MetricKey};
use crate::metric::Direction;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreachType {
    /// Soft limit reached (amber).
    Soft,
    /// Hard limit reached (red).
    Hard,
}

/// Escalation severity is configured on the metric, never computed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscalationSeverity {
    Info,
    #[default]
    Warn,
    Critical,
}

/// How breaches of a metric turn into escalations.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreachMode {
    /// Escalate whenever a new breach opens.
    #[default]
    PointInTime,
    /// Escalate once `periods` consecutive periods are in breach.
    SustainedNPeriods { periods: u32 },
    /// Escalate once `count` breaches fall within the trailing `window_days`.
    /// `breach_type` restricts the count to one kind; `None` counts both.
    NBreachesInWindow {
        count: u32,
        window_days: u32,
        #[serde(default)]
        breach_type: Option<BreachType>,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreachRule {
    #[serde(flatten)]
    pub mode: BreachMode,
    #[serde(default)]
    pub severity: EscalationSeverity,
}

/// A recorded breach of a tolerance metric.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BreachEvent {
    pub breach_id: BreachId,
    pub metric_key: MetricKey,
    /// The metric version whose bounds were breached.
    pub metric_id: MetricId,
    pub breach_type: BreachType,
    pub observed_value: f64,
    pub limit_value: f64,
    pub direction: Direction,
    pub measurement_date: NaiveDate,
    pub period_number: i64,
    #[serde(default)]
    pub resolved_at: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl BreachEvent {
    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}

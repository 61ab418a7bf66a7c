//! Governed tolerance metrics and their bound configuration.

use crate::ids::{ActorId, MetricId, MetricKey, OrgId, OutcomeId};
use crate::lifecycle::GovernanceStatus;
use crate::breach::BreachRule;
use crate::period::Frequency;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which side of the bounds is the bad side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Higher is worse.
    Above,
    /// Lower is worse.
    Below,
    /// The value must stay inside `[hard, soft]`.
    Between,
}

/// Bound configuration as entered by governance administration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BoundConfig {
    /// Soft (amber) and hard (red) limits. For `between` the hard limit is
    /// the lower rail and the soft limit the upper rail.
    Limits { soft: f64, hard: f64 },
    /// Band thresholds: reaching `amber` enters amber, reaching `red` enters
    /// red. `green` is the target value and does not affect evaluation.
    Bands { green: f64, amber: f64, red: f64 },
}

/// Resolved soft/hard limits.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    pub soft: f64,
    pub hard: f64,
}

#[derive(Debug, Error, PartialEq)]
pub enum BoundError {
    #[error("bound values must be finite")]
    NonFinite,

    #[error("hard limit {hard} is on the wrong side of soft limit {soft} for direction {direction:?}")]
    WrongSide {
        direction: Direction,
        soft: f64,
        hard: f64,
    },

    #[error("between corridor is empty: lower rail {lower} must be below upper rail {upper}")]
    EmptyCorridor { lower: f64, upper: f64 },

    #[error("band thresholds are only defined for above/below metrics")]
    BandsUnsupported,

    #[error("band thresholds out of order: green {green}, amber {amber}, red {red}")]
    BandOrder { green: f64, amber: f64, red: f64 },

    #[error("amber margin {0} must lie within [0, 0.5]")]
    MarginOutOfRange(f64),
}

impl BoundConfig {
    /// The soft/hard pair the evaluator works with.
    pub fn limits(&self) -> Limits {
        match *self {
            BoundConfig::Limits { soft, hard } => Limits { soft, hard },
            BoundConfig::Bands { amber, red, .. } => Limits {
                soft: amber,
                hard: red,
            },
        }
    }

    /// Check the configuration against the metric direction.
    pub fn validate(&self, direction: Direction) -> Result<Limits, BoundError> {
        if let BoundConfig::Bands { green, amber, red } = *self {
            if ![green, amber, red].iter().all(|v| v.is_finite()) {
                return Err(BoundError::NonFinite);
            }
            let ordered = match direction {
                Direction::Above => green <= amber && amber <= red,
                Direction::Below => green >= amber && amber >= red,
                Direction::Between => return Err(BoundError::BandsUnsupported),
            };
            if !ordered {
                return Err(BoundError::BandOrder { green, amber, red });
            }
        }

        let Limits { soft, hard } = self.limits();
        if !soft.is_finite() || !hard.is_finite() {
            return Err(BoundError::NonFinite);
        }
        match direction {
            Direction::Above if hard < soft => Err(BoundError::WrongSide {
                direction,
                soft,
                hard,
            }),
            Direction::Below if hard > soft => Err(BoundError::WrongSide {
                direction,
                soft,
                hard,
            }),
            Direction::Between if hard >= soft => Err(BoundError::EmptyCorridor {
                lower: hard,
                upper: soft,
            }),
            _ => Ok(Limits { soft, hard }),
        }
    }
}

/// Validate a per-metric amber margin override for `between` metrics.
pub fn validate_margin(margin: f64) -> Result<f64, BoundError> {
    if margin.is_finite() && (0.0..=0.5).contains(&margin) {
        Ok(margin)
    } else {
        Err(BoundError::MarginOutOfRange(margin))
    }
}

/// One stored version of a governed tolerance metric.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToleranceMetric {
    pub metric_id: MetricId,
    pub metric_key: MetricKey,
    pub org_id: OrgId,
    pub outcome_id: OutcomeId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub direction: Option<Direction>,
    #[serde(default)]
    pub bounds: Option<BoundConfig>,
    /// Overrides the engine-wide amber margin for `between` metrics.
    #[serde(default)]
    pub amber_margin: Option<f64>,
    #[serde(default)]
    pub frequency: Frequency,
    #[serde(default)]
    pub breach_rule: BreachRule,
    pub status: GovernanceStatus,
    pub version: u32,
    pub effective_from: NaiveDate,
    /// Exclusive end of the effective range; set on supersession or retirement.
    #[serde(default)]
    pub effective_to: Option<NaiveDate>,
    #[serde(default)]
    pub supersedes: Option<MetricId>,
    #[serde(default)]
    pub superseded_by: Option<MetricId>,
    pub created_by: ActorId,
    #[serde(default)]
    pub approved_by: Option<ActorId>,
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ToleranceMetric {
    /// Whether this version governed `date`.
    pub fn is_effective_on(&self, date: NaiveDate) -> bool {
        self.status.was_effective()
            && self.effective_from <= date
            && self.effective_to.map_or(true, |to| date < to)
    }

    /// Validated limits, or `None` when bounds or direction are missing.
    pub fn limits(&self) -> Option<Result<Limits, BoundError>> {
        match (&self.bounds, self.direction) {
            (Some(bounds), Some(direction)) => Some(bounds.validate(direction)),
            _ => None,
        }
    }
}

//! Status evaluation.
//!
//! Everything in this module is pure: the same metric version, coverage and
//! observation always yield the same status. Reading those inputs from
//! storage for a given evaluation point is the service's job.

use appetite_store::ObservationWindow;
use appetite_types::{
    CoverageLink, Direction, Limits, MetricId, MetricKey, Observation, ObservationId, RagStatus,
    ReportingPeriod, ToleranceMetric,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// The moment a status is derived for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationPoint {
    /// Latest approved observation dated on or before the date.
    AsOf(NaiveDate),
    /// Latest approved observation dated within the period.
    Period(ReportingPeriod),
}

impl EvaluationPoint {
    /// The date used to pick the metric version in force.
    pub fn reference_date(&self) -> NaiveDate {
        match self {
            EvaluationPoint::AsOf(date) => *date,
            EvaluationPoint::Period(period) => period.end(),
        }
    }

    pub fn window(&self) -> ObservationWindow {
        match self {
            EvaluationPoint::AsOf(date) => ObservationWindow::up_to(*date),
            EvaluationPoint::Period(period) => {
                ObservationWindow::between(period.start(), period.end())
            }
        }
    }
}

/// Result of evaluating one metric, with the inputs that produced it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricStatus {
    pub metric_key: MetricKey,
    /// The version in force, if any.
    pub metric_id: Option<MetricId>,
    pub status: RagStatus,
    pub observation_id: Option<ObservationId>,
    pub value: Option<f64>,
    pub observed_on: Option<NaiveDate>,
    pub limits: Option<Limits>,
}

/// Classify a value against validated limits.
///
/// `above`: value >= hard is red, value >= soft is amber.
/// `below`: value <= hard is red, value <= soft is amber.
/// `between`: outside `[hard, soft]` is red; closer than
/// `amber_margin * (soft - hard)` to either rail is amber.
pub fn classify(direction: Direction, limits: Limits, amber_margin: f64, value: f64) -> RagStatus {
    let Limits { soft, hard } = limits;
    match direction {
        Direction::Above => {
            if value >= hard {
                RagStatus::Red
            } else if value >= soft {
                RagStatus::Amber
            } else {
                RagStatus::Green
            }
        }
        Direction::Below => {
            if value <= hard {
                RagStatus::Red
            } else if value <= soft {
                RagStatus::Amber
            } else {
                RagStatus::Green
            }
        }
        Direction::Between => {
            let (lower, upper) = (hard, soft);
            if value < lower || value > upper {
                return RagStatus::Red;
            }
            let margin = amber_margin * (upper - lower);
            if value - lower < margin || upper - value < margin {
                RagStatus::Amber
            } else {
                RagStatus::Green
            }
        }
    }
}

/// The limit a breaching value is reported against.
///
/// For `between` this is the rail that was crossed, or the nearer rail when
/// the value is still inside the corridor.
pub fn breached_limit(direction: Direction, limits: Limits, status: RagStatus, value: f64) -> f64 {
    match direction {
        Direction::Above | Direction::Below => {
            if status == RagStatus::Red {
                limits.hard
            } else {
                limits.soft
            }
        }
        Direction::Between => {
            if (value - limits.hard).abs() <= (limits.soft - value).abs() {
                limits.hard
            } else {
                limits.soft
            }
        }
    }
}

/// Evaluate a metric version against its primary coverage and observation.
///
/// Diagnostics are checked in order: no primary link (`NO_KRI`), bounds or
/// direction missing or unusable (`UNKNOWN`), no approved observation
/// (`NO_DATA`).
pub fn evaluate(
    metric: &ToleranceMetric,
    primary: Option<&CoverageLink>,
    observation: Option<&Observation>,
    default_margin: f64,
) -> MetricStatus {
    let mut result = MetricStatus {
        metric_key: metric.metric_key.clone(),
        metric_id: Some(metric.metric_id.clone()),
        status: RagStatus::Unknown,
        observation_id: None,
        value: None,
        observed_on: None,
        limits: None,
    };

    if primary.map_or(true, |link| !link.is_primary()) {
        result.status = RagStatus::NoKri;
        return result;
    }

    let (direction, limits) = match (metric.direction, metric.limits()) {
        (Some(direction), Some(Ok(limits))) => (direction, limits),
        _ => return result,
    };
    result.limits = Some(limits);

    let observation = match observation {
        Some(observation) if observation.is_current() => observation,
        _ => {
            result.status = RagStatus::NoData;
            return result;
        }
    };

    let margin = metric.amber_margin.unwrap_or(default_margin);
    result.status = classify(direction, limits, margin, observation.value);
    result.observation_id = Some(observation.observation_id.clone());
    result.value = Some(observation.value);
    result.observed_on = Some(observation.observed_on);
    result
}

/// Status for a key that exists but has no version in force at the
/// reference date.
pub fn not_in_force(metric_key: MetricKey) -> MetricStatus {
    MetricStatus {
        metric_key,
        metric_id: None,
        status: RagStatus::Unknown,
        observation_id: None,
        value: None,
        observed_on: None,
        limits: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appetite_types::{
        ActorId, BoundConfig, BreachRule, CoverageStrength, Frequency, GovernanceStatus,
        IndicatorId, ObservationStatus, OrgId, OutcomeId, SignalType,
    };
    use chrono::Utc;
    use proptest::prelude::*;

    const ABOVE: Limits = Limits {
        soft: 80.0,
        hard: 90.0,
    };
    const BELOW: Limits = Limits {
        soft: 99.5,
        hard: 99.0,
    };

    fn metric(direction: Option<Direction>, bounds: Option<BoundConfig>) -> ToleranceMetric {
        let now = Utc::now();
        ToleranceMetric {
            metric_id: MetricId::new("metric-1"),
            metric_key: MetricKey::new("tol-1"),
            org_id: OrgId::new("org-1"),
            outcome_id: OutcomeId::new("outcome-1"),
            name: "Utilisation".to_string(),
            description: None,
            direction,
            bounds,
            amber_margin: None,
            frequency: Frequency::Monthly,
            breach_rule: BreachRule::default(),
            status: GovernanceStatus::Approved,
            version: 1,
            effective_from: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            effective_to: None,
            supersedes: None,
            superseded_by: None,
            created_by: ActorId::new("maker"),
            approved_by: Some(ActorId::new("checker")),
            approved_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    fn primary() -> CoverageLink {
        CoverageLink {
            metric_key: MetricKey::new("tol-1"),
            indicator_id: IndicatorId::new("kri-1"),
            strength: CoverageStrength::Primary,
            signal_type: SignalType::Concurrent,
            rationale: Some("direct measure".to_string()),
        }
    }

    fn approved(value: f64) -> Observation {
        let now = Utc::now();
        Observation {
            observation_id: ObservationId::new("obs-1"),
            indicator_id: IndicatorId::new("kri-1"),
            observed_on: NaiveDate::from_ymd_opt(2025, 3, 31).unwrap(),
            value,
            status: ObservationStatus::Approved,
            version: 1,
            supersedes: None,
            superseded_by: None,
            submitted_by: ActorId::new("maker"),
            reviewed_by: Some(ActorId::new("checker")),
            reviewed_at: Some(now),
            review_note: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn limits_metric() -> ToleranceMetric {
        metric(
            Some(Direction::Above),
            Some(BoundConfig::Limits {
                soft: 80.0,
                hard: 90.0,
            }),
        )
    }

    #[test]
    fn above_85_between_80_and_90_is_amber() {
        let result = evaluate(&limits_metric(), Some(&primary()), Some(&approved(85.0)), 0.1);
        assert_eq!(result.status, RagStatus::Amber);
        assert_eq!(result.value, Some(85.0));
    }

    #[test]
    fn boundaries_are_inclusive_on_the_bad_side() {
        assert_eq!(classify(Direction::Above, ABOVE, 0.1, 90.0), RagStatus::Red);
        assert_eq!(classify(Direction::Above, ABOVE, 0.1, 80.0), RagStatus::Amber);
        assert_eq!(classify(Direction::Above, ABOVE, 0.1, 79.99), RagStatus::Green);
        assert_eq!(classify(Direction::Below, BELOW, 0.1, 99.0), RagStatus::Red);
        assert_eq!(classify(Direction::Below, BELOW, 0.1, 99.5), RagStatus::Amber);
        assert_eq!(classify(Direction::Below, BELOW, 0.1, 99.9), RagStatus::Green);
    }

    #[test]
    fn between_uses_corridor_margin() {
        let corridor = Limits {
            soft: 200.0,
            hard: 100.0,
        };
        assert_eq!(classify(Direction::Between, corridor, 0.1, 99.0), RagStatus::Red);
        assert_eq!(classify(Direction::Between, corridor, 0.1, 201.0), RagStatus::Red);
        assert_eq!(classify(Direction::Between, corridor, 0.1, 105.0), RagStatus::Amber);
        assert_eq!(classify(Direction::Between, corridor, 0.1, 195.0), RagStatus::Amber);
        assert_eq!(classify(Direction::Between, corridor, 0.1, 150.0), RagStatus::Green);
        assert_eq!(classify(Direction::Between, corridor, 0.0, 100.0), RagStatus::Green);
        assert_eq!(classify(Direction::Between, corridor, 0.3, 125.0), RagStatus::Amber);
    }

    #[test]
    fn missing_primary_link_is_no_kri() {
        let result = evaluate(&limits_metric(), None, Some(&approved(85.0)), 0.1);
        assert_eq!(result.status, RagStatus::NoKri);

        let mut secondary = primary();
        secondary.strength = CoverageStrength::Secondary;
        let result = evaluate(&limits_metric(), Some(&secondary), Some(&approved(85.0)), 0.1);
        assert_eq!(result.status, RagStatus::NoKri);
    }

    #[test]
    fn missing_bounds_or_direction_is_unknown_never_green() {
        let no_bounds = metric(Some(Direction::Above), None);
        let result = evaluate(&no_bounds, Some(&primary()), Some(&approved(1.0)), 0.1);
        assert_eq!(result.status, RagStatus::Unknown);

        let no_direction = metric(
            None,
            Some(BoundConfig::Limits {
                soft: 80.0,
                hard: 90.0,
            }),
        );
        let result = evaluate(&no_direction, Some(&primary()), Some(&approved(1.0)), 0.1);
        assert_eq!(result.status, RagStatus::Unknown);
    }

    #[test]
    fn no_approved_observation_is_no_data() {
        let result = evaluate(&limits_metric(), Some(&primary()), None, 0.1);
        assert_eq!(result.status, RagStatus::NoData);

        let mut submitted = approved(85.0);
        submitted.status = ObservationStatus::Submitted;
        let result = evaluate(&limits_metric(), Some(&primary()), Some(&submitted), 0.1);
        assert_eq!(result.status, RagStatus::NoData);
    }

    #[test]
    fn metric_margin_overrides_default() {
        let mut between = metric(
            Some(Direction::Between),
            Some(BoundConfig::Limits {
                soft: 10.0,
                hard: 0.0,
            }),
        );
        between.amber_margin = Some(0.3);
        let result = evaluate(&between, Some(&primary()), Some(&approved(2.5)), 0.1);
        assert_eq!(result.status, RagStatus::Amber);
        between.amber_margin = None;
        let result = evaluate(&between, Some(&primary()), Some(&approved(2.5)), 0.1);
        assert_eq!(result.status, RagStatus::Green);
    }

    #[test]
    fn breached_limit_picks_the_relevant_rail() {
        assert_eq!(breached_limit(Direction::Above, ABOVE, RagStatus::Red, 95.0), 90.0);
        assert_eq!(breached_limit(Direction::Above, ABOVE, RagStatus::Amber, 85.0), 80.0);
        let corridor = Limits {
            soft: 200.0,
            hard: 100.0,
        };
        assert_eq!(
            breached_limit(Direction::Between, corridor, RagStatus::Red, 50.0),
            100.0
        );
        assert_eq!(
            breached_limit(Direction::Between, corridor, RagStatus::Amber, 195.0),
            200.0
        );
    }

    #[test]
    fn period_points_use_period_window() {
        let period: ReportingPeriod = "2025-Q1".parse().unwrap();
        let point = EvaluationPoint::Period(period);
        assert_eq!(
            point.reference_date(),
            NaiveDate::from_ymd_opt(2025, 3, 31).unwrap()
        );
        assert!(!point
            .window()
            .contains(NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()));
        assert!(EvaluationPoint::AsOf(point.reference_date())
            .window()
            .contains(NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()));
    }

    proptest! {
        #[test]
        fn above_direction_thresholds(
            soft in -1_000.0f64..1_000.0,
            gap in 0.0f64..500.0,
            value in -2_000.0f64..2_000.0,
        ) {
            let limits = Limits { soft, hard: soft + gap };
            let status = classify(Direction::Above, limits, 0.1, value);
            if value >= limits.hard {
                prop_assert_eq!(status, RagStatus::Red);
            } else if value >= limits.soft {
                prop_assert_eq!(status, RagStatus::Amber);
            } else {
                prop_assert_eq!(status, RagStatus::Green);
            }
        }

        #[test]
        fn below_direction_thresholds(
            soft in -1_000.0f64..1_000.0,
            gap in 0.0f64..500.0,
            value in -2_000.0f64..2_000.0,
        ) {
            let limits = Limits { soft, hard: soft - gap };
            let status = classify(Direction::Below, limits, 0.1, value);
            if value <= limits.hard {
                prop_assert_eq!(status, RagStatus::Red);
            } else if value <= limits.soft {
                prop_assert_eq!(status, RagStatus::Amber);
            } else {
                prop_assert_eq!(status, RagStatus::Green);
            }
        }

        #[test]
        fn between_never_reports_green_outside_the_corridor(
            lower in -1_000.0f64..1_000.0,
            width in 0.001f64..500.0,
            margin in 0.0f64..0.5,
            value in -2_000.0f64..2_000.0,
        ) {
            let limits = Limits { soft: lower + width, hard: lower };
            let status = classify(Direction::Between, limits, margin, value);
            if value < lower || value > lower + width {
                prop_assert_eq!(status, RagStatus::Red);
            } else {
                prop_assert_ne!(status, RagStatus::Red);
            }
        }
    }
}

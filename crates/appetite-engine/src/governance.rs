//! Governance guardrails shared by metrics and observations.

use crate::error::{AppetiteError, AppetiteResult};
use appetite_types::{
    validate_margin, ActorId, BreachMode, CoverageLink, Direction, GovernanceStatus,
    Observation, ObservationStatus, ToleranceMetric,
};

/// Longest trailing window a windowed breach rule may use, in days.
pub const MAX_BREACH_WINDOW_DAYS: u32 = 3_660;

pub fn ensure_metric_transition(
    metric: &ToleranceMetric,
    to: GovernanceStatus,
) -> AppetiteResult<()> {
    if metric.status.can_transition_to(to) {
        Ok(())
    } else {
        Err(AppetiteError::InvalidState(format!(
            "metric {} cannot move from {} to {}",
            metric.metric_id, metric.status, to
        )))
    }
}

pub fn ensure_observation_transition(
    observation: &Observation,
    to: ObservationStatus,
) -> AppetiteResult<()> {
    if observation.status.can_transition_to(to) {
        Ok(())
    } else {
        Err(AppetiteError::InvalidState(format!(
            "observation {} cannot move from {} to {}",
            observation.observation_id, observation.status, to
        )))
    }
}

pub fn ensure_metric_mutable(metric: &ToleranceMetric) -> AppetiteResult<()> {
    if metric.status.is_mutable() {
        Ok(())
    } else {
        Err(AppetiteError::InvalidState(format!(
            "metric {} is {}; supersede it instead of editing",
            metric.metric_id, metric.status
        )))
    }
}

pub fn ensure_metric_deletable(metric: &ToleranceMetric) -> AppetiteResult<()> {
    if metric.status.is_deletable() {
        Ok(())
    } else {
        Err(AppetiteError::InvalidState(format!(
            "metric {} is {} and cannot be deleted",
            metric.metric_id, metric.status
        )))
    }
}

/// Maker-checker: the reviewer must not be the author.
pub fn ensure_distinct_checker(maker: &ActorId, checker: &ActorId) -> AppetiteResult<()> {
    if maker == checker {
        return Err(AppetiteError::InvalidState(format!(
            "{} cannot review their own submission",
            checker
        )));
    }
    Ok(())
}

/// Validate the configurable parts of a metric definition.
///
/// Missing bounds or direction are allowed on drafts; they evaluate to
/// `UNKNOWN`. Bounds that are present must be usable.
pub fn validate_metric_definition(metric: &ToleranceMetric) -> AppetiteResult<()> {
    if metric.name.trim().is_empty() {
        return Err(AppetiteError::Validation("metric name is empty".to_string()));
    }
    if let Some(Err(err)) = metric.limits() {
        return Err(err.into());
    }
    if let Some(margin) = metric.amber_margin {
        validate_margin(margin)?;
        if metric.direction != Some(Direction::Between) {
            return Err(AppetiteError::Validation(
                "amber margin only applies to between metrics".to_string(),
            ));
        }
    }
    match metric.breach_rule.mode {
        BreachMode::PointInTime => {}
        BreachMode::SustainedNPeriods { periods } if periods == 0 => {
            return Err(AppetiteError::Validation(
                "sustained breach rule needs at least one period".to_string(),
            ))
        }
        BreachMode::NBreachesInWindow {
            count, window_days, ..
        } if count == 0 || window_days == 0 => {
            return Err(AppetiteError::Validation(
                "windowed breach rule needs a positive count and window".to_string(),
            ))
        }
        BreachMode::NBreachesInWindow { window_days, .. }
            if window_days > MAX_BREACH_WINDOW_DAYS =>
        {
            return Err(AppetiteError::Validation(format!(
                "breach window of {} days exceeds {} days",
                window_days, MAX_BREACH_WINDOW_DAYS
            )))
        }
        _ => {}
    }
    Ok(())
}

pub fn validate_coverage_link(link: &CoverageLink) -> AppetiteResult<()> {
    let has_rationale = link
        .rationale
        .as_deref()
        .map_or(false, |text| !text.trim().is_empty());
    if link.is_primary() && !has_rationale {
        return Err(AppetiteError::Validation(format!(
            "primary link between {} and {} needs a rationale",
            link.metric_key, link.indicator_id
        )));
    }
    Ok(())
}

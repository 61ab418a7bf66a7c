//! Breach rule engine.
//!
//! Turns evaluated statuses into persisted breach events and decides whether
//! the metric's breach rule escalates. Three modes are supported:
//!
//! - `POINT_IN_TIME` keeps one open event per metric and escalates when a new
//!   one opens. Worsening from soft to hard closes the soft event and opens a
//!   hard one. The store swaps the open event atomically, so a racing
//!   evaluation fails with a conflict instead of opening a second event.
//! - `SUSTAINED_N_PERIODS` stores one event per breaching period and escalates
//!   once the run of consecutive open periods ending at the current one
//!   reaches the threshold.
//! - `N_BREACHES_IN_WINDOW` stores one event per breaching period and
//!   escalates once enough breaching periods fall inside the trailing window.
//!
//! A `GREEN` status resolves the open events measured on or before it. A late
//! approved reading never closes a breach measured after it.

use crate::error::AppetiteResult;
use crate::evaluator::{breached_limit, MetricStatus};
use appetite_store::AppetiteStorage;
use appetite_types::{
    BreachEvent, BreachId, BreachMode, BreachType, EscalationSeverity, MetricId, MetricKey,
    RagStatus, ReportingPeriod, ToleranceMetric,
};
use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// An escalation raised by a metric's breach rule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Escalation {
    pub metric_key: MetricKey,
    pub metric_id: MetricId,
    pub severity: EscalationSeverity,
    pub mode: BreachMode,
    pub breach_type: BreachType,
    /// Consecutive periods, periods in window, or 1 for point-in-time.
    pub count: u32,
    pub period_number: i64,
    pub measurement_date: NaiveDate,
}

/// What one status did to the breach log.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BreachOutcome {
    pub opened: Option<BreachEvent>,
    pub resolved: Vec<BreachEvent>,
    pub escalation: Option<Escalation>,
}

pub struct BreachRuleEngine {
    storage: Arc<dyn AppetiteStorage>,
}

impl BreachRuleEngine {
    pub fn new(storage: Arc<dyn AppetiteStorage>) -> Self {
        Self { storage }
    }

    /// Apply one evaluated status of `metric`.
    ///
    /// Diagnostic statuses leave the log untouched. Replaying the same status
    /// is a no-op.
    pub async fn apply(
        &self,
        metric: &ToleranceMetric,
        status: &MetricStatus,
        now: DateTime<Utc>,
    ) -> AppetiteResult<BreachOutcome> {
        let (value, measured_on, limits, direction) =
            match (status.value, status.observed_on, status.limits, metric.direction) {
                (Some(v), Some(d), Some(l), Some(dir)) => (v, d, l, dir),
                _ => return Ok(BreachOutcome::default()),
            };

        if status.status == RagStatus::Green {
            let resolved = self.resolve_open(&metric.metric_key, measured_on).await?;
            return Ok(BreachOutcome {
                resolved,
                ..BreachOutcome::default()
            });
        }

        let breach_type = match status.status {
            RagStatus::Red => BreachType::Hard,
            RagStatus::Amber => BreachType::Soft,
            _ => return Ok(BreachOutcome::default()),
        };
        let period_number = ReportingPeriod::containing(metric.frequency, measured_on).ordinal();
        let candidate = BreachEvent {
            breach_id: BreachId::generate(),
            metric_key: metric.metric_key.clone(),
            metric_id: metric.metric_id.clone(),
            breach_type,
            observed_value: value,
            limit_value: breached_limit(direction, limits, status.status, value),
            direction,
            measurement_date: measured_on,
            period_number,
            resolved_at: None,
            created_at: now,
        };

        let mut outcome = BreachOutcome::default();
        match &metric.breach_rule.mode {
            BreachMode::PointInTime => {
                let open = self.storage.open_breaches(&metric.metric_key).await?;
                if open.iter().any(|event| event.measurement_date > measured_on) {
                    debug!(metric_key = %metric.metric_key, "newer breach already open");
                    return Ok(outcome);
                }
                let covered = open.iter().any(|event| {
                    event.breach_type == BreachType::Hard || event.breach_type == breach_type
                });
                if covered {
                    debug!(metric_key = %metric.metric_key, "breach already open");
                    return Ok(outcome);
                }
                let expected: Vec<BreachId> =
                    open.into_iter().map(|event| event.breach_id).collect();
                outcome.resolved = self.storage.open_breach(candidate.clone(), &expected).await?;
                info!(
                    metric_key = %candidate.metric_key,
                    breach_type = ?candidate.breach_type,
                    value = candidate.observed_value,
                    limit = candidate.limit_value,
                    replaced = outcome.resolved.len(),
                    "breach opened"
                );
                outcome.escalation = Some(escalation(metric, &candidate, 1));
                outcome.opened = Some(candidate);
            }
            BreachMode::SustainedNPeriods { periods } => {
                let Some(opened) = self.record(candidate).await? else {
                    return Ok(outcome);
                };
                let open = self.storage.open_breaches(&metric.metric_key).await?;
                let run = consecutive_run(&open, period_number);
                debug!(metric_key = %metric.metric_key, run, threshold = periods, "sustained breach run");
                if run >= *periods {
                    outcome.escalation = Some(escalation(metric, &opened, run));
                }
                outcome.opened = Some(opened);
            }
            BreachMode::NBreachesInWindow {
                count,
                window_days,
                breach_type: counted,
            } => {
                let Some(opened) = self.record(candidate).await? else {
                    return Ok(outcome);
                };
                let history = self.storage.breaches_for_metric(&metric.metric_key).await?;
                let hits = breaches_in_window(&history, measured_on, *window_days, *counted);
                debug!(metric_key = %metric.metric_key, hits, threshold = count, "breaches in window");
                if hits >= *count {
                    outcome.escalation = Some(escalation(metric, &opened, hits));
                }
                outcome.opened = Some(opened);
            }
        }

        if let Some(escalation) = &outcome.escalation {
            warn!(
                metric_key = %escalation.metric_key,
                severity = ?escalation.severity,
                count = escalation.count,
                period = escalation.period_number,
                "breach rule escalated"
            );
        }
        Ok(outcome)
    }

    /// Store a new event. `None` when an open event for the same period and
    /// type already existed.
    async fn record(&self, candidate: BreachEvent) -> AppetiteResult<Option<BreachEvent>> {
        let stored = self.storage.record_breach(candidate.clone()).await?;
        if stored.breach_id != candidate.breach_id {
            return Ok(None);
        }
        info!(
            metric_key = %stored.metric_key,
            breach_type = ?stored.breach_type,
            value = stored.observed_value,
            limit = stored.limit_value,
            "breach opened"
        );
        Ok(Some(stored))
    }

    async fn resolve_open(
        &self,
        key: &MetricKey,
        resolved_at: NaiveDate,
    ) -> AppetiteResult<Vec<BreachEvent>> {
        let mut resolved = Vec::new();
        for event in self.storage.open_breaches(key).await? {
            if event.measurement_date > resolved_at {
                continue;
            }
            resolved.push(self.storage.resolve_breach(&event.breach_id, resolved_at).await?);
        }
        if !resolved.is_empty() {
            info!(metric_key = %key, count = resolved.len(), "breaches resolved");
        }
        Ok(resolved)
    }
}

fn escalation(metric: &ToleranceMetric, event: &BreachEvent, count: u32) -> Escalation {
    Escalation {
        metric_key: metric.metric_key.clone(),
        metric_id: metric.metric_id.clone(),
        severity: metric.breach_rule.severity,
        mode: metric.breach_rule.mode.clone(),
        breach_type: event.breach_type,
        count,
        period_number: event.period_number,
        measurement_date: event.measurement_date,
    }
}

/// Length of the run of consecutive open periods ending at `current`,
/// stopping at the first gap.
pub fn consecutive_run(open: &[BreachEvent], current: i64) -> u32 {
    let periods: BTreeSet<i64> = open
        .iter()
        .filter(|event| event.is_open())
        .map(|event| event.period_number)
        .collect();
    let mut run = 0;
    let mut period = current;
    while periods.contains(&period) {
        run += 1;
        period -= 1;
    }
    run
}

/// Number of distinct breaching periods with a measurement date inside the
/// trailing `window_days` ending at `as_of`. A window reaching past the
/// calendar's start counts everything up to `as_of`.
pub fn breaches_in_window(
    history: &[BreachEvent],
    as_of: NaiveDate,
    window_days: u32,
    breach_type: Option<BreachType>,
) -> u32 {
    let from = as_of.checked_sub_days(Days::new(u64::from(window_days)));
    let periods: BTreeSet<i64> = history
        .iter()
        .filter(|event| breach_type.map_or(true, |t| event.breach_type == t))
        .filter(|event| from.map_or(true, |from| event.measurement_date > from))
        .filter(|event| event.measurement_date <= as_of)
        .map(|event| event.period_number)
        .collect();
    periods.len() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppetiteError;
    use appetite_store::memory::InMemoryAppetiteStorage;
    use appetite_store::BreachStore;
    use appetite_types::{
        ActorId, BoundConfig, BreachRule, Direction, Frequency, GovernanceStatus, Limits, OrgId,
        OutcomeId,
    };

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn metric(mode: BreachMode) -> ToleranceMetric {
        let now = Utc::now();
        ToleranceMetric {
            metric_id: MetricId::new("metric-1"),
            metric_key: MetricKey::new("tol-1"),
            org_id: OrgId::new("org-1"),
            outcome_id: OutcomeId::new("outcome-1"),
            name: "Ticket backlog".to_string(),
            description: None,
            direction: Some(Direction::Above),
            bounds: Some(BoundConfig::Limits {
                soft: 80.0,
                hard: 90.0,
            }),
            amber_margin: None,
            frequency: Frequency::Monthly,
            breach_rule: BreachRule {
                mode,
                severity: EscalationSeverity::Critical,
            },
            status: GovernanceStatus::Approved,
            version: 1,
            effective_from: date(2025, 1, 1),
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

    fn status(rag: RagStatus, value: f64, on: NaiveDate) -> MetricStatus {
        MetricStatus {
            metric_key: MetricKey::new("tol-1"),
            metric_id: Some(MetricId::new("metric-1")),
            status: rag,
            observation_id: None,
            value: Some(value),
            observed_on: Some(on),
            limits: Some(Limits {
                soft: 80.0,
                hard: 90.0,
            }),
        }
    }

    fn engine() -> (Arc<InMemoryAppetiteStorage>, BreachRuleEngine) {
        let storage = Arc::new(InMemoryAppetiteStorage::new());
        let engine = BreachRuleEngine::new(storage.clone());
        (storage, engine)
    }

    #[tokio::test]
    async fn point_in_time_opens_once_and_resolves_on_green() {
        let (storage, engine) = engine();
        let metric = metric(BreachMode::PointInTime);

        let first = engine
            .apply(&metric, &status(RagStatus::Amber, 85.0, date(2025, 1, 31)), Utc::now())
            .await
            .unwrap();
        assert!(first.opened.is_some());
        assert_eq!(first.escalation.unwrap().severity, EscalationSeverity::Critical);

        let second = engine
            .apply(&metric, &status(RagStatus::Amber, 86.0, date(2025, 2, 28)), Utc::now())
            .await
            .unwrap();
        assert!(second.opened.is_none());
        assert!(second.escalation.is_none());

        let green = engine
            .apply(&metric, &status(RagStatus::Green, 50.0, date(2025, 3, 31)), Utc::now())
            .await
            .unwrap();
        assert_eq!(green.resolved.len(), 1);
        assert_eq!(green.resolved[0].resolved_at, Some(date(2025, 3, 31)));
        assert!(storage.open_breaches(&metric.metric_key).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn point_in_time_worsening_replaces_soft_with_hard() {
        let (storage, engine) = engine();
        let metric = metric(BreachMode::PointInTime);

        engine
            .apply(&metric, &status(RagStatus::Amber, 85.0, date(2025, 1, 31)), Utc::now())
            .await
            .unwrap();
        let worse = engine
            .apply(&metric, &status(RagStatus::Red, 95.0, date(2025, 2, 28)), Utc::now())
            .await
            .unwrap();
        assert_eq!(worse.resolved.len(), 1);
        let opened = worse.opened.unwrap();
        assert_eq!(opened.breach_type, BreachType::Hard);
        assert_eq!(opened.limit_value, 90.0);

        let open = storage.open_breaches(&metric.metric_key).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].breach_type, BreachType::Hard);
    }

    #[tokio::test]
    async fn sustained_escalates_on_third_consecutive_period() {
        let (_storage, engine) = engine();
        let metric = metric(BreachMode::SustainedNPeriods { periods: 3 });

        let dates = [date(2025, 1, 31), date(2025, 2, 28), date(2025, 3, 31)];
        let mut fired = Vec::new();
        for on in dates {
            let outcome = engine
                .apply(&metric, &status(RagStatus::Amber, 85.0, on), Utc::now())
                .await
                .unwrap();
            fired.push(outcome.escalation.map(|e| e.count));
        }
        assert_eq!(fired, vec![None, None, Some(3)]);
    }

    #[tokio::test]
    async fn sustained_run_stops_at_a_gap() {
        let (_storage, engine) = engine();
        let metric = metric(BreachMode::SustainedNPeriods { periods: 2 });

        engine
            .apply(&metric, &status(RagStatus::Amber, 85.0, date(2025, 1, 31)), Utc::now())
            .await
            .unwrap();
        let gap = engine
            .apply(&metric, &status(RagStatus::Amber, 85.0, date(2025, 3, 31)), Utc::now())
            .await
            .unwrap();
        assert!(gap.escalation.is_none());
    }

    #[tokio::test]
    async fn replaying_a_period_does_not_escalate_twice() {
        let (storage, engine) = engine();
        let metric = metric(BreachMode::SustainedNPeriods { periods: 1 });
        let reading = status(RagStatus::Red, 95.0, date(2025, 1, 31));

        let first = engine.apply(&metric, &reading, Utc::now()).await.unwrap();
        let replay = engine.apply(&metric, &reading, Utc::now()).await.unwrap();
        assert!(first.escalation.is_some());
        assert!(replay.escalation.is_none());
        assert_eq!(
            storage.breaches_for_metric(&metric.metric_key).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn window_counts_non_consecutive_breaches_of_the_chosen_type() {
        let (_storage, engine) = engine();
        let metric = metric(BreachMode::NBreachesInWindow {
            count: 2,
            window_days: 90,
            breach_type: Some(BreachType::Hard),
        });

        let soft = engine
            .apply(&metric, &status(RagStatus::Amber, 85.0, date(2025, 1, 31)), Utc::now())
            .await
            .unwrap();
        assert!(soft.escalation.is_none());
        let hard = engine
            .apply(&metric, &status(RagStatus::Red, 95.0, date(2025, 2, 28)), Utc::now())
            .await
            .unwrap();
        assert!(hard.escalation.is_none());
        engine
            .apply(&metric, &status(RagStatus::Green, 10.0, date(2025, 3, 15)), Utc::now())
            .await
            .unwrap();
        let again = engine
            .apply(&metric, &status(RagStatus::Red, 92.0, date(2025, 4, 30)), Utc::now())
            .await
            .unwrap();
        assert_eq!(again.escalation.map(|e| e.count), Some(2));
    }

    #[tokio::test]
    async fn late_green_reading_leaves_newer_breach_open() {
        let (storage, engine) = engine();
        let metric = metric(BreachMode::PointInTime);

        engine
            .apply(&metric, &status(RagStatus::Red, 95.0, date(2025, 3, 31)), Utc::now())
            .await
            .unwrap();
        let backfill = engine
            .apply(&metric, &status(RagStatus::Green, 50.0, date(2025, 1, 31)), Utc::now())
            .await
            .unwrap();
        assert!(backfill.resolved.is_empty());

        let open = storage.open_breaches(&metric.metric_key).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].measurement_date, date(2025, 3, 31));
    }

    #[tokio::test]
    async fn late_breach_reading_does_not_displace_newer_event() {
        let (storage, engine) = engine();
        let metric = metric(BreachMode::PointInTime);

        engine
            .apply(&metric, &status(RagStatus::Amber, 85.0, date(2025, 3, 31)), Utc::now())
            .await
            .unwrap();
        let backfill = engine
            .apply(&metric, &status(RagStatus::Red, 95.0, date(2025, 1, 31)), Utc::now())
            .await
            .unwrap();
        assert_eq!(backfill, BreachOutcome::default());

        let open = storage.open_breaches(&metric.metric_key).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].breach_type, BreachType::Soft);
    }

    #[tokio::test]
    async fn point_in_time_reopens_after_green_within_one_period() {
        let (storage, engine) = engine();
        let metric = metric(BreachMode::PointInTime);

        for (rag, value, day) in [(RagStatus::Red, 95.0, 10), (RagStatus::Green, 50.0, 20)] {
            engine
                .apply(&metric, &status(rag, value, date(2025, 1, day)), Utc::now())
                .await
                .unwrap();
        }
        let again = engine
            .apply(&metric, &status(RagStatus::Red, 96.0, date(2025, 1, 30)), Utc::now())
            .await
            .unwrap();
        assert_eq!(again.opened.map(|e| e.observed_value), Some(96.0));
        assert_eq!(again.escalation.map(|e| e.count), Some(1));
        assert_eq!(storage.open_breaches(&metric.metric_key).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn sustained_reopens_a_period_resolved_earlier() {
        let (storage, engine) = engine();
        let metric = metric(BreachMode::SustainedNPeriods { periods: 1 });

        engine
            .apply(&metric, &status(RagStatus::Red, 95.0, date(2025, 1, 10)), Utc::now())
            .await
            .unwrap();
        engine
            .apply(&metric, &status(RagStatus::Green, 50.0, date(2025, 1, 20)), Utc::now())
            .await
            .unwrap();
        let again = engine
            .apply(&metric, &status(RagStatus::Red, 96.0, date(2025, 1, 30)), Utc::now())
            .await
            .unwrap();
        assert!(again.opened.is_some());
        assert_eq!(again.escalation.map(|e| e.count), Some(1));
        assert_eq!(
            storage.breaches_for_metric(&metric.metric_key).await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn window_longer_than_the_calendar_counts_all_history() {
        let (_storage, engine) = engine();
        let metric = metric(BreachMode::NBreachesInWindow {
            count: 1,
            window_days: u32::MAX,
            breach_type: None,
        });

        let outcome = engine
            .apply(&metric, &status(RagStatus::Red, 95.0, date(2025, 1, 31)), Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome.escalation.map(|e| e.count), Some(1));
    }

    #[test]
    fn window_bounds_are_exclusive_at_the_start() {
        let event = |on: NaiveDate, period: i64| BreachEvent {
            breach_id: BreachId::generate(),
            metric_key: MetricKey::new("tol-1"),
            metric_id: MetricId::new("metric-1"),
            breach_type: BreachType::Hard,
            observed_value: 95.0,
            limit_value: 90.0,
            direction: Direction::Above,
            measurement_date: on,
            period_number: period,
            resolved_at: None,
            created_at: Utc::now(),
        };
        let history = [event(date(2025, 1, 1), 1), event(date(2025, 1, 31), 2)];
        assert_eq!(breaches_in_window(&history, date(2025, 1, 31), 30, None), 1);
        assert_eq!(breaches_in_window(&history, date(2025, 1, 31), 31, None), 2);
        assert_eq!(breaches_in_window(&history, date(2025, 1, 31), u32::MAX, None), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_point_in_time_evaluations_leave_one_open_event() {
        let (storage, engine) = engine();
        let engine = Arc::new(engine);
        let metric = Arc::new(metric(BreachMode::PointInTime));

        let mut handles = Vec::new();
        for i in 0..8 {
            let engine = Arc::clone(&engine);
            let metric = Arc::clone(&metric);
            let reading = if i % 2 == 0 {
                status(RagStatus::Amber, 85.0, date(2025, 1, 31))
            } else {
                status(RagStatus::Red, 95.0, date(2025, 1, 31))
            };
            handles.push(tokio::spawn(async move {
                engine.apply(&metric, &reading, Utc::now()).await
            }));
        }
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) | Err(AppetiteError::ConcurrencyConflict(_)) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(storage.open_breaches(&metric.metric_key).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn diagnostics_leave_the_log_alone() {
        let (storage, engine) = engine();
        let metric = metric(BreachMode::PointInTime);
        let mut no_data = status(RagStatus::NoData, 0.0, date(2025, 1, 31));
        no_data.value = None;
        no_data.observed_on = None;

        let outcome = engine.apply(&metric, &no_data, Utc::now()).await.unwrap();
        assert_eq!(outcome, BreachOutcome::default());
        assert!(storage
            .breaches_for_metric(&metric.metric_key)
            .await
            .unwrap()
            .is_empty());
    }
}

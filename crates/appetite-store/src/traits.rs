use crate::StorageResult;
use appetite_types::{
    ActorId, BreachEvent, BreachId, Category, Control, ControlId, CoverageLink, GovernanceStatus,
    Indicator, IndicatorId, MetricId, MetricKey, Observation, ObservationId, ObservationStatus,
    OrgId, Outcome, OutcomeId, RecalcRun, ResidualScore, Risk, RiskControlLink, RiskId, RunId,
    RunStatus, RunType, ToleranceMetric,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

/// Generic query window for paged reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryWindow {
    pub limit: usize,
    pub offset: usize,
}

/// Date range used to pick the latest observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservationWindow {
    /// Inclusive lower bound, if any.
    pub from: Option<NaiveDate>,
    /// Inclusive upper bound.
    pub to: NaiveDate,
}

impl ObservationWindow {
    pub fn up_to(to: NaiveDate) -> Self {
        Self { from: None, to }
    }

    pub fn between(from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            from: Some(from),
            to,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date <= self.to && self.from.map_or(true, |from| from <= date)
    }
}

/// Reference records supplied by the surrounding application.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn put_outcome(&self, outcome: Outcome) -> StorageResult<()>;
    async fn get_outcome(&self, outcome_id: &OutcomeId) -> StorageResult<Option<Outcome>>;

    async fn put_indicator(&self, indicator: Indicator) -> StorageResult<()>;
    async fn get_indicator(&self, indicator_id: &IndicatorId) -> StorageResult<Option<Indicator>>;
    async fn list_indicators(&self, org_id: &OrgId) -> StorageResult<Vec<Indicator>>;

    async fn put_category(&self, category: Category) -> StorageResult<()>;
    async fn list_categories(&self, org_id: &OrgId) -> StorageResult<Vec<Category>>;
}

/// Versioned tolerance metrics.
///
/// Versions sharing a key form an arena with an explicit current pointer.
/// At most one version per key is `approved` at any time.
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Insert a new draft version.
    ///
    /// A version without `supersedes` starts a new key and conflicts if the
    /// key already has versions. A version with `supersedes` must name an
    /// existing version of the same key.
    async fn insert_metric(&self, metric: ToleranceMetric) -> StorageResult<()>;

    async fn get_metric(&self, metric_id: &MetricId) -> StorageResult<Option<ToleranceMetric>>;

    /// The approved version the current pointer names, if any.
    async fn current_metric(&self, key: &MetricKey) -> StorageResult<Option<ToleranceMetric>>;

    /// All versions of a key, oldest first.
    async fn metric_versions(&self, key: &MetricKey) -> StorageResult<Vec<ToleranceMetric>>;

    /// All versions of every metric attached to an outcome.
    async fn metrics_for_outcome(&self, outcome_id: &OutcomeId)
        -> StorageResult<Vec<ToleranceMetric>>;

    /// All versions of every metric in an organization.
    async fn metrics_for_org(&self, org_id: &OrgId) -> StorageResult<Vec<ToleranceMetric>>;

    /// Replace the editable fields of a stored draft.
    async fn update_draft_metric(&self, metric: ToleranceMetric) -> StorageResult<()>;

    /// Move a version between two non-approved states.
    async fn transition_metric(
        &self,
        metric_id: &MetricId,
        expected_from: GovernanceStatus,
        to: GovernanceStatus,
        updated_at: DateTime<Utc>,
    ) -> StorageResult<ToleranceMetric>;

    /// Atomically approve a pending version and make it current.
    ///
    /// The current pointer must still name the version this one supersedes
    /// (or be empty for a first version); otherwise the promotion lost a race
    /// and fails with a conflict. The replaced version becomes `superseded`
    /// with `effective_to` and `superseded_by` set.
    async fn promote_metric(
        &self,
        metric_id: &MetricId,
        approved_by: &ActorId,
        approved_at: DateTime<Utc>,
    ) -> StorageResult<ToleranceMetric>;

    /// Retire the current version and clear the current pointer.
    async fn retire_metric(
        &self,
        metric_id: &MetricId,
        effective_to: NaiveDate,
        updated_at: DateTime<Utc>,
    ) -> StorageResult<ToleranceMetric>;

    /// Delete a draft. Any other state is an invariant violation.
    async fn delete_metric(&self, metric_id: &MetricId) -> StorageResult<()>;
}

/// The coverage graph.
#[async_trait]
pub trait CoverageStore: Send + Sync {
    /// Insert or replace the link for `(metric_key, indicator_id)`. Conflicts
    /// when it would give the metric a second primary indicator.
    async fn upsert_link(&self, link: CoverageLink) -> StorageResult<()>;

    async fn remove_link(&self, key: &MetricKey, indicator_id: &IndicatorId)
        -> StorageResult<bool>;

    async fn links_for_metric(&self, key: &MetricKey) -> StorageResult<Vec<CoverageLink>>;

    async fn links_for_indicator(&self, indicator_id: &IndicatorId)
        -> StorageResult<Vec<CoverageLink>>;
}

/// Append-only observation log.
#[async_trait]
pub trait ObservationStore: Send + Sync {
    async fn insert_observation(&self, observation: Observation) -> StorageResult<()>;

    async fn get_observation(
        &self,
        observation_id: &ObservationId,
    ) -> StorageResult<Option<Observation>>;

    /// Move an observation along its workflow, recording the reviewer for
    /// review transitions.
    async fn transition_observation(
        &self,
        observation_id: &ObservationId,
        expected_from: ObservationStatus,
        to: ObservationStatus,
        reviewer: Option<ActorId>,
        note: Option<String>,
        updated_at: DateTime<Utc>,
    ) -> StorageResult<Observation>;

    /// Atomically approve a submitted observation.
    ///
    /// A correction requires the row it supersedes to still be current and
    /// links the two. A fresh observation conflicts when a current row exists
    /// for the same indicator and date.
    async fn approve_observation(
        &self,
        observation_id: &ObservationId,
        reviewer: &ActorId,
        approved_at: DateTime<Utc>,
    ) -> StorageResult<Observation>;

    /// Delete a draft. Any other state is an invariant violation.
    async fn delete_observation(&self, observation_id: &ObservationId) -> StorageResult<()>;

    /// Latest approved, non-superseded observation inside the window.
    async fn latest_current_observation(
        &self,
        indicator_id: &IndicatorId,
        window: ObservationWindow,
    ) -> StorageResult<Option<Observation>>;

    /// Every stored row for the indicator, oldest first.
    async fn observations_for_indicator(
        &self,
        indicator_id: &IndicatorId,
    ) -> StorageResult<Vec<Observation>>;
}

/// Breach events produced by the breach rule engine.
#[async_trait]
pub trait BreachStore: Send + Sync {
    /// Conflict-safe insert keyed on the open events of
    /// `(metric_key, period_number, breach_type)`. Returns the stored event,
    /// which is the existing open one on replay. A resolved event for the same
    /// period does not block a new one.
    async fn record_breach(&self, event: BreachEvent) -> StorageResult<BreachEvent>;

    /// Open `event` as the only open event of its metric.
    ///
    /// The metric's open events must be exactly `expected_open`; they are
    /// resolved at the new event's measurement date in the same step.
    /// Any other open set is a conflict. Returns the resolved events.
    async fn open_breach(
        &self,
        event: BreachEvent,
        expected_open: &[BreachId],
    ) -> StorageResult<Vec<BreachEvent>>;

    async fn open_breaches(&self, key: &MetricKey) -> StorageResult<Vec<BreachEvent>>;

    /// All events for a key, ordered by period number then creation.
    async fn breaches_for_metric(&self, key: &MetricKey) -> StorageResult<Vec<BreachEvent>>;

    /// Close one event. Closing an already closed event, or closing it before
    /// its measurement date, is an invariant violation.
    async fn resolve_breach(
        &self,
        breach_id: &BreachId,
        resolved_at: NaiveDate,
    ) -> StorageResult<BreachEvent>;
}

/// Risks, controls and their links.
#[async_trait]
pub trait ControlStore: Send + Sync {
    async fn put_risk(&self, risk: Risk) -> StorageResult<()>;
    async fn get_risk(&self, risk_id: &RiskId) -> StorageResult<Option<Risk>>;
    async fn list_risks(&self, org_id: &OrgId) -> StorageResult<Vec<Risk>>;

    /// Write the cached residual score of a risk.
    async fn set_residual(&self, risk_id: &RiskId, residual: ResidualScore) -> StorageResult<()>;

    async fn put_control(&self, control: Control) -> StorageResult<()>;
    async fn get_control(&self, control_id: &ControlId) -> StorageResult<Option<Control>>;

    async fn upsert_control_link(&self, link: RiskControlLink) -> StorageResult<()>;
    async fn remove_control_link(&self, risk_id: &RiskId, control_id: &ControlId)
        -> StorageResult<bool>;
    async fn control_links(&self, risk_id: &RiskId) -> StorageResult<Vec<RiskControlLink>>;
}

/// Organization-wide recalculation runs.
#[async_trait]
pub trait RecalcRunStore: Send + Sync {
    /// Start a run. Conflicts while another run for the organization is
    /// still `Running`.
    async fn acquire_run(
        &self,
        org_id: &OrgId,
        run_type: RunType,
        started_at: DateTime<Utc>,
    ) -> StorageResult<RecalcRun>;

    /// Close a running run with a terminal status and its counters.
    async fn complete_run(
        &self,
        run_id: &RunId,
        status: RunStatus,
        processed: u32,
        updated: u32,
        failed: u32,
        completed_at: DateTime<Utc>,
    ) -> StorageResult<RecalcRun>;

    async fn get_run(&self, run_id: &RunId) -> StorageResult<Option<RecalcRun>>;

    /// Runs for an organization, newest first.
    async fn list_runs(&self, org_id: &OrgId, window: QueryWindow) -> StorageResult<Vec<RecalcRun>>;
}

/// Storage bundle consumed by the engine.
pub trait AppetiteStorage:
    CatalogStore
    + MetricStore
    + CoverageStore
    + ObservationStore
    + BreachStore
    + ControlStore
    + RecalcRunStore
    + Send
    + Sync
{
}

impl<T> AppetiteStorage for T where
    T: CatalogStore
        + MetricStore
        + CoverageStore
        + ObservationStore
        + BreachStore
        + ControlStore
        + RecalcRunStore
        + Send
        + Sync
{
}

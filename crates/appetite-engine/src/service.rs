//! The tolerance service facade.
//!
//! [`ToleranceService`] is what the surrounding application talks to. It
//! owns no state of its own beyond configuration: every read and write goes
//! through the [`AppetiteStorage`] adapter, and derived statuses are
//! recomputed on demand.

use crate::aggregation::worst_of;
use crate::breach::{BreachRuleEngine, Escalation};
use crate::category::CategoryTree;
use crate::config::EngineConfig;
use crate::dispatch::{self, RecomputeReason, RecomputeTask, TaskDispatcher};
use crate::error::{AppetiteError, AppetiteResult};
use crate::evaluator::{evaluate, not_in_force, EvaluationPoint, MetricStatus};
use crate::governance;
use crate::residual::{self, ResidualUpdate};
use appetite_store::{AppetiteStorage, QueryWindow};
use appetite_types::{
    ActorId, BoundConfig, BreachRule, CategoryId, ControlId, CoverageLink, Direction, Frequency,
    GovernanceStatus, IndicatorId, LinkStatus, MetricId, MetricKey, Observation, ObservationId,
    ObservationStatus, OrgId, OutcomeId, RagStatus, RecalcRun, ReportingPeriod, RiskControlLink,
    RiskId, RunId, RunStatus, RunType, ToleranceMetric,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Editable content of a tolerance metric.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub org_id: OrgId,
    pub outcome_id: OutcomeId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub direction: Option<Direction>,
    #[serde(default)]
    pub bounds: Option<BoundConfig>,
    #[serde(default)]
    pub amber_margin: Option<f64>,
    #[serde(default)]
    pub frequency: Frequency,
    #[serde(default)]
    pub breach_rule: BreachRule,
    pub effective_from: NaiveDate,
}

impl MetricDefinition {
    fn apply_to(self, metric: &mut ToleranceMetric) {
        metric.outcome_id = self.outcome_id;
        metric.name = self.name;
        metric.description = self.description;
        metric.direction = self.direction;
        metric.bounds = self.bounds;
        metric.amber_margin = self.amber_margin;
        metric.frequency = self.frequency;
        metric.breach_rule = self.breach_rule;
        metric.effective_from = self.effective_from;
    }
}

/// Aggregated status of an outcome or category.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub status: RagStatus,
    pub metrics: Vec<MetricStatus>,
}

/// Result of approving an observation, including the breach tracking it
/// triggered.
#[derive(Clone, Debug, PartialEq)]
pub struct ObservationApproval {
    pub observation: Observation,
    pub statuses: Vec<MetricStatus>,
    pub escalations: Vec<Escalation>,
}

/// How a residual recompute triggered by a link change was carried out.
#[derive(Clone, Debug, PartialEq)]
pub enum RecomputeOutcome {
    /// Handed to the residual worker.
    Queued,
    /// No worker could take it; computed in place.
    Inline(ResidualUpdate),
}

pub struct ToleranceService {
    storage: Arc<dyn AppetiteStorage>,
    config: EngineConfig,
    dispatcher: TaskDispatcher,
    breaches: BreachRuleEngine,
}

impl ToleranceService {
    pub fn new(storage: Arc<dyn AppetiteStorage>, config: EngineConfig) -> AppetiteResult<Self> {
        config.validate()?;
        Ok(Self {
            breaches: BreachRuleEngine::new(Arc::clone(&storage)),
            storage,
            config,
            dispatcher: TaskDispatcher::disabled(),
        })
    }

    /// Route control-link recomputes through `dispatcher`.
    pub fn with_dispatcher(mut self, dispatcher: TaskDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn storage(&self) -> Arc<dyn AppetiteStorage> {
        Arc::clone(&self.storage)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Tolerance metrics ───────────────────────────────────────────

    /// Create version 1 of a new metric key as a draft.
    pub async fn create_metric(
        &self,
        definition: MetricDefinition,
        created_by: &ActorId,
    ) -> AppetiteResult<ToleranceMetric> {
        if self.storage.get_outcome(&definition.outcome_id).await?.is_none() {
            return Err(AppetiteError::NotFound(format!(
                "outcome {}",
                definition.outcome_id
            )));
        }
        let now = Utc::now();
        let mut metric = ToleranceMetric {
            metric_id: MetricId::generate(),
            metric_key: MetricKey::generate(),
            org_id: definition.org_id.clone(),
            outcome_id: definition.outcome_id.clone(),
            name: String::new(),
            description: None,
            direction: None,
            bounds: None,
            amber_margin: None,
            frequency: Frequency::default(),
            breach_rule: BreachRule::default(),
            status: GovernanceStatus::Draft,
            version: 1,
            effective_from: definition.effective_from,
            effective_to: None,
            supersedes: None,
            superseded_by: None,
            created_by: created_by.clone(),
            approved_by: None,
            approved_at: None,
            created_at: now,
            updated_at: now,
        };
        definition.apply_to(&mut metric);
        governance::validate_metric_definition(&metric)?;

        self.storage.insert_metric(metric.clone()).await?;
        info!(
            metric_key = %metric.metric_key,
            metric_id = %metric.metric_id,
            created_by = %created_by,
            "metric draft created"
        );
        Ok(metric)
    }

    pub async fn get_metric(&self, metric_id: &MetricId) -> AppetiteResult<ToleranceMetric> {
        self.storage
            .get_metric(metric_id)
            .await?
            .ok_or_else(|| AppetiteError::NotFound(format!("metric {}", metric_id)))
    }

    pub async fn update_metric_draft(
        &self,
        metric_id: &MetricId,
        definition: MetricDefinition,
    ) -> AppetiteResult<ToleranceMetric> {
        let mut metric = self.get_metric(metric_id).await?;
        governance::ensure_metric_mutable(&metric)?;
        if definition.org_id != metric.org_id {
            return Err(AppetiteError::Validation(format!(
                "metric {} belongs to organization {}",
                metric_id, metric.org_id
            )));
        }
        definition.apply_to(&mut metric);
        governance::validate_metric_definition(&metric)?;
        if let Some(previous) = &metric.supersedes {
            let previous = self.get_metric(previous).await?;
            if metric.effective_from <= previous.effective_from {
                return Err(AppetiteError::Validation(format!(
                    "effective_from {} must follow {} of the superseded version",
                    metric.effective_from, previous.effective_from
                )));
            }
        }
        metric.updated_at = Utc::now();
        self.storage.update_draft_metric(metric.clone()).await?;
        debug!(metric_id = %metric_id, "metric draft updated");
        Ok(metric)
    }

    pub async fn submit_metric(
        &self,
        metric_id: &MetricId,
        submitted_by: &ActorId,
    ) -> AppetiteResult<ToleranceMetric> {
        let metric = self.get_metric(metric_id).await?;
        governance::ensure_metric_transition(&metric, GovernanceStatus::PendingApproval)?;
        governance::validate_metric_definition(&metric)?;
        let metric = self
            .storage
            .transition_metric(
                metric_id,
                GovernanceStatus::Draft,
                GovernanceStatus::PendingApproval,
                Utc::now(),
            )
            .await?;
        info!(metric_id = %metric_id, submitted_by = %submitted_by, "metric submitted for approval");
        Ok(metric)
    }

    pub async fn return_metric_to_draft(
        &self,
        metric_id: &MetricId,
        reviewer: &ActorId,
    ) -> AppetiteResult<ToleranceMetric> {
        let metric = self.get_metric(metric_id).await?;
        governance::ensure_metric_transition(&metric, GovernanceStatus::Draft)?;
        let metric = self
            .storage
            .transition_metric(
                metric_id,
                GovernanceStatus::PendingApproval,
                GovernanceStatus::Draft,
                Utc::now(),
            )
            .await?;
        info!(metric_id = %metric_id, reviewer = %reviewer, "metric returned to draft");
        Ok(metric)
    }

    /// Approve a pending version and make it the current one for its key.
    ///
    /// Fails with `ConcurrencyConflict` when another version of the key was
    /// promoted since this one was drafted.
    pub async fn approve_metric(
        &self,
        metric_id: &MetricId,
        approved_by: &ActorId,
    ) -> AppetiteResult<ToleranceMetric> {
        let metric = self.get_metric(metric_id).await?;
        governance::ensure_metric_transition(&metric, GovernanceStatus::Approved)?;
        governance::ensure_distinct_checker(&metric.created_by, approved_by)?;
        governance::validate_metric_definition(&metric)?;

        let approved = self
            .storage
            .promote_metric(metric_id, approved_by, Utc::now())
            .await?;
        info!(
            metric_key = %approved.metric_key,
            metric_id = %metric_id,
            version = approved.version,
            approved_by = %approved_by,
            "metric approved"
        );
        Ok(approved)
    }

    /// Start a new draft version that will replace an approved one.
    pub async fn supersede_metric(
        &self,
        metric_id: &MetricId,
        new_effective_from: NaiveDate,
        created_by: &ActorId,
    ) -> AppetiteResult<ToleranceMetric> {
        let current = self.get_metric(metric_id).await?;
        if current.status != GovernanceStatus::Approved {
            return Err(AppetiteError::InvalidState(format!(
                "metric {} is {}; only the approved version can be superseded",
                metric_id, current.status
            )));
        }
        if new_effective_from <= current.effective_from {
            return Err(AppetiteError::Validation(format!(
                "new version must take effect after {}",
                current.effective_from
            )));
        }

        let latest = self
            .storage
            .metric_versions(&current.metric_key)
            .await?
            .iter()
            .map(|m| m.version)
            .max()
            .unwrap_or(current.version);
        let now = Utc::now();
        let draft = ToleranceMetric {
            metric_id: MetricId::generate(),
            status: GovernanceStatus::Draft,
            version: latest + 1,
            effective_from: new_effective_from,
            effective_to: None,
            supersedes: Some(current.metric_id.clone()),
            superseded_by: None,
            created_by: created_by.clone(),
            approved_by: None,
            approved_at: None,
            created_at: now,
            updated_at: now,
            ..current
        };
        self.storage.insert_metric(draft.clone()).await?;
        info!(
            metric_key = %draft.metric_key,
            supersedes = %metric_id,
            version = draft.version,
            "superseding draft created"
        );
        Ok(draft)
    }

    pub async fn retire_metric(
        &self,
        metric_id: &MetricId,
        effective_to: NaiveDate,
        retired_by: &ActorId,
    ) -> AppetiteResult<ToleranceMetric> {
        let metric = self.get_metric(metric_id).await?;
        governance::ensure_metric_transition(&metric, GovernanceStatus::Retired)?;
        if effective_to <= metric.effective_from {
            return Err(AppetiteError::Validation(format!(
                "retirement date {} must follow {}",
                effective_to, metric.effective_from
            )));
        }
        let retired = self
            .storage
            .retire_metric(metric_id, effective_to, Utc::now())
            .await?;
        info!(metric_id = %metric_id, retired_by = %retired_by, %effective_to, "metric retired");
        Ok(retired)
    }

    pub async fn delete_metric(&self, metric_id: &MetricId) -> AppetiteResult<()> {
        let metric = self.get_metric(metric_id).await?;
        governance::ensure_metric_deletable(&metric)?;
        self.storage.delete_metric(metric_id).await?;
        info!(metric_id = %metric_id, "metric draft deleted");
        Ok(())
    }

    /// Every version of a key, oldest first.
    pub async fn metric_history(&self, key: &MetricKey) -> AppetiteResult<Vec<ToleranceMetric>> {
        let versions = self.storage.metric_versions(key).await?;
        if versions.is_empty() {
            return Err(AppetiteError::NotFound(format!("metric key {}", key)));
        }
        Ok(versions)
    }

    // ── Coverage graph ──────────────────────────────────────────────

    pub async fn link_indicator(&self, link: CoverageLink) -> AppetiteResult<()> {
        governance::validate_coverage_link(&link)?;
        if self.storage.metric_versions(&link.metric_key).await?.is_empty() {
            return Err(AppetiteError::NotFound(format!("metric key {}", link.metric_key)));
        }
        if self.storage.get_indicator(&link.indicator_id).await?.is_none() {
            return Err(AppetiteError::NotFound(format!("indicator {}", link.indicator_id)));
        }
        info!(
            metric_key = %link.metric_key,
            indicator_id = %link.indicator_id,
            strength = ?link.strength,
            "coverage link saved"
        );
        self.storage.upsert_link(link).await?;
        Ok(())
    }

    pub async fn unlink_indicator(
        &self,
        key: &MetricKey,
        indicator_id: &IndicatorId,
    ) -> AppetiteResult<bool> {
        Ok(self.storage.remove_link(key, indicator_id).await?)
    }

    pub async fn primary_indicator(&self, key: &MetricKey) -> AppetiteResult<Option<CoverageLink>> {
        Ok(self
            .storage
            .links_for_metric(key)
            .await?
            .into_iter()
            .find(CoverageLink::is_primary))
    }

    pub async fn links_for_metric(&self, key: &MetricKey) -> AppetiteResult<Vec<CoverageLink>> {
        Ok(self.storage.links_for_metric(key).await?)
    }

    pub async fn metrics_for_indicator(
        &self,
        indicator_id: &IndicatorId,
    ) -> AppetiteResult<Vec<CoverageLink>> {
        Ok(self.storage.links_for_indicator(indicator_id).await?)
    }

    /// Keys of the metrics for which the indicator is the primary KRI.
    pub async fn primary_metrics_for_indicator(
        &self,
        indicator_id: &IndicatorId,
    ) -> AppetiteResult<Vec<MetricKey>> {
        Ok(self
            .storage
            .links_for_indicator(indicator_id)
            .await?
            .into_iter()
            .filter(CoverageLink::is_primary)
            .map(|link| link.metric_key)
            .collect())
    }

    // ── Observations ────────────────────────────────────────────────

    pub async fn draft_observation(
        &self,
        indicator_id: &IndicatorId,
        observed_on: NaiveDate,
        value: f64,
        submitted_by: &ActorId,
    ) -> AppetiteResult<Observation> {
        self.new_observation(indicator_id, observed_on, value, submitted_by, ObservationStatus::Draft)
            .await
    }

    /// Record a reading straight into review.
    pub async fn record_observation(
        &self,
        indicator_id: &IndicatorId,
        observed_on: NaiveDate,
        value: f64,
        submitted_by: &ActorId,
    ) -> AppetiteResult<Observation> {
        self.new_observation(
            indicator_id,
            observed_on,
            value,
            submitted_by,
            ObservationStatus::Submitted,
        )
        .await
    }

    async fn new_observation(
        &self,
        indicator_id: &IndicatorId,
        observed_on: NaiveDate,
        value: f64,
        submitted_by: &ActorId,
        status: ObservationStatus,
    ) -> AppetiteResult<Observation> {
        if !value.is_finite() {
            return Err(AppetiteError::Validation(format!(
                "observation value {} is not finite",
                value
            )));
        }
        if self.storage.get_indicator(indicator_id).await?.is_none() {
            return Err(AppetiteError::NotFound(format!("indicator {}", indicator_id)));
        }
        let now = Utc::now();
        let observation = Observation {
            observation_id: ObservationId::generate(),
            indicator_id: indicator_id.clone(),
            observed_on,
            value,
            status,
            version: 1,
            supersedes: None,
            superseded_by: None,
            submitted_by: submitted_by.clone(),
            reviewed_by: None,
            reviewed_at: None,
            review_note: None,
            created_at: now,
            updated_at: now,
        };
        self.storage.insert_observation(observation.clone()).await?;
        debug!(
            observation_id = %observation.observation_id,
            indicator_id = %indicator_id,
            %observed_on,
            value,
            status = %status,
            "observation recorded"
        );
        Ok(observation)
    }

    pub async fn get_observation(&self, observation_id: &ObservationId) -> AppetiteResult<Observation> {
        self.storage
            .get_observation(observation_id)
            .await?
            .ok_or_else(|| AppetiteError::NotFound(format!("observation {}", observation_id)))
    }

    pub async fn submit_observation(&self, observation_id: &ObservationId) -> AppetiteResult<Observation> {
        let observation = self.get_observation(observation_id).await?;
        governance::ensure_observation_transition(&observation, ObservationStatus::Submitted)?;
        Ok(self
            .storage
            .transition_observation(
                observation_id,
                ObservationStatus::Draft,
                ObservationStatus::Submitted,
                None,
                None,
                Utc::now(),
            )
            .await?)
    }

    /// Send a rejected observation back to draft.
    pub async fn reopen_observation(&self, observation_id: &ObservationId) -> AppetiteResult<Observation> {
        let observation = self.get_observation(observation_id).await?;
        governance::ensure_observation_transition(&observation, ObservationStatus::Draft)?;
        Ok(self
            .storage
            .transition_observation(
                observation_id,
                ObservationStatus::Rejected,
                ObservationStatus::Draft,
                None,
                None,
                Utc::now(),
            )
            .await?)
    }

    /// Approve a submitted observation and track breaches of every metric it
    /// is the primary KRI for.
    pub async fn approve_observation(
        &self,
        observation_id: &ObservationId,
        approved_by: &ActorId,
    ) -> AppetiteResult<ObservationApproval> {
        let observation = self.get_observation(observation_id).await?;
        governance::ensure_observation_transition(&observation, ObservationStatus::Approved)?;
        governance::ensure_distinct_checker(&observation.submitted_by, approved_by)?;

        let observation = self
            .storage
            .approve_observation(observation_id, approved_by, Utc::now())
            .await?;
        info!(
            observation_id = %observation_id,
            indicator_id = %observation.indicator_id,
            approved_by = %approved_by,
            "observation approved"
        );

        let mut statuses = Vec::new();
        let mut escalations = Vec::new();
        for key in self.primary_metrics_for_indicator(&observation.indicator_id).await? {
            match self.track_breaches(&key, observation.observed_on).await {
                Ok((status, escalation)) => {
                    statuses.push(status);
                    escalations.extend(escalation);
                }
                Err(e) => {
                    warn!(metric_key = %key, error = %e, "breach tracking failed");
                }
            }
        }

        Ok(ObservationApproval {
            observation,
            statuses,
            escalations,
        })
    }

    async fn track_breaches(
        &self,
        key: &MetricKey,
        observed_on: NaiveDate,
    ) -> AppetiteResult<(MetricStatus, Option<Escalation>)> {
        let versions = self.storage.metric_versions(key).await?;
        let Some(metric) = in_force(versions, observed_on) else {
            return Ok((not_in_force(key.clone()), None));
        };
        let point = EvaluationPoint::Period(ReportingPeriod::containing(metric.frequency, observed_on));
        let status = self.evaluate_version(&metric, &point).await?;
        let outcome = self.breaches.apply(&metric, &status, Utc::now()).await?;
        Ok((status, outcome.escalation))
    }

    /// Evaluate the version of `key` in force at `point` and feed the status
    /// to breach tracking. Returns whether the breach log changed.
    pub async fn track_metric(&self, key: &MetricKey, point: &EvaluationPoint) -> AppetiteResult<bool> {
        let versions = self.storage.metric_versions(key).await?;
        let Some(metric) = in_force(versions, point.reference_date()) else {
            return Ok(false);
        };
        let status = self.evaluate_version(&metric, point).await?;
        let outcome = self.breaches.apply(&metric, &status, Utc::now()).await?;
        Ok(outcome.opened.is_some() || !outcome.resolved.is_empty())
    }

    pub async fn reject_observation(
        &self,
        observation_id: &ObservationId,
        rejected_by: &ActorId,
        note: Option<String>,
    ) -> AppetiteResult<Observation> {
        let observation = self.get_observation(observation_id).await?;
        governance::ensure_observation_transition(&observation, ObservationStatus::Rejected)?;
        governance::ensure_distinct_checker(&observation.submitted_by, rejected_by)?;
        let rejected = self
            .storage
            .transition_observation(
                observation_id,
                ObservationStatus::Submitted,
                ObservationStatus::Rejected,
                Some(rejected_by.clone()),
                note,
                Utc::now(),
            )
            .await?;
        info!(observation_id = %observation_id, rejected_by = %rejected_by, "observation rejected");
        Ok(rejected)
    }

    /// Submit a corrected value for an approved observation.
    ///
    /// The original stays current until the correction is approved.
    pub async fn correct_observation(
        &self,
        observation_id: &ObservationId,
        value: f64,
        submitted_by: &ActorId,
    ) -> AppetiteResult<Observation> {
        let original = self.get_observation(observation_id).await?;
        if !original.is_current() {
            return Err(AppetiteError::InvalidState(format!(
                "observation {} is not the current approved value",
                observation_id
            )));
        }
        if !value.is_finite() {
            return Err(AppetiteError::Validation(format!(
                "observation value {} is not finite",
                value
            )));
        }
        let now = Utc::now();
        let correction = Observation {
            observation_id: ObservationId::generate(),
            value,
            status: ObservationStatus::Submitted,
            version: original.version + 1,
            supersedes: Some(original.observation_id.clone()),
            superseded_by: None,
            submitted_by: submitted_by.clone(),
            reviewed_by: None,
            reviewed_at: None,
            review_note: None,
            created_at: now,
            updated_at: now,
            ..original
        };
        self.storage.insert_observation(correction.clone()).await?;
        info!(
            observation_id = %correction.observation_id,
            supersedes = %observation_id,
            "observation correction submitted"
        );
        Ok(correction)
    }

    pub async fn delete_observation(&self, observation_id: &ObservationId) -> AppetiteResult<()> {
        let observation = self.get_observation(observation_id).await?;
        if !observation.status.is_deletable() {
            return Err(AppetiteError::InvalidState(format!(
                "observation {} is {} and cannot be deleted",
                observation_id, observation.status
            )));
        }
        self.storage.delete_observation(observation_id).await?;
        Ok(())
    }

    // ── Status evaluation ───────────────────────────────────────────

    /// Status of the metric `metric_id` belongs to, using the version in force
    /// at the evaluation point.
    pub async fn evaluate_metric_status(
        &self,
        metric_id: &MetricId,
        point: &EvaluationPoint,
    ) -> AppetiteResult<MetricStatus> {
        let metric = self.get_metric(metric_id).await?;
        self.evaluate_key_status(&metric.metric_key, point).await
    }

    pub async fn evaluate_key_status(
        &self,
        key: &MetricKey,
        point: &EvaluationPoint,
    ) -> AppetiteResult<MetricStatus> {
        let versions = self.metric_history(key).await?;
        match in_force(versions, point.reference_date()) {
            Some(metric) => self.evaluate_version(&metric, point).await,
            None => Ok(not_in_force(key.clone())),
        }
    }

    async fn evaluate_version(
        &self,
        metric: &ToleranceMetric,
        point: &EvaluationPoint,
    ) -> AppetiteResult<MetricStatus> {
        let primary = self.primary_indicator(&metric.metric_key).await?;
        let observation = match &primary {
            Some(link) => {
                self.storage
                    .latest_current_observation(&link.indicator_id, point.window())
                    .await?
            }
            None => None,
        };
        let status = evaluate(
            metric,
            primary.as_ref(),
            observation.as_ref(),
            self.config.between_amber_margin,
        );
        debug!(
            metric_key = %metric.metric_key,
            version = metric.version,
            status = %status.status,
            value = ?status.value,
            "metric evaluated"
        );
        Ok(status)
    }

    /// Worst-of status across the metrics of an outcome. Defaults to today
    /// when no period is given.
    pub async fn evaluate_container_status(
        &self,
        outcome_id: &OutcomeId,
        period: Option<ReportingPeriod>,
    ) -> AppetiteResult<ContainerStatus> {
        if self.storage.get_outcome(outcome_id).await?.is_none() {
            return Err(AppetiteError::NotFound(format!("outcome {}", outcome_id)));
        }
        let keys: BTreeSet<MetricKey> = self
            .storage
            .metrics_for_outcome(outcome_id)
            .await?
            .into_iter()
            .map(|m| m.metric_key)
            .collect();
        let status = self
            .aggregate(keys, point_for(period), |metric| &metric.outcome_id == outcome_id)
            .await?;
        debug!(outcome_id = %outcome_id, status = %status.status, "outcome evaluated");
        Ok(status)
    }

    /// Worst-of status across the metrics whose primary KRI sits in the
    /// category subtree.
    pub async fn evaluate_category_status(
        &self,
        org_id: &OrgId,
        category_id: &CategoryId,
        period: Option<ReportingPeriod>,
    ) -> AppetiteResult<ContainerStatus> {
        let tree = CategoryTree::build(
            self.storage.list_categories(org_id).await?,
            self.config.max_category_depth,
        )?;
        let subtree: BTreeSet<CategoryId> = tree.subtree(category_id)?.into_iter().collect();

        let mut keys = BTreeSet::new();
        for indicator in self.storage.list_indicators(org_id).await? {
            let in_subtree = indicator
                .category_id
                .as_ref()
                .map_or(false, |c| subtree.contains(c));
            if in_subtree {
                keys.extend(self.primary_metrics_for_indicator(&indicator.indicator_id).await?);
            }
        }
        let status = self.aggregate(keys, point_for(period), |_| true).await?;
        debug!(category_id = %category_id, status = %status.status, "category evaluated");
        Ok(status)
    }

    /// Roll up the versions of `keys` in force at `point` that `belongs`
    /// accepts. Keys with no version in force are skipped.
    async fn aggregate(
        &self,
        keys: BTreeSet<MetricKey>,
        point: EvaluationPoint,
        belongs: impl Fn(&ToleranceMetric) -> bool + Send,
    ) -> AppetiteResult<ContainerStatus> {
        let mut metrics = Vec::new();
        for key in keys {
            let versions = self.storage.metric_versions(&key).await?;
            match in_force(versions, point.reference_date()) {
                Some(metric) if belongs(&metric) => {
                    metrics.push(self.evaluate_version(&metric, &point).await?);
                }
                _ => {}
            }
        }
        Ok(ContainerStatus {
            status: worst_of(metrics.iter().map(|m| m.status)),
            metrics,
        })
    }

    // ── Controls and residual risk ──────────────────────────────────

    pub async fn link_control(
        &self,
        risk_id: &RiskId,
        control_id: &ControlId,
    ) -> AppetiteResult<RecomputeOutcome> {
        self.set_control_link(risk_id, control_id, LinkStatus::Active, RecomputeReason::ControlLinked)
            .await
    }

    pub async fn set_control_link_status(
        &self,
        risk_id: &RiskId,
        control_id: &ControlId,
        status: LinkStatus,
    ) -> AppetiteResult<RecomputeOutcome> {
        let exists = self
            .storage
            .control_links(risk_id)
            .await?
            .iter()
            .any(|link| &link.control_id == control_id);
        if !exists {
            return Err(AppetiteError::NotFound(format!(
                "control {} is not linked to risk {}",
                control_id, risk_id
            )));
        }
        self.set_control_link(risk_id, control_id, status, RecomputeReason::LinkStatusChanged)
            .await
    }

    async fn set_control_link(
        &self,
        risk_id: &RiskId,
        control_id: &ControlId,
        status: LinkStatus,
        reason: RecomputeReason,
    ) -> AppetiteResult<RecomputeOutcome> {
        if self.storage.get_risk(risk_id).await?.is_none() {
            return Err(AppetiteError::NotFound(format!("risk {}", risk_id)));
        }
        if self.storage.get_control(control_id).await?.is_none() {
            return Err(AppetiteError::NotFound(format!("control {}", control_id)));
        }
        self.storage
            .upsert_control_link(RiskControlLink {
                risk_id: risk_id.clone(),
                control_id: control_id.clone(),
                status,
                linked_at: Utc::now(),
            })
            .await?;
        info!(risk_id = %risk_id, control_id = %control_id, ?status, "control link saved");
        self.request_recompute(risk_id, reason).await
    }

    pub async fn unlink_control(
        &self,
        risk_id: &RiskId,
        control_id: &ControlId,
    ) -> AppetiteResult<Option<RecomputeOutcome>> {
        if !self.storage.remove_control_link(risk_id, control_id).await? {
            return Ok(None);
        }
        info!(risk_id = %risk_id, control_id = %control_id, "control link removed");
        Ok(Some(
            self.request_recompute(risk_id, RecomputeReason::ControlUnlinked)
                .await?,
        ))
    }

    async fn request_recompute(
        &self,
        risk_id: &RiskId,
        reason: RecomputeReason,
    ) -> AppetiteResult<RecomputeOutcome> {
        let task = RecomputeTask::ResidualRisk {
            risk_id: risk_id.clone(),
            reason,
        };
        match self.dispatcher.dispatch(task) {
            Ok(()) => Ok(RecomputeOutcome::Queued),
            Err(task) => {
                let update = dispatch::execute(self.storage.as_ref(), &task).await?;
                Ok(RecomputeOutcome::Inline(update))
            }
        }
    }

    pub async fn recalculate_residual_risk(&self, risk_id: &RiskId) -> AppetiteResult<ResidualUpdate> {
        residual::recalculate(self.storage.as_ref(), risk_id).await
    }

    // ── Recalculation runs ──────────────────────────────────────────

    /// Take the organization's sweep lock. `ConcurrencyConflict` while
    /// another run is still running.
    pub async fn acquire_recalc_lock(
        &self,
        org_id: &OrgId,
        run_type: RunType,
    ) -> AppetiteResult<RecalcRun> {
        let run = self.storage.acquire_run(org_id, run_type, Utc::now()).await?;
        info!(org_id = %org_id, run_id = %run.run_id, ?run_type, "recalc lock acquired");
        Ok(run)
    }

    pub async fn complete_recalc_run(
        &self,
        run_id: &RunId,
        status: RunStatus,
        processed: u32,
        updated: u32,
        failed: u32,
    ) -> AppetiteResult<RecalcRun> {
        if !status.is_terminal() {
            return Err(AppetiteError::Validation(
                "a run can only be completed with a terminal status".to_string(),
            ));
        }
        if updated > processed || failed > processed {
            return Err(AppetiteError::Validation(format!(
                "run counters out of range: processed {}, updated {}, failed {}",
                processed, updated, failed
            )));
        }
        let run = self
            .storage
            .complete_run(run_id, status, processed, updated, failed, Utc::now())
            .await?;
        info!(run_id = %run_id, ?status, processed, updated, failed, "recalc run completed");
        Ok(run)
    }

    pub async fn recalc_runs(&self, org_id: &OrgId, window: QueryWindow) -> AppetiteResult<Vec<RecalcRun>> {
        Ok(self.storage.list_runs(org_id, window).await?)
    }
}

/// The version of a key that governed `date`.
fn in_force(versions: Vec<ToleranceMetric>, date: NaiveDate) -> Option<ToleranceMetric> {
    versions
        .into_iter()
        .filter(|m| m.is_effective_on(date))
        .max_by_key(|m| m.version)
}

fn point_for(period: Option<ReportingPeriod>) -> EvaluationPoint {
    match period {
        Some(period) => EvaluationPoint::Period(period),
        None => EvaluationPoint::AsOf(Utc::now().date_naive()),
    }
}

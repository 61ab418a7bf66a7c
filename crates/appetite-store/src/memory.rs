//! In-memory reference implementation of the appetite storage traits.
//!
//! This adapter is deterministic and test-friendly. Each table sits behind its
//! own lock, and every compare-and-swap happens while that lock is held, which
//! is what makes the uniqueness rules hold under concurrent callers.

use crate::traits::{
    BreachStore, CatalogStore, ControlStore, CoverageStore, MetricStore, ObservationStore,
    ObservationWindow, QueryWindow, RecalcRunStore,
};
use crate::{StorageError, StorageResult};
use appetite_types::{
    ActorId, BreachEvent, BreachId, Category, CategoryId, Control, ControlId, CoverageLink,
    GovernanceStatus, Indicator, IndicatorId, MetricId, MetricKey, Observation, ObservationId,
    ObservationStatus, OrgId, Outcome, OutcomeId, RecalcRun, ResidualScore, Risk,
    RiskControlLink, RiskId, RunId, RunStatus, RunType, ToleranceMetric,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// In-memory appetite storage adapter.
#[derive(Default)]
pub struct InMemoryAppetiteStorage {
    outcomes: RwLock<HashMap<OutcomeId, Outcome>>,
    indicators: RwLock<HashMap<IndicatorId, Indicator>>,
    categories: RwLock<HashMap<CategoryId, Category>>,
    metrics: RwLock<MetricArena>,
    links: RwLock<Vec<CoverageLink>>,
    observations: RwLock<HashMap<ObservationId, Observation>>,
    breaches: RwLock<Vec<BreachEvent>>,
    risks: RwLock<HashMap<RiskId, Risk>>,
    controls: RwLock<HashMap<ControlId, Control>>,
    control_links: RwLock<HashMap<(RiskId, ControlId), RiskControlLink>>,
    runs: RwLock<RunTable>,
}

impl InMemoryAppetiteStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn read<'a, T>(lock: &'a RwLock<T>, table: &str) -> StorageResult<RwLockReadGuard<'a, T>> {
    lock.read()
        .map_err(|_| StorageError::Backend(format!("{} lock poisoned", table)))
}

fn write<'a, T>(lock: &'a RwLock<T>, table: &str) -> StorageResult<RwLockWriteGuard<'a, T>> {
    lock.write()
        .map_err(|_| StorageError::Backend(format!("{} lock poisoned", table)))
}

// ── Metric arena ────────────────────────────────────────────────────────

/// Versions of every metric, indexed by id and by key. Deleted drafts leave a
/// tombstone so indices stay stable.
#[derive(Default)]
struct MetricArena {
    slots: Vec<Option<ToleranceMetric>>,
    by_id: HashMap<MetricId, usize>,
    keys: HashMap<MetricKey, KeyIndex>,
}

#[derive(Default)]
struct KeyIndex {
    versions: Vec<usize>,
    current: Option<usize>,
}

impl MetricArena {
    fn slot(&self, metric_id: &MetricId) -> StorageResult<usize> {
        self.by_id
            .get(metric_id)
            .copied()
            .ok_or_else(|| StorageError::NotFound(format!("metric {} not found", metric_id)))
    }

    fn get(&self, idx: usize) -> Option<&ToleranceMetric> {
        self.slots.get(idx).and_then(Option::as_ref)
    }

    fn get_mut(&mut self, idx: usize) -> StorageResult<&mut ToleranceMetric> {
        self.slots
            .get_mut(idx)
            .and_then(Option::as_mut)
            .ok_or_else(|| StorageError::Backend(format!("dangling metric slot {}", idx)))
    }

    fn versions(&self, key: &MetricKey) -> Vec<ToleranceMetric> {
        self.keys
            .get(key)
            .map(|index| {
                index
                    .versions
                    .iter()
                    .filter_map(|idx| self.get(*idx).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn current(&self, key: &MetricKey) -> Option<&ToleranceMetric> {
        self.keys
            .get(key)
            .and_then(|index| index.current)
            .and_then(|idx| self.get(idx))
    }
}

// ── Run table ───────────────────────────────────────────────────────────

#[derive(Default)]
struct RunTable {
    runs: HashMap<RunId, RecalcRun>,
    /// Unique on (organization, running).
    running: HashMap<OrgId, RunId>,
}

#[async_trait]
impl CatalogStore for InMemoryAppetiteStorage {
    async fn put_outcome(&self, outcome: Outcome) -> StorageResult<()> {
        let mut guard = write(&self.outcomes, "outcomes")?;
        guard.insert(outcome.outcome_id.clone(), outcome);
        Ok(())
    }

    async fn get_outcome(&self, outcome_id: &OutcomeId) -> StorageResult<Option<Outcome>> {
        let guard = read(&self.outcomes, "outcomes")?;
        Ok(guard.get(outcome_id).cloned())
    }

    async fn put_indicator(&self, indicator: Indicator) -> StorageResult<()> {
        let mut guard = write(&self.indicators, "indicators")?;
        guard.insert(indicator.indicator_id.clone(), indicator);
        Ok(())
    }

    async fn get_indicator(&self, indicator_id: &IndicatorId) -> StorageResult<Option<Indicator>> {
        let guard = read(&self.indicators, "indicators")?;
        Ok(guard.get(indicator_id).cloned())
    }

    async fn list_indicators(&self, org_id: &OrgId) -> StorageResult<Vec<Indicator>> {
        let guard = read(&self.indicators, "indicators")?;
        let mut values = guard
            .values()
            .filter(|indicator| &indicator.org_id == org_id)
            .cloned()
            .collect::<Vec<_>>();
        values.sort_by(|a, b| a.indicator_id.cmp(&b.indicator_id));
        Ok(values)
    }

    async fn put_category(&self, category: Category) -> StorageResult<()> {
        let mut guard = write(&self.categories, "categories")?;
        guard.insert(category.category_id.clone(), category);
        Ok(())
    }

    async fn list_categories(&self, org_id: &OrgId) -> StorageResult<Vec<Category>> {
        let guard = read(&self.categories, "categories")?;
        let mut values = guard
            .values()
            .filter(|category| &category.org_id == org_id)
            .cloned()
            .collect::<Vec<_>>();
        values.sort_by(|a, b| a.category_id.cmp(&b.category_id));
        Ok(values)
    }
}

#[async_trait]
impl MetricStore for InMemoryAppetiteStorage {
    async fn insert_metric(&self, metric: ToleranceMetric) -> StorageResult<()> {
        let mut arena = write(&self.metrics, "metrics")?;

        if arena.by_id.contains_key(&metric.metric_id) {
            return Err(StorageError::Conflict(format!(
                "metric {} already exists",
                metric.metric_id
            )));
        }
        if metric.status != GovernanceStatus::Draft {
            return Err(StorageError::InvalidInput(format!(
                "new metric versions must be drafts, got {}",
                metric.status
            )));
        }
        match &metric.supersedes {
            None => {
                let taken = arena
                    .keys
                    .get(&metric.metric_key)
                    .map_or(false, |index| !index.versions.is_empty());
                if taken {
                    return Err(StorageError::Conflict(format!(
                        "metric key {} already exists",
                        metric.metric_key
                    )));
                }
            }
            Some(previous) => {
                let idx = arena.slot(previous)?;
                let same_key = arena
                    .get(idx)
                    .map_or(false, |prev| prev.metric_key == metric.metric_key);
                if !same_key {
                    return Err(StorageError::InvalidInput(format!(
                        "metric {} supersedes a version of another key",
                        metric.metric_id
                    )));
                }
            }
        }

        let idx = arena.slots.len();
        let key = metric.metric_key.clone();
        arena.by_id.insert(metric.metric_id.clone(), idx);
        arena.slots.push(Some(metric));
        arena.keys.entry(key).or_default().versions.push(idx);
        Ok(())
    }

    async fn get_metric(&self, metric_id: &MetricId) -> StorageResult<Option<ToleranceMetric>> {
        let arena = read(&self.metrics, "metrics")?;
        Ok(arena
            .by_id
            .get(metric_id)
            .and_then(|idx| arena.get(*idx))
            .cloned())
    }

    async fn current_metric(&self, key: &MetricKey) -> StorageResult<Option<ToleranceMetric>> {
        let arena = read(&self.metrics, "metrics")?;
        Ok(arena.current(key).cloned())
    }

    async fn metric_versions(&self, key: &MetricKey) -> StorageResult<Vec<ToleranceMetric>> {
        let arena = read(&self.metrics, "metrics")?;
        Ok(arena.versions(key))
    }

    async fn metrics_for_outcome(
        &self,
        outcome_id: &OutcomeId,
    ) -> StorageResult<Vec<ToleranceMetric>> {
        let arena = read(&self.metrics, "metrics")?;
        Ok(arena
            .slots
            .iter()
            .flatten()
            .filter(|metric| &metric.outcome_id == outcome_id)
            .cloned()
            .collect())
    }

    async fn metrics_for_org(&self, org_id: &OrgId) -> StorageResult<Vec<ToleranceMetric>> {
        let arena = read(&self.metrics, "metrics")?;
        Ok(arena
            .slots
            .iter()
            .flatten()
            .filter(|metric| &metric.org_id == org_id)
            .cloned()
            .collect())
    }

    async fn update_draft_metric(&self, metric: ToleranceMetric) -> StorageResult<()> {
        let mut arena = write(&self.metrics, "metrics")?;
        let idx = arena.slot(&metric.metric_id)?;
        let stored = arena.get_mut(idx)?;
        if stored.status != GovernanceStatus::Draft {
            return Err(StorageError::InvariantViolation(format!(
                "metric {} is {} and cannot be edited",
                stored.metric_id, stored.status
            )));
        }

        stored.outcome_id = metric.outcome_id;
        stored.name = metric.name;
        stored.description = metric.description;
        stored.direction = metric.direction;
        stored.bounds = metric.bounds;
        stored.amber_margin = metric.amber_margin;
        stored.frequency = metric.frequency;
        stored.breach_rule = metric.breach_rule;
        stored.effective_from = metric.effective_from;
        stored.updated_at = metric.updated_at;
        Ok(())
    }

    async fn transition_metric(
        &self,
        metric_id: &MetricId,
        expected_from: GovernanceStatus,
        to: GovernanceStatus,
        updated_at: DateTime<Utc>,
    ) -> StorageResult<ToleranceMetric> {
        if to.was_effective() {
            return Err(StorageError::InvalidInput(format!(
                "transition to {} must go through promotion or retirement",
                to
            )));
        }

        let mut arena = write(&self.metrics, "metrics")?;
        let idx = arena.slot(metric_id)?;
        let stored = arena.get_mut(idx)?;
        if stored.status != expected_from {
            return Err(StorageError::InvariantViolation(format!(
                "invalid metric transition: expected {}, found {}",
                expected_from, stored.status
            )));
        }
        stored.status = to;
        stored.updated_at = updated_at;
        Ok(stored.clone())
    }

    async fn promote_metric(
        &self,
        metric_id: &MetricId,
        approved_by: &ActorId,
        approved_at: DateTime<Utc>,
    ) -> StorageResult<ToleranceMetric> {
        let mut arena = write(&self.metrics, "metrics")?;
        let idx = arena.slot(metric_id)?;
        let (key, supersedes, status, effective_from) = match arena.get(idx) {
            Some(m) => (
                m.metric_key.clone(),
                m.supersedes.clone(),
                m.status,
                m.effective_from,
            ),
            None => return Err(StorageError::NotFound(format!("metric {} not found", metric_id))),
        };

        if status != GovernanceStatus::PendingApproval {
            return Err(StorageError::InvariantViolation(format!(
                "metric {} is {}, expected {}",
                metric_id,
                status,
                GovernanceStatus::PendingApproval
            )));
        }

        let current_idx = arena.keys.get(&key).and_then(|index| index.current);
        let current_id = current_idx
            .and_then(|c| arena.get(c))
            .map(|m| m.metric_id.clone());
        if current_id != supersedes {
            return Err(StorageError::Conflict(format!(
                "metric key {} moved on: current version is {:?}, promotion expected {:?}",
                key, current_id, supersedes
            )));
        }

        if let Some(current_idx) = current_idx {
            let previous = arena.get_mut(current_idx)?;
            previous.status = GovernanceStatus::Superseded;
            previous.effective_to = Some(effective_from);
            previous.superseded_by = Some(metric_id.clone());
            previous.updated_at = approved_at;
        }

        let promoted = arena.get_mut(idx)?;
        promoted.status = GovernanceStatus::Approved;
        promoted.approved_by = Some(approved_by.clone());
        promoted.approved_at = Some(approved_at);
        promoted.updated_at = approved_at;
        let promoted = promoted.clone();

        arena.keys.entry(key).or_default().current = Some(idx);
        debug!(metric_id = %metric_id, version = promoted.version, "metric promoted to current");
        Ok(promoted)
    }

    async fn retire_metric(
        &self,
        metric_id: &MetricId,
        effective_to: NaiveDate,
        updated_at: DateTime<Utc>,
    ) -> StorageResult<ToleranceMetric> {
        let mut arena = write(&self.metrics, "metrics")?;
        let idx = arena.slot(metric_id)?;
        let stored = arena.get_mut(idx)?;
        if stored.status != GovernanceStatus::Approved {
            return Err(StorageError::InvariantViolation(format!(
                "metric {} is {} and cannot be retired",
                metric_id, stored.status
            )));
        }
        stored.status = GovernanceStatus::Retired;
        stored.effective_to = Some(effective_to);
        stored.updated_at = updated_at;
        let retired = stored.clone();

        if let Some(index) = arena.keys.get_mut(&retired.metric_key) {
            index.current = None;
        }
        Ok(retired)
    }

    async fn delete_metric(&self, metric_id: &MetricId) -> StorageResult<()> {
        let mut arena = write(&self.metrics, "metrics")?;
        let idx = arena.slot(metric_id)?;
        let key = match arena.get(idx) {
            Some(m) if m.status.is_deletable() => m.metric_key.clone(),
            Some(m) => {
                return Err(StorageError::InvariantViolation(format!(
                    "metric {} is {} and cannot be deleted",
                    metric_id, m.status
                )))
            }
            None => return Err(StorageError::NotFound(format!("metric {} not found", metric_id))),
        };

        arena.slots[idx] = None;
        arena.by_id.remove(metric_id);
        let emptied = match arena.keys.get_mut(&key) {
            Some(index) => {
                index.versions.retain(|v| *v != idx);
                index.versions.is_empty()
            }
            None => false,
        };
        if emptied {
            arena.keys.remove(&key);
        }
        Ok(())
    }
}

#[async_trait]
impl CoverageStore for InMemoryAppetiteStorage {
    async fn upsert_link(&self, link: CoverageLink) -> StorageResult<()> {
        let mut guard = write(&self.links, "coverage")?;

        if link.is_primary() {
            let rival = guard.iter().find(|existing| {
                existing.metric_key == link.metric_key
                    && existing.is_primary()
                    && existing.indicator_id != link.indicator_id
            });
            if let Some(rival) = rival {
                return Err(StorageError::Conflict(format!(
                    "metric {} already has primary indicator {}",
                    link.metric_key, rival.indicator_id
                )));
            }
        }

        match guard.iter_mut().find(|existing| {
            existing.metric_key == link.metric_key && existing.indicator_id == link.indicator_id
        }) {
            Some(existing) => *existing = link,
            None => guard.push(link),
        }
        Ok(())
    }

    async fn remove_link(
        &self,
        key: &MetricKey,
        indicator_id: &IndicatorId,
    ) -> StorageResult<bool> {
        let mut guard = write(&self.links, "coverage")?;
        let before = guard.len();
        guard.retain(|link| !(&link.metric_key == key && &link.indicator_id == indicator_id));
        Ok(guard.len() != before)
    }

    async fn links_for_metric(&self, key: &MetricKey) -> StorageResult<Vec<CoverageLink>> {
        let guard = read(&self.links, "coverage")?;
        Ok(guard
            .iter()
            .filter(|link| &link.metric_key == key)
            .cloned()
            .collect())
    }

    async fn links_for_indicator(
        &self,
        indicator_id: &IndicatorId,
    ) -> StorageResult<Vec<CoverageLink>> {
        let guard = read(&self.links, "coverage")?;
        Ok(guard
            .iter()
            .filter(|link| &link.indicator_id == indicator_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ObservationStore for InMemoryAppetiteStorage {
    async fn insert_observation(&self, observation: Observation) -> StorageResult<()> {
        let mut guard = write(&self.observations, "observations")?;
        if guard.contains_key(&observation.observation_id) {
            return Err(StorageError::Conflict(format!(
                "observation {} already exists",
                observation.observation_id
            )));
        }
        if observation.status == ObservationStatus::Approved {
            return Err(StorageError::InvalidInput(
                "observations are approved through the review workflow".to_string(),
            ));
        }
        guard.insert(observation.observation_id.clone(), observation);
        Ok(())
    }

    async fn get_observation(
        &self,
        observation_id: &ObservationId,
    ) -> StorageResult<Option<Observation>> {
        let guard = read(&self.observations, "observations")?;
        Ok(guard.get(observation_id).cloned())
    }

    async fn transition_observation(
        &self,
        observation_id: &ObservationId,
        expected_from: ObservationStatus,
        to: ObservationStatus,
        reviewer: Option<ActorId>,
        note: Option<String>,
        updated_at: DateTime<Utc>,
    ) -> StorageResult<Observation> {
        if to == ObservationStatus::Approved {
            return Err(StorageError::InvalidInput(
                "approval must go through approve_observation".to_string(),
            ));
        }

        let mut guard = write(&self.observations, "observations")?;
        let stored = guard.get_mut(observation_id).ok_or_else(|| {
            StorageError::NotFound(format!("observation {} not found", observation_id))
        })?;
        if stored.status != expected_from {
            return Err(StorageError::InvariantViolation(format!(
                "invalid observation transition: expected {}, found {}",
                expected_from, stored.status
            )));
        }
        stored.status = to;
        if reviewer.is_some() {
            stored.reviewed_by = reviewer;
            stored.reviewed_at = Some(updated_at);
        }
        if note.is_some() {
            stored.review_note = note;
        }
        stored.updated_at = updated_at;
        Ok(stored.clone())
    }

    async fn approve_observation(
        &self,
        observation_id: &ObservationId,
        reviewer: &ActorId,
        approved_at: DateTime<Utc>,
    ) -> StorageResult<Observation> {
        let mut guard = write(&self.observations, "observations")?;
        let candidate = guard.get(observation_id).cloned().ok_or_else(|| {
            StorageError::NotFound(format!("observation {} not found", observation_id))
        })?;

        if candidate.status != ObservationStatus::Submitted {
            return Err(StorageError::InvariantViolation(format!(
                "observation {} is {}, expected {}",
                observation_id,
                candidate.status,
                ObservationStatus::Submitted
            )));
        }

        match &candidate.supersedes {
            Some(previous_id) => {
                let previous = guard.get_mut(previous_id).ok_or_else(|| {
                    StorageError::NotFound(format!("observation {} not found", previous_id))
                })?;
                if !previous.is_current() {
                    return Err(StorageError::Conflict(format!(
                        "observation {} is no longer current",
                        previous_id
                    )));
                }
                previous.superseded_by = Some(observation_id.clone());
                previous.updated_at = approved_at;
            }
            None => {
                let clash = guard.values().any(|o| {
                    o.indicator_id == candidate.indicator_id
                        && o.observed_on == candidate.observed_on
                        && o.is_current()
                });
                if clash {
                    return Err(StorageError::Conflict(format!(
                        "indicator {} already has an approved observation for {}",
                        candidate.indicator_id, candidate.observed_on
                    )));
                }
            }
        }

        let stored = guard.get_mut(observation_id).ok_or_else(|| {
            StorageError::NotFound(format!("observation {} not found", observation_id))
        })?;
        stored.status = ObservationStatus::Approved;
        stored.reviewed_by = Some(reviewer.clone());
        stored.reviewed_at = Some(approved_at);
        stored.updated_at = approved_at;
        Ok(stored.clone())
    }

    async fn delete_observation(&self, observation_id: &ObservationId) -> StorageResult<()> {
        let mut guard = write(&self.observations, "observations")?;
        match guard.get(observation_id) {
            Some(o) if o.status.is_deletable() => {
                guard.remove(observation_id);
                Ok(())
            }
            Some(o) => Err(StorageError::InvariantViolation(format!(
                "observation {} is {} and cannot be deleted",
                observation_id, o.status
            ))),
            None => Err(StorageError::NotFound(format!(
                "observation {} not found",
                observation_id
            ))),
        }
    }

    async fn latest_current_observation(
        &self,
        indicator_id: &IndicatorId,
        window: ObservationWindow,
    ) -> StorageResult<Option<Observation>> {
        let guard = read(&self.observations, "observations")?;
        Ok(guard
            .values()
            .filter(|o| &o.indicator_id == indicator_id)
            .filter(|o| o.is_current() && window.contains(o.observed_on))
            .max_by_key(|o| (o.observed_on, o.version))
            .cloned())
    }

    async fn observations_for_indicator(
        &self,
        indicator_id: &IndicatorId,
    ) -> StorageResult<Vec<Observation>> {
        let guard = read(&self.observations, "observations")?;
        let mut values = guard
            .values()
            .filter(|o| &o.indicator_id == indicator_id)
            .cloned()
            .collect::<Vec<_>>();
        values.sort_by(|a, b| {
            (a.observed_on, a.version, a.created_at).cmp(&(b.observed_on, b.version, b.created_at))
        });
        Ok(values)
    }
}

#[async_trait]
impl BreachStore for InMemoryAppetiteStorage {
    async fn record_breach(&self, event: BreachEvent) -> StorageResult<BreachEvent> {
        let mut guard = write(&self.breaches, "breaches")?;
        if let Some(existing) = guard.iter().find(|e| {
            e.is_open()
                && e.metric_key == event.metric_key
                && e.period_number == event.period_number
                && e.breach_type == event.breach_type
        }) {
            return Ok(existing.clone());
        }
        guard.push(event.clone());
        Ok(event)
    }

    async fn open_breach(
        &self,
        event: BreachEvent,
        expected_open: &[BreachId],
    ) -> StorageResult<Vec<BreachEvent>> {
        let mut guard = write(&self.breaches, "breaches")?;
        let mut open: Vec<&BreachId> = guard
            .iter()
            .filter(|e| e.metric_key == event.metric_key && e.is_open())
            .map(|e| &e.breach_id)
            .collect();
        let mut expected: Vec<&BreachId> = expected_open.iter().collect();
        open.sort();
        expected.sort();
        if open != expected {
            return Err(StorageError::Conflict(format!(
                "open breaches of {} changed concurrently",
                event.metric_key
            )));
        }
        if let Some(newer) = guard.iter().find(|e| {
            expected_open.contains(&e.breach_id) && e.measurement_date > event.measurement_date
        }) {
            return Err(StorageError::InvariantViolation(format!(
                "breach {} was measured after {}",
                newer.breach_id, event.measurement_date
            )));
        }

        let mut resolved = Vec::new();
        for stored in guard
            .iter_mut()
            .filter(|e| expected_open.contains(&e.breach_id))
        {
            stored.resolved_at = Some(event.measurement_date);
            resolved.push(stored.clone());
        }
        debug!(metric_key = %event.metric_key, resolved = resolved.len(), "breach opened");
        guard.push(event);
        Ok(resolved)
    }

    async fn open_breaches(&self, key: &MetricKey) -> StorageResult<Vec<BreachEvent>> {
        let guard = read(&self.breaches, "breaches")?;
        Ok(guard
            .iter()
            .filter(|e| &e.metric_key == key && e.is_open())
            .cloned()
            .collect())
    }

    async fn breaches_for_metric(&self, key: &MetricKey) -> StorageResult<Vec<BreachEvent>> {
        let guard = read(&self.breaches, "breaches")?;
        let mut values = guard
            .iter()
            .filter(|e| &e.metric_key == key)
            .cloned()
            .collect::<Vec<_>>();
        values.sort_by(|a, b| {
            (a.period_number, a.created_at).cmp(&(b.period_number, b.created_at))
        });
        Ok(values)
    }

    async fn resolve_breach(
        &self,
        breach_id: &BreachId,
        resolved_at: NaiveDate,
    ) -> StorageResult<BreachEvent> {
        let mut guard = write(&self.breaches, "breaches")?;
        let stored = guard
            .iter_mut()
            .find(|e| &e.breach_id == breach_id)
            .ok_or_else(|| StorageError::NotFound(format!("breach {} not found", breach_id)))?;
        if !stored.is_open() {
            return Err(StorageError::InvariantViolation(format!(
                "breach {} is already resolved",
                breach_id
            )));
        }
        if resolved_at < stored.measurement_date {
            return Err(StorageError::InvariantViolation(format!(
                "breach {} measured on {} cannot resolve on {}",
                breach_id, stored.measurement_date, resolved_at
            )));
        }
        stored.resolved_at = Some(resolved_at);
        Ok(stored.clone())
    }
}

#[async_trait]
impl ControlStore for InMemoryAppetiteStorage {
    async fn put_risk(&self, risk: Risk) -> StorageResult<()> {
        let mut guard = write(&self.risks, "risks")?;
        guard.insert(risk.risk_id.clone(), risk);
        Ok(())
    }

    async fn get_risk(&self, risk_id: &RiskId) -> StorageResult<Option<Risk>> {
        let guard = read(&self.risks, "risks")?;
        Ok(guard.get(risk_id).cloned())
    }

    async fn list_risks(&self, org_id: &OrgId) -> StorageResult<Vec<Risk>> {
        let guard = read(&self.risks, "risks")?;
        let mut values = guard
            .values()
            .filter(|risk| &risk.org_id == org_id)
            .cloned()
            .collect::<Vec<_>>();
        values.sort_by(|a, b| a.risk_id.cmp(&b.risk_id));
        Ok(values)
    }

    async fn set_residual(&self, risk_id: &RiskId, residual: ResidualScore) -> StorageResult<()> {
        let mut guard = write(&self.risks, "risks")?;
        let risk = guard
            .get_mut(risk_id)
            .ok_or_else(|| StorageError::NotFound(format!("risk {} not found", risk_id)))?;
        risk.residual = Some(residual);
        Ok(())
    }

    async fn put_control(&self, control: Control) -> StorageResult<()> {
        let mut guard = write(&self.controls, "controls")?;
        guard.insert(control.control_id.clone(), control);
        Ok(())
    }

    async fn get_control(&self, control_id: &ControlId) -> StorageResult<Option<Control>> {
        let guard = read(&self.controls, "controls")?;
        Ok(guard.get(control_id).cloned())
    }

    async fn upsert_control_link(&self, link: RiskControlLink) -> StorageResult<()> {
        let mut guard = write(&self.control_links, "control links")?;
        guard.insert((link.risk_id.clone(), link.control_id.clone()), link);
        Ok(())
    }

    async fn remove_control_link(
        &self,
        risk_id: &RiskId,
        control_id: &ControlId,
    ) -> StorageResult<bool> {
        let mut guard = write(&self.control_links, "control links")?;
        Ok(guard
            .remove(&(risk_id.clone(), control_id.clone()))
            .is_some())
    }

    async fn control_links(&self, risk_id: &RiskId) -> StorageResult<Vec<RiskControlLink>> {
        let guard = read(&self.control_links, "control links")?;
        let mut values = guard
            .values()
            .filter(|link| &link.risk_id == risk_id)
            .cloned()
            .collect::<Vec<_>>();
        values.sort_by(|a, b| a.control_id.cmp(&b.control_id));
        Ok(values)
    }
}

#[async_trait]
impl RecalcRunStore for InMemoryAppetiteStorage {
    async fn acquire_run(
        &self,
        org_id: &OrgId,
        run_type: RunType,
        started_at: DateTime<Utc>,
    ) -> StorageResult<RecalcRun> {
        let mut table = write(&self.runs, "runs")?;
        if let Some(running) = table.running.get(org_id) {
            return Err(StorageError::Conflict(format!(
                "organization {} already has run {} in progress",
                org_id, running
            )));
        }

        let run = RecalcRun {
            run_id: RunId::generate(),
            org_id: org_id.clone(),
            run_type,
            status: RunStatus::Running,
            started_at,
            completed_at: None,
            processed: 0,
            updated: 0,
            failed: 0,
        };
        table.running.insert(org_id.clone(), run.run_id.clone());
        table.runs.insert(run.run_id.clone(), run.clone());
        Ok(run)
    }

    async fn complete_run(
        &self,
        run_id: &RunId,
        status: RunStatus,
        processed: u32,
        updated: u32,
        failed: u32,
        completed_at: DateTime<Utc>,
    ) -> StorageResult<RecalcRun> {
        if !status.is_terminal() {
            return Err(StorageError::InvalidInput(format!(
                "run {} must complete with a terminal status",
                run_id
            )));
        }

        let mut table = write(&self.runs, "runs")?;
        let run = table
            .runs
            .get_mut(run_id)
            .ok_or_else(|| StorageError::NotFound(format!("run {} not found", run_id)))?;
        if run.status != RunStatus::Running {
            return Err(StorageError::InvariantViolation(format!(
                "run {} already finished as {:?}",
                run_id, run.status
            )));
        }
        run.status = status;
        run.processed = processed;
        run.updated = updated;
        run.failed = failed;
        run.completed_at = Some(completed_at);
        let finished = run.clone();
        table.running.remove(&finished.org_id);
        Ok(finished)
    }

    async fn get_run(&self, run_id: &RunId) -> StorageResult<Option<RecalcRun>> {
        let table = read(&self.runs, "runs")?;
        Ok(table.runs.get(run_id).cloned())
    }

    async fn list_runs(&self, org_id: &OrgId, window: QueryWindow) -> StorageResult<Vec<RecalcRun>> {
        let table = read(&self.runs, "runs")?;
        let mut values = table
            .runs
            .values()
            .filter(|run| &run.org_id == org_id)
            .cloned()
            .collect::<Vec<_>>();
        values.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(apply_window(values, window))
    }
}

fn apply_window<T>(items: Vec<T>, window: QueryWindow) -> Vec<T> {
    let iter = items.into_iter().skip(window.offset);
    if window.limit == 0 {
        iter.collect()
    } else {
        iter.take(window.limit).collect()
    }
}

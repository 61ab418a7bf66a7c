//! JSON fixtures seeded into the in-memory store.
//!
//! A fixture describes records as they stand after governance review:
//! metrics and observations are listed with both their maker and checker and
//! are replayed through the store's approval path.

use anyhow::{bail, Context};
use appetite_engine::{governance, MetricDefinition};
use appetite_store::memory::InMemoryAppetiteStorage;
use appetite_store::{
    CatalogStore, ControlStore, CoverageStore, MetricStore, ObservationStore,
};
use appetite_types::{
    ActorId, Category, Control, CoverageLink, GovernanceStatus, Indicator, IndicatorId, MetricId,
    MetricKey, Observation, ObservationId, ObservationStatus, Outcome, Risk, RiskControlLink,
    ToleranceMetric,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

#[derive(Debug, Default, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub outcomes: Vec<Outcome>,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub indicators: Vec<Indicator>,
    #[serde(default)]
    pub metrics: Vec<FixtureMetric>,
    #[serde(default)]
    pub coverage: Vec<CoverageLink>,
    #[serde(default)]
    pub observations: Vec<FixtureObservation>,
    #[serde(default)]
    pub risks: Vec<Risk>,
    #[serde(default)]
    pub controls: Vec<Control>,
    #[serde(default)]
    pub control_links: Vec<RiskControlLink>,
}

#[derive(Debug, Deserialize)]
pub struct FixtureMetric {
    pub metric_id: MetricId,
    pub metric_key: MetricKey,
    #[serde(flatten)]
    pub definition: MetricDefinition,
    pub created_by: ActorId,
    /// Left out for metrics still in draft.
    #[serde(default)]
    pub approved_by: Option<ActorId>,
}

#[derive(Debug, Deserialize)]
pub struct FixtureObservation {
    pub observation_id: ObservationId,
    pub indicator_id: IndicatorId,
    pub observed_on: NaiveDate,
    pub value: f64,
    pub submitted_by: ActorId,
    #[serde(default)]
    pub approved_by: Option<ActorId>,
}

impl Fixture {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading fixture {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("parsing fixture {}", path.display()))
    }

    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Load every record into `storage`.
    pub async fn seed(self, storage: &InMemoryAppetiteStorage) -> anyhow::Result<()> {
        let now = Utc::now();
        for outcome in self.outcomes {
            storage.put_outcome(outcome).await?;
        }
        for category in self.categories {
            storage.put_category(category).await?;
        }
        for indicator in self.indicators {
            storage.put_indicator(indicator).await?;
        }

        let metric_count = self.metrics.len();
        for entry in self.metrics {
            seed_metric(storage, entry, now).await?;
        }
        for link in self.coverage {
            governance::validate_coverage_link(&link)?;
            storage.upsert_link(link).await?;
        }

        let observation_count = self.observations.len();
        for entry in self.observations {
            seed_observation(storage, entry, now).await?;
        }

        for control in self.controls {
            storage.put_control(control).await?;
        }
        for risk in self.risks {
            storage.put_risk(risk).await?;
        }
        for link in self.control_links {
            storage.upsert_control_link(link).await?;
        }

        info!(
            metrics = metric_count,
            observations = observation_count,
            "fixture seeded"
        );
        Ok(())
    }
}

async fn seed_metric(
    storage: &InMemoryAppetiteStorage,
    entry: FixtureMetric,
    now: chrono::DateTime<Utc>,
) -> anyhow::Result<()> {
    let supersedes = storage
        .current_metric(&entry.metric_key)
        .await?
        .map(|current| current.metric_id);
    let version = storage.metric_versions(&entry.metric_key).await?.len() as u32 + 1;
    let definition = entry.definition;
    let metric = ToleranceMetric {
        metric_id: entry.metric_id.clone(),
        metric_key: entry.metric_key,
        org_id: definition.org_id,
        outcome_id: definition.outcome_id,
        name: definition.name,
        description: definition.description,
        direction: definition.direction,
        bounds: definition.bounds,
        amber_margin: definition.amber_margin,
        frequency: definition.frequency,
        breach_rule: definition.breach_rule,
        status: GovernanceStatus::Draft,
        version,
        effective_from: definition.effective_from,
        effective_to: None,
        supersedes,
        superseded_by: None,
        created_by: entry.created_by.clone(),
        approved_by: None,
        approved_at: None,
        created_at: now,
        updated_at: now,
    };
    governance::validate_metric_definition(&metric)?;
    storage.insert_metric(metric).await?;

    let Some(checker) = entry.approved_by else {
        return Ok(());
    };
    governance::ensure_distinct_checker(&entry.created_by, &checker)?;
    storage
        .transition_metric(
            &entry.metric_id,
            GovernanceStatus::Draft,
            GovernanceStatus::PendingApproval,
            now,
        )
        .await?;
    storage.promote_metric(&entry.metric_id, &checker, now).await?;
    Ok(())
}

async fn seed_observation(
    storage: &InMemoryAppetiteStorage,
    entry: FixtureObservation,
    now: chrono::DateTime<Utc>,
) -> anyhow::Result<()> {
    if !entry.value.is_finite() {
        bail!("observation {} has a non-finite value", entry.observation_id);
    }
    storage
        .insert_observation(Observation {
            observation_id: entry.observation_id.clone(),
            indicator_id: entry.indicator_id,
            observed_on: entry.observed_on,
            value: entry.value,
            status: ObservationStatus::Submitted,
            version: 1,
            supersedes: None,
            superseded_by: None,
            submitted_by: entry.submitted_by.clone(),
            reviewed_by: None,
            reviewed_at: None,
            review_note: None,
            created_at: now,
            updated_at: now,
        })
        .await?;

    if let Some(checker) = entry.approved_by {
        governance::ensure_distinct_checker(&entry.submitted_by, &checker)?;
        storage
            .approve_observation(&entry.observation_id, &checker, now)
            .await?;
    }
    Ok(())
}

#![allow(dead_code)]

use appetite_engine::{
    EngineConfig, MetricDefinition, ObservationApproval, TaskDispatcher, ToleranceService,
};
use appetite_store::memory::InMemoryAppetiteStorage;
use appetite_store::{CatalogStore, ControlStore};
use appetite_types::{
    ActorId, BoundConfig, BreachRule, Category, CategoryId, Control, ControlId, CoverageLink,
    CoverageStrength, Direction, Frequency, Indicator, IndicatorId, MetricKey, OrgId, Outcome,
    OutcomeId, Risk, RiskId, SignalType, ToleranceMetric,
};
use chrono::NaiveDate;
use std::sync::Arc;

pub const ORG: &str = "org-1";
pub const OUTCOME: &str = "outcome-payments";
pub const KRI: &str = "kri-latency";

pub struct World {
    pub storage: Arc<InMemoryAppetiteStorage>,
    pub service: Arc<ToleranceService>,
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn maker() -> ActorId {
    ActorId::new("maker")
}

pub fn checker() -> ActorId {
    ActorId::new("checker")
}

pub fn org() -> OrgId {
    OrgId::new(ORG)
}

pub async fn seed_catalog(storage: &InMemoryAppetiteStorage) {
    storage
        .put_outcome(Outcome {
            outcome_id: OutcomeId::new(OUTCOME),
            org_id: org(),
            name: "Payments settle on time".to_string(),
        })
        .await
        .unwrap();
    storage
        .put_outcome(Outcome {
            outcome_id: OutcomeId::new("outcome-empty"),
            org_id: org(),
            name: "Nothing measured yet".to_string(),
        })
        .await
        .unwrap();
    for (id, parent) in [
        ("cat-operational", None),
        ("cat-technology", Some("cat-operational")),
        ("cat-financial", None),
    ] {
        storage
            .put_category(Category {
                category_id: CategoryId::new(id),
                org_id: org(),
                name: id.to_string(),
                parent_id: parent.map(CategoryId::new),
            })
            .await
            .unwrap();
    }
    for (id, category) in [
        (KRI, "cat-technology"),
        ("kri-errors", "cat-technology"),
        ("kri-capital", "cat-financial"),
    ] {
        storage
            .put_indicator(Indicator {
                indicator_id: IndicatorId::new(id),
                org_id: org(),
                name: id.to_string(),
                unit: None,
                category_id: Some(CategoryId::new(category)),
            })
            .await
            .unwrap();
    }
}

pub async fn world() -> World {
    world_with(TaskDispatcher::disabled()).await
}

pub async fn world_with(dispatcher: TaskDispatcher) -> World {
    let storage = Arc::new(InMemoryAppetiteStorage::new());
    seed_catalog(&storage).await;
    let service = ToleranceService::new(storage.clone(), EngineConfig::default())
        .unwrap()
        .with_dispatcher(dispatcher);
    World {
        storage,
        service: Arc::new(service),
    }
}

pub fn above(soft: f64, hard: f64) -> MetricDefinition {
    MetricDefinition {
        org_id: org(),
        outcome_id: OutcomeId::new(OUTCOME),
        name: "p99 settlement latency".to_string(),
        description: None,
        direction: Some(Direction::Above),
        bounds: Some(BoundConfig::Limits { soft, hard }),
        amber_margin: None,
        frequency: Frequency::Monthly,
        breach_rule: BreachRule::default(),
        effective_from: date(2025, 1, 1),
    }
}

impl World {
    /// Create, submit and approve a metric.
    pub async fn approved_metric(&self, definition: MetricDefinition) -> ToleranceMetric {
        let draft = self.service.create_metric(definition, &maker()).await.unwrap();
        self.service
            .submit_metric(&draft.metric_id, &maker())
            .await
            .unwrap();
        self.service
            .approve_metric(&draft.metric_id, &checker())
            .await
            .unwrap()
    }

    pub async fn link(&self, key: &MetricKey, indicator: &str, strength: CoverageStrength) {
        self.service
            .link_indicator(CoverageLink {
                metric_key: key.clone(),
                indicator_id: IndicatorId::new(indicator),
                strength,
                signal_type: SignalType::Concurrent,
                rationale: Some("measures the outcome directly".to_string()),
            })
            .await
            .unwrap();
    }

    /// Record and approve a reading of `indicator`.
    pub async fn observe(&self, indicator: &str, on: NaiveDate, value: f64) -> ObservationApproval {
        let observation = self
            .service
            .record_observation(&IndicatorId::new(indicator), on, value, &maker())
            .await
            .unwrap();
        self.service
            .approve_observation(&observation.observation_id, &checker())
            .await
            .unwrap()
    }

    pub async fn risk(&self, id: &str, likelihood: u8, impact: u8) -> RiskId {
        let risk_id = RiskId::new(id);
        self.storage
            .put_risk(Risk {
                risk_id: risk_id.clone(),
                org_id: org(),
                title: id.to_string(),
                category_id: None,
                inherent_likelihood: likelihood,
                inherent_impact: impact,
                residual: None,
            })
            .await
            .unwrap();
        risk_id
    }

    pub async fn control(&self, id: &str, score: u8) -> ControlId {
        let control_id = ControlId::new(id);
        self.storage
            .put_control(Control {
                control_id: control_id.clone(),
                org_id: org(),
                name: id.to_string(),
                design: score,
                implementation: score,
                monitoring: score,
                evaluation: score,
            })
            .await
            .unwrap();
        control_id
    }
}

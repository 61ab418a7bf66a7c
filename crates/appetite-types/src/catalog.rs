//! Reference records owned by the surrounding application.

use crate::ids::{CategoryId, IndicatorId, OrgId, OutcomeId};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Indicator {
    pub indicator_id: IndicatorId,
    pub org_id: OrgId,
    pub name: String,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub category_id: Option<CategoryId>,
}

/// A business outcome (or service) that tolerance metrics hang off.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub outcome_id: OutcomeId,
    pub org_id: OrgId,
    pub name: String,
}

/// Node of the risk category tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub category_id: CategoryId,
    pub org_id: OrgId,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<CategoryId>,
}

//! Risks, controls and the links between them.

use crate::ids::{CategoryId, ControlId, OrgId, RiskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A control with its four effectiveness dimensions, each 0-100.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Control {
    pub control_id: ControlId,
    pub org_id: OrgId,
    pub name: String,
    pub design: u8,
    pub implementation: u8,
    pub monitoring: u8,
    pub evaluation: u8,
}

impl Control {
    pub fn dimensions(&self) -> [u8; 4] {
        [
            self.design,
            self.implementation,
            self.monitoring,
            self.evaluation,
        ]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Active,
    Inactive,
    Planned,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskControlLink {
    pub risk_id: RiskId,
    pub control_id: ControlId,
    pub status: LinkStatus,
    pub linked_at: DateTime<Utc>,
}

/// Cached residual result. Always recomputable from the risk's inherent
/// scores and its active controls.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResidualScore {
    pub likelihood: u8,
    pub impact: u8,
    pub combined_effectiveness: f64,
    pub computed_at: DateTime<Utc>,
}

impl ResidualScore {
    pub fn score(&self) -> u8 {
        self.likelihood * self.impact
    }

    /// Equal ignoring when it was computed.
    pub fn same_result(&self, other: &ResidualScore) -> bool {
        self.likelihood == other.likelihood
            && self.impact == other.impact
            && self.combined_effectiveness == other.combined_effectiveness
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Risk {
    pub risk_id: RiskId,
    pub org_id: OrgId,
    pub title: String,
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    /// 1-5.
    pub inherent_likelihood: u8,
    /// 1-5.
    pub inherent_impact: u8,
    #[serde(default)]
    pub residual: Option<ResidualScore>,
}

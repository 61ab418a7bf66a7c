use crate::ids::{IndicatorId, MetricKey};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageStrength {
    /// Drives status derivation; at most one per metric.
    Primary,
    Secondary,
    Supplementary,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    Leading,
    Concurrent,
    Lagging,
}

/// Declares that an indicator evidences a tolerance metric.
///
/// Links attach to the metric key, so they survive supersession.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageLink {
    pub metric_key: MetricKey,
    pub indicator_id: IndicatorId,
    pub strength: CoverageStrength,
    pub signal_type: SignalType,
    /// Required when `strength` is primary.
    #[serde(default)]
    pub rationale: Option<String>,
}

impl CoverageLink {
    pub fn is_primary(&self) -> bool {
        self.strength == CoverageStrength::Primary
    }
}

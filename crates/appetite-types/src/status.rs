use serde::{Deserialize, Serialize};
use std::fmt;

/// Traffic-light status of a metric or container, plus the diagnostic
/// non-statuses reported when configuration or data is missing.
///
/// A diagnostic is never silently turned into a colour.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RagStatus {
    Red,
    Amber,
    Green,
    /// Bounds or direction not configured.
    Unknown,
    /// No primary coverage link.
    NoKri,
    /// No approved observation yet.
    NoData,
    /// A container with nothing under it.
    NoMetrics,
}

impl RagStatus {
    pub fn is_breach(self) -> bool {
        matches!(self, RagStatus::Red | RagStatus::Amber)
    }

    pub fn is_diagnostic(self) -> bool {
        matches!(
            self,
            RagStatus::Unknown | RagStatus::NoKri | RagStatus::NoData | RagStatus::NoMetrics
        )
    }
}

impl fmt::Display for RagStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RagStatus::Red => "RED",
            RagStatus::Amber => "AMBER",
            RagStatus::Green => "GREEN",
            RagStatus::Unknown => "UNKNOWN",
            RagStatus::NoKri => "NO_KRI",
            RagStatus::NoData => "NO_DATA",
            RagStatus::NoMetrics => "NO_METRICS",
        };
        f.write_str(label)
    }
}

use crate::ids::{ActorId, IndicatorId, ObservationId};
use crate::lifecycle::ObservationStatus;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One measured value of a key risk indicator.
///
/// Approved rows are never edited. A correction is a new version whose
/// `supersedes` points at the old row; the old row only gains a
/// `superseded_by` pointer once the correction itself is approved.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub observation_id: ObservationId,
    pub indicator_id: IndicatorId,
    pub observed_on: NaiveDate,
    pub value: f64,
    pub status: ObservationStatus,
    pub version: u32,
    #[serde(default)]
    pub supersedes: Option<ObservationId>,
    #[serde(default)]
    pub superseded_by: Option<ObservationId>,
    pub submitted_by: ActorId,
    #[serde(default)]
    pub reviewed_by: Option<ActorId>,
    #[serde(default)]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub review_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Observation {
    /// Approved and not replaced by an approved correction.
    pub fn is_current(&self) -> bool {
        self.status == ObservationStatus::Approved && self.superseded_by.is_none()
    }
}

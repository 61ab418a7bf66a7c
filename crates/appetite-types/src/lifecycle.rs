//! Governance lifecycles for tolerance metrics and observations.
//!
//! The transition tables here are the single definition of which moves are
//! legal. Storage adapters check `expected_from` against the stored row, and
//! the engine checks the table before asking storage to move anything.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a governed tolerance metric version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GovernanceStatus {
    Draft,
    PendingApproval,
    Approved,
    Superseded,
    Retired,
}

impl GovernanceStatus {
    pub fn can_transition_to(self, to: GovernanceStatus) -> bool {
        use GovernanceStatus::*;
        matches!(
            (self, to),
            (Draft, PendingApproval)
                | (PendingApproval, Draft)
                | (PendingApproval, Approved)
                | (Approved, Superseded)
                | (Approved, Retired)
        )
    }

    /// Only drafts may be edited in place.
    pub fn is_mutable(self) -> bool {
        matches!(self, GovernanceStatus::Draft)
    }

    pub fn is_deletable(self) -> bool {
        matches!(self, GovernanceStatus::Draft)
    }

    /// Versions that ever governed a period and can therefore be used to
    /// re-derive a historical status.
    pub fn was_effective(self) -> bool {
        matches!(
            self,
            GovernanceStatus::Approved | GovernanceStatus::Superseded | GovernanceStatus::Retired
        )
    }
}

impl fmt::Display for GovernanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            GovernanceStatus::Draft => "draft",
            GovernanceStatus::PendingApproval => "pending_approval",
            GovernanceStatus::Approved => "approved",
            GovernanceStatus::Superseded => "superseded",
            GovernanceStatus::Retired => "retired",
        };
        f.write_str(label)
    }
}

/// Workflow of a single indicator observation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationStatus {
    Draft,
    Submitted,
    Approved,
    Rejected,
}

impl ObservationStatus {
    pub fn can_transition_to(self, to: ObservationStatus) -> bool {
        use ObservationStatus::*;
        matches!(
            (self, to),
            (Draft, Submitted) | (Submitted, Approved) | (Submitted, Rejected) | (Rejected, Draft)
        )
    }

    pub fn is_mutable(self) -> bool {
        matches!(self, ObservationStatus::Draft)
    }

    pub fn is_deletable(self) -> bool {
        matches!(self, ObservationStatus::Draft)
    }
}

impl fmt::Display for ObservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ObservationStatus::Draft => "draft",
            ObservationStatus::Submitted => "submitted",
            ObservationStatus::Approved => "approved",
            ObservationStatus::Rejected => "rejected",
        };
        f.write_str(label)
    }
}

//! Identifier newtypes.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Mint a fresh random identifier.
            pub fn generate() -> Self {
                Self(format!(concat!($prefix, "-{}"), uuid::Uuid::new_v4()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(
    /// Identity of one stored version of a tolerance metric.
    MetricId,
    "metric"
);
string_id!(
    /// Stable identity of a tolerance metric, shared by all of its versions.
    MetricKey,
    "tol"
);
string_id!(IndicatorId, "kri");
string_id!(ObservationId, "obs");
string_id!(OutcomeId, "outcome");
string_id!(CategoryId, "cat");
string_id!(RiskId, "risk");
string_id!(ControlId, "ctl");
string_id!(OrgId, "org");
string_id!(BreachId, "breach");
string_id!(RunId, "run");
string_id!(
    /// A user acting as maker or checker.
    ActorId,
    "user"
);

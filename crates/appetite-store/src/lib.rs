//! Storage abstractions for risk-appetite monitoring.
//!
//! One trait per aggregate, bundled as [`AppetiteStorage`]:
//! - catalog records (outcomes, indicators, categories)
//! - versioned tolerance metrics with an explicit current pointer per key
//! - the coverage graph between metrics and indicators
//! - the observation log with its approval workflow
//! - breach events
//! - risks, controls and their links
//! - organization-wide recalculation runs
//!
//! Every uniqueness rule is enforced by the adapter at write time. A lost race
//! surfaces as [`StorageError::Conflict`], never as a silent overwrite.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

mod error;
pub mod memory;
mod traits;

pub use error::{StorageError, StorageResult};
pub use traits::{
    AppetiteStorage, BreachStore, CatalogStore, ControlStore, CoverageStore, MetricStore,
    ObservationStore, ObservationWindow, QueryWindow, RecalcRunStore,
};

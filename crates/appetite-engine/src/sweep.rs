//! Organization-wide recompute sweep.
//!
//! A sweep holds the organization's recalc lock for its whole duration,
//! processes every item independently and always closes the run with a
//! terminal status, even when items fail.

use crate::error::AppetiteResult;
use crate::evaluator::EvaluationPoint;
use crate::service::ToleranceService;
use appetite_types::{MetricKey, OrgId, RecalcRun, RunStatus, RunType};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepFailure {
    pub item: String,
    pub error: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub run: RecalcRun,
    pub failures: Vec<SweepFailure>,
}

#[derive(Default)]
struct Tally {
    processed: u32,
    updated: u32,
    failed: u32,
    failures: Vec<SweepFailure>,
    aborted: bool,
}

impl Tally {
    fn fail(&mut self, item: String, error: impl std::fmt::Display) {
        self.processed += 1;
        self.failed += 1;
        warn!(item = %item, error = %error, "sweep item failed");
        self.failures.push(SweepFailure {
            item,
            error: error.to_string(),
        });
    }

    fn status(&self) -> RunStatus {
        if self.aborted || (self.processed > 0 && self.failed == self.processed) {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        }
    }
}

pub struct SweepRunner {
    service: Arc<ToleranceService>,
}

impl SweepRunner {
    pub fn new(service: Arc<ToleranceService>) -> Self {
        Self { service }
    }

    /// Run one sweep for `org_id`.
    ///
    /// `ResidualRisk` recomputes every risk. `Full` additionally evaluates
    /// every metric in force today and feeds the result to breach tracking.
    /// Fails with `ConcurrencyConflict` when a sweep is already running.
    pub async fn run(&self, org_id: &OrgId, run_type: RunType) -> AppetiteResult<SweepReport> {
        let run = self.service.acquire_recalc_lock(org_id, run_type).await?;
        info!(org_id = %org_id, run_id = %run.run_id, ?run_type, "sweep started");

        let mut tally = Tally::default();
        self.sweep_risks(org_id, &mut tally).await;
        if run_type == RunType::Full && !tally.aborted {
            self.sweep_metrics(org_id, &mut tally).await;
        }

        let run = self
            .service
            .complete_recalc_run(
                &run.run_id,
                tally.status(),
                tally.processed,
                tally.updated,
                tally.failed,
            )
            .await?;
        info!(
            org_id = %org_id,
            run_id = %run.run_id,
            status = ?run.status,
            processed = run.processed,
            updated = run.updated,
            failed = run.failed,
            "sweep finished"
        );
        Ok(SweepReport {
            run,
            failures: tally.failures,
        })
    }

    async fn sweep_risks(&self, org_id: &OrgId, tally: &mut Tally) {
        let storage = self.service.storage();
        let risks = match storage.list_risks(org_id).await {
            Ok(risks) => risks,
            Err(e) => {
                warn!(org_id = %org_id, error = %e, "could not list risks");
                tally.aborted = true;
                tally.failures.push(SweepFailure {
                    item: format!("org:{}", org_id),
                    error: e.to_string(),
                });
                return;
            }
        };
        for risk in risks {
            match self.service.recalculate_residual_risk(&risk.risk_id).await {
                Ok(update) => {
                    tally.processed += 1;
                    if update.changed {
                        tally.updated += 1;
                    }
                }
                Err(e) => tally.fail(format!("risk:{}", risk.risk_id), e),
            }
        }
    }

    async fn sweep_metrics(&self, org_id: &OrgId, tally: &mut Tally) {
        let storage = self.service.storage();
        let keys: BTreeSet<MetricKey> = match storage.metrics_for_org(org_id).await {
            Ok(metrics) => metrics.into_iter().map(|m| m.metric_key).collect(),
            Err(e) => {
                tally.fail(format!("org:{}", org_id), e);
                return;
            }
        };
        let point = EvaluationPoint::AsOf(Utc::now().date_naive());
        for key in keys {
            match self.service.track_metric(&key, &point).await {
                Ok(changed) => {
                    tally.processed += 1;
                    if changed {
                        tally.updated += 1;
                    }
                }
                Err(e) => tally.fail(format!("metric:{}", key), e),
            }
        }
    }
}

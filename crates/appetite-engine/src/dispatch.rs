//! Recompute task dispatch.
//!
//! Control-link changes do not recompute residual risk in place. They emit a
//! [`RecomputeTask`] that a [`ResidualWorker`] consumes. When no worker is
//! attached, or the channel is full or closed, the caller gets the task back
//! and runs it inline.

use crate::residual::{self, ResidualUpdate};
use appetite_store::AppetiteStorage;
use appetite_types::RiskId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecomputeReason {
    ControlLinked,
    ControlUnlinked,
    LinkStatusChanged,
    Requested,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum RecomputeTask {
    ResidualRisk {
        risk_id: RiskId,
        reason: RecomputeReason,
    },
}

/// Sending half of the recompute channel.
#[derive(Clone, Debug)]
pub struct TaskDispatcher {
    sender: Option<mpsc::Sender<RecomputeTask>>,
}

impl TaskDispatcher {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<RecomputeTask>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    /// A dispatcher with no worker. Every task is handed back.
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.sender.as_ref().map_or(false, |s| !s.is_closed())
    }

    /// Queue a task, or return it when it could not be queued.
    pub fn dispatch(&self, task: RecomputeTask) -> Result<(), RecomputeTask> {
        let Some(sender) = &self.sender else {
            return Err(task);
        };
        match sender.try_send(task) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(task)) => {
                warn!(?task, "recompute queue full");
                Err(task)
            }
            Err(mpsc::error::TrySendError::Closed(task)) => {
                warn!(?task, "recompute worker gone");
                Err(task)
            }
        }
    }
}

impl Default for TaskDispatcher {
    fn default() -> Self {
        Self::disabled()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub processed: u32,
    pub updated: u32,
    pub failed: u32,
}

/// Consumes recompute tasks until every sender is dropped.
pub struct ResidualWorker {
    storage: Arc<dyn AppetiteStorage>,
    receiver: mpsc::Receiver<RecomputeTask>,
}

impl ResidualWorker {
    pub fn new(storage: Arc<dyn AppetiteStorage>, receiver: mpsc::Receiver<RecomputeTask>) -> Self {
        Self { storage, receiver }
    }

    pub async fn run(mut self) -> WorkerStats {
        info!("residual worker started");
        let mut stats = WorkerStats::default();
        while let Some(task) = self.receiver.recv().await {
            stats.processed += 1;
            match execute(self.storage.as_ref(), &task).await {
                Ok(update) => {
                    if update.changed {
                        stats.updated += 1;
                    }
                }
                Err(e) => {
                    stats.failed += 1;
                    warn!(?task, error = %e, "recompute task failed");
                }
            }
        }
        info!(
            processed = stats.processed,
            updated = stats.updated,
            failed = stats.failed,
            "residual worker stopped"
        );
        stats
    }
}

/// Run one task against storage.
pub async fn execute(
    storage: &dyn AppetiteStorage,
    task: &RecomputeTask,
) -> crate::AppetiteResult<ResidualUpdate> {
    match task {
        RecomputeTask::ResidualRisk { risk_id, reason } => {
            debug!(risk_id = %risk_id, ?reason, "recomputing residual risk");
            residual::recalculate(storage, risk_id).await
        }
    }
}

mod common;

use appetite_engine::{
    AppetiteError, RecomputeOutcome, ResidualWorker, SweepRunner, TaskDispatcher,
};
use appetite_store::{BreachStore, ControlStore, QueryWindow};
use appetite_types::{CoverageStrength, RunStatus, RunType};
use common::*;

#[tokio::test]
async fn sweep_counts_items_and_survives_a_bad_risk() {
    let world = world().await;
    let control = world.control("ctl-backup", 60).await;
    for id in ["risk-a", "risk-b"] {
        let risk = world.risk(id, 4, 4).await;
        world
            .storage
            .upsert_control_link(appetite_types::RiskControlLink {
                risk_id: risk,
                control_id: control.clone(),
                status: appetite_types::LinkStatus::Active,
                linked_at: chrono::Utc::now(),
            })
            .await
            .unwrap();
    }
    world.risk("risk-broken", 0, 4).await;

    let runner = SweepRunner::new(world.service.clone());
    let report = runner.run(&org(), RunType::ResidualRisk).await.unwrap();
    assert_eq!(report.run.status, RunStatus::Completed);
    assert_eq!(report.run.processed, 3);
    assert_eq!(report.run.updated, 2);
    assert_eq!(report.run.failed, 1);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].item.contains("risk-broken"));

    let again = runner.run(&org(), RunType::ResidualRisk).await.unwrap();
    assert_eq!(again.run.updated, 0);
    assert_eq!(again.run.failed, 1);

    let runs = world
        .service
        .recalc_runs(&org(), QueryWindow::default())
        .await
        .unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|run| run.status.is_terminal()));
}

#[tokio::test]
async fn sweep_where_every_item_fails_is_failed() {
    let world = world().await;
    world.risk("risk-x", 9, 1).await;
    world.risk("risk-y", 1, 0).await;

    let report = SweepRunner::new(world.service.clone())
        .run(&org(), RunType::ResidualRisk)
        .await
        .unwrap();
    assert_eq!(report.run.status, RunStatus::Failed);
    assert_eq!(report.run.failed, 2);
}

#[tokio::test]
async fn only_one_sweep_runs_per_organization() {
    let world = world().await;
    world.risk("risk-a", 3, 3).await;

    let held = world
        .service
        .acquire_recalc_lock(&org(), RunType::Full)
        .await
        .unwrap();
    let runner = SweepRunner::new(world.service.clone());
    let blocked = runner.run(&org(), RunType::ResidualRisk).await;
    assert!(matches!(blocked, Err(AppetiteError::ConcurrencyConflict(_))));

    let other_org = runner
        .run(&appetite_types::OrgId::new("org-2"), RunType::ResidualRisk)
        .await
        .unwrap();
    assert_eq!(other_org.run.processed, 0);
    assert_eq!(other_org.run.status, RunStatus::Completed);

    let invalid = world
        .service
        .complete_recalc_run(&held.run_id, RunStatus::Running, 0, 0, 0)
        .await;
    assert!(matches!(invalid, Err(AppetiteError::Validation(_))));

    world
        .service
        .complete_recalc_run(&held.run_id, RunStatus::Completed, 0, 0, 0)
        .await
        .unwrap();
    let report = runner.run(&org(), RunType::ResidualRisk).await.unwrap();
    assert_eq!(report.run.processed, 1);
}

#[tokio::test]
async fn full_sweep_tracks_breaches_of_metrics_in_force() {
    let world = world().await;
    let metric = world.approved_metric(above(80.0, 90.0)).await;
    world.link(&metric.metric_key, KRI, CoverageStrength::Primary).await;
    world.observe(KRI, date(2025, 3, 31), 95.0).await;

    let open = world.storage.open_breaches(&metric.metric_key).await.unwrap();
    assert_eq!(open.len(), 1);

    world.observe(KRI, date(2025, 4, 30), 10.0).await;
    assert!(world
        .storage
        .open_breaches(&metric.metric_key)
        .await
        .unwrap()
        .is_empty());

    let report = SweepRunner::new(world.service.clone())
        .run(&org(), RunType::Full)
        .await
        .unwrap();
    assert_eq!(report.run.status, RunStatus::Completed);
    assert_eq!(report.run.processed, 1);
    assert_eq!(report.run.updated, 0);
}

#[tokio::test]
async fn control_link_changes_are_recomputed_by_the_worker() {
    let (dispatcher, receiver) = TaskDispatcher::channel(8);
    let world = world_with(dispatcher).await;
    let risk = world.risk("risk-a", 5, 5).await;
    let control = world.control("ctl-a", 80).await;

    let worker = tokio::spawn(ResidualWorker::new(world.service.storage(), receiver).run());

    let outcome = world.service.link_control(&risk, &control).await.unwrap();
    assert_eq!(outcome, RecomputeOutcome::Queued);

    let storage = world.storage.clone();
    drop(world);
    let stats = worker.await.unwrap();
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.updated, 1);
    assert_eq!(stats.failed, 0);

    let stored = storage.get_risk(&risk).await.unwrap().unwrap();
    let residual = stored.residual.unwrap();
    assert_eq!(residual.likelihood, 1);
    assert_eq!(residual.impact, 1);
}

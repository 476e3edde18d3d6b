// End-to-end runs: SQLite ledger, mock physics and real `sh` retrievals

mod common;

use approx::assert_abs_diff_eq;
use common::*;
use retrieval_core::application::{
    shutdown_channel, summarize, write_summary, ExperimentSummary,
};
use retrieval_core::domain::{GridPoint, JobState, PointPaths};
use retrieval_core::port::climate_model::mocks::MockClimateModel;
use retrieval_core::port::JobRepository;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_full_grid_produces_detection_summary() {
    let dir = tempfile::tempdir().unwrap();
    let spec = temperature_experiment(dir.path());
    let ledger = sqlite_ledger(dir.path()).await;
    let climate = Arc::new(MockClimateModel::new());

    let plan = plan(ledger.clone(), &spec, false).await;
    assert_eq!(plan.job_count(), 8);
    assert!(spec.save_dir.join("logs").is_dir());

    let pool = retrieval_pool(ledger.clone(), sh_executor(EVIDENCE_SCRIPT), climate.clone());
    let (_tx, token) = shutdown_channel();
    let report = pool.run(&spec, plan, token).await.unwrap();

    assert!(!report.interrupted);
    assert_eq!(report.done, 8, "{:?}", report);
    assert_eq!(report.failed, 0);
    assert!(report.data_failures.is_empty());
    assert_eq!(climate.profile_calls(), 4);
    assert_eq!(
        ledger.count_by_state(&spec.name, JobState::Done).await.unwrap(),
        8
    );

    for point in GridPoint::expand(&spec).unwrap() {
        let paths = PointPaths::for_point(&spec, &point);
        assert!(paths.data.exists(), "{}", paths.data.display());
        assert!(paths.scr.exists(), "{}", paths.scr.display());
    }

    let summary = summarize(&spec, false).await.unwrap();
    assert_eq!(summary.entries.len(), 4);
    assert!(summary.skipped.is_empty());
    for entry in &summary.entries {
        assert_abs_diff_eq!(entry.log_z_all, -100.0);
        assert_abs_diff_eq!(entry.log_z_removed, -110.0);
        assert_abs_diff_eq!(entry.ln_bayes, 10.0);
        assert_abs_diff_eq!(entry.sigma, 4.8512, epsilon = 0.01);
        assert!(entry.observation.is_none());
    }

    let path = ExperimentSummary::default_path(&spec);
    write_summary(&summary, &path).await.unwrap();
    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written["experiment"], "temperature");
    assert_eq!(written["entries"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn test_resume_reruns_only_failed_points() {
    let dir = tempfile::tempdir().unwrap();
    let spec = temperature_experiment(dir.path());
    let ledger = sqlite_ledger(dir.path()).await;
    let climate = Arc::new(MockClimateModel::new());

    // Retrievals of the SNR=10 points fail while the marker exists
    let marker = dir.path().join("fail-high-snr");
    std::fs::write(&marker, "").unwrap();
    let script = format!(
        r#"
if [ -e '{}' ]; then
  case "$4" in *SNR=10.*) exit 2;; esac
fi
{}"#,
        marker.display(),
        EVIDENCE_SCRIPT
    );
    let executor = sh_executor(&script);

    let first = plan(ledger.clone(), &spec, false).await;
    let pool = retrieval_pool(ledger.clone(), executor.clone(), climate.clone());
    let (_tx, token) = shutdown_channel();
    let report = pool.run(&spec, first, token).await.unwrap();
    assert_eq!(report.done, 4);
    assert_eq!(report.failed, 4);
    assert_eq!(climate.profile_calls(), 4);

    let failed = ledger.find_by_state(&spec.name, JobState::Failed).await.unwrap();
    assert!(failed
        .iter()
        .all(|j| j.last_error.as_deref() == Some("exit code 2")));

    // Partial summary skips the failed points
    let partial = summarize(&spec, false).await.unwrap();
    assert_eq!(partial.entries.len(), 2);
    assert_eq!(partial.skipped.len(), 2);

    std::fs::remove_file(&marker).unwrap();
    let second = plan(ledger.clone(), &spec, true).await;
    assert_eq!(second.skipped, 2);
    assert_eq!(second.job_count(), 4);
    assert!(second.points.iter().all(|p| !p.needs_data));

    let (_tx, token) = shutdown_channel();
    let report = pool.run(&spec, second, token).await.unwrap();
    assert_eq!(report.done, 4);
    assert_eq!(report.failed, 0);
    // Observations on disk were reused
    assert_eq!(climate.profile_calls(), 4);

    assert_eq!(
        ledger.count_by_state(&spec.name, JobState::Done).await.unwrap(),
        8
    );
    assert_eq!(summarize(&spec, false).await.unwrap().entries.len(), 4);
}

#[tokio::test]
async fn test_shutdown_kills_running_retrievals() {
    let dir = tempfile::tempdir().unwrap();
    let spec = temperature_experiment(dir.path());
    let ledger = sqlite_ledger(dir.path()).await;
    let climate = Arc::new(MockClimateModel::new());

    let plan = plan(ledger.clone(), &spec, false).await;
    let pool = retrieval_pool(ledger.clone(), sh_executor("sleep 30"), climate);
    let (tx, token) = shutdown_channel();

    let run = pool.run(&spec, plan, token);
    let stopper = async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        tx.shutdown();
    };
    let (report, _) = tokio::time::timeout(Duration::from_secs(20), async {
        tokio::join!(run, stopper)
    })
    .await
    .unwrap();
    let report = report.unwrap();

    assert!(report.interrupted);
    assert_eq!(report.done, 0);
    assert_eq!(report.cancelled, 8);
    assert_eq!(
        ledger
            .count_by_state(&spec.name, JobState::Cancelled)
            .await
            .unwrap(),
        8
    );
    let running = ledger.find_by_state(&spec.name, JobState::Running).await.unwrap();
    assert!(running.is_empty());
}

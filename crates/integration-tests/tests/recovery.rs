// Orphan recovery against a real process and the SQLite ledger

mod common;

use common::*;
use retrieval_core::application::recovery::ORPHANED_JOB_REASON;
use retrieval_core::application::RecoveryService;
use retrieval_core::domain::{Hypothesis, JobState, RetrievalJob};
use retrieval_core::port::{JobRepository, TaskExecutor, TimeProvider};
use std::process::Command;

#[tokio::test]
async fn test_orphaned_retrieval_is_killed_and_failed() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = sqlite_ledger(dir.path()).await;
    let executor = sh_executor("true");

    // A retrieval left behind by an orchestrator that crashed
    let mut child = Command::new("sleep").arg("30").spawn().unwrap();
    let pid = child.id();

    let mut orphan = RetrievalJob::new_test("orphans", Hypothesis::AllGases);
    orphan.start(time().now_millis(), Some(pid)).unwrap();
    ledger.insert(&orphan).await.unwrap();

    let mut finished = RetrievalJob::new_test("orphans", Hypothesis::GasRemoved);
    finished.start(time().now_millis(), None).unwrap();
    finished.complete(time().now_millis(), Some(0)).unwrap();
    ledger.insert(&finished).await.unwrap();

    // Other experiments are left alone
    let mut other = RetrievalJob::new_test("elsewhere", Hypothesis::AllGases);
    other.start(time().now_millis(), None).unwrap();
    ledger.insert(&other).await.unwrap();

    assert!(executor.is_alive(pid));

    let recovery = RecoveryService::new(ledger.clone(), executor.clone(), time());
    let recovered = recovery.recover_orphaned_jobs("orphans").await.unwrap();
    assert_eq!(recovered, 1);

    let status = child.wait().unwrap();
    assert!(!status.success());

    let stored = ledger.find_by_id(&orphan.id).await.unwrap().unwrap();
    assert_eq!(stored.state, JobState::Failed);
    assert_eq!(stored.last_error.as_deref(), Some(ORPHANED_JOB_REASON));
    assert!(stored.pid.is_none());
    assert!(stored.finished_at.is_some());

    let stored = ledger.find_by_id(&finished.id).await.unwrap().unwrap();
    assert_eq!(stored.state, JobState::Done);

    let stored = ledger.find_by_id(&other.id).await.unwrap().unwrap();
    assert_eq!(stored.state, JobState::Running);

    // Nothing left to recover
    assert_eq!(recovery.recover_orphaned_jobs("orphans").await.unwrap(), 0);
}

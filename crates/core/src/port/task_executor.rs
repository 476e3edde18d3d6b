// Task Executor Port
// Abstraction for launching external retrieval processes and polling them

use crate::domain::RetrievalJob;
use async_trait::async_trait;
use thiserror::Error;

/// Result of a finished process
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub duration_ms: i64,
    pub exit_code: Option<i32>,
}

/// Execution status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    Success,
    Failed,
    Killed,
}

/// Execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Process timeout after {0}ms")]
    Timeout(i64),

    #[error("Process killed: {0}")]
    Killed(String),

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("IO error: {0}")]
    IoError(String),
}

/// Handle to a spawned process, polled without blocking
pub trait ProcessHandle: Send {
    /// OS process id, if the process is still known to the OS
    fn pid(&self) -> Option<u32>;

    /// Non-blocking completion check
    ///
    /// Returns `Ok(None)` while the process is alive.
    fn try_wait(&mut self) -> Result<Option<ExecutionResult>, ExecutionError>;

    /// Ask the process to terminate without waiting for it
    fn start_kill(&mut self) -> Result<(), ExecutionError>;
}

/// Task Executor trait
///
/// Implementations:
/// - SubprocessExecutor: spawns the external retrieval command
/// - MockTaskExecutor: scripted processes for tests
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Spawn the retrieval process for a job and return immediately
    ///
    /// # Errors
    /// - ExecutionError::SpawnFailed if process cannot be started
    /// - ExecutionError::InvalidJob if the job lacks artifact paths
    fn spawn(&self, job: &RetrievalJob) -> Result<Box<dyn ProcessHandle>, ExecutionError>;

    /// Kill a running process by PID
    ///
    /// # Errors
    /// - ExecutionError::Killed if process cannot be killed
    async fn kill(&self, pid: u32) -> Result<(), ExecutionError>;

    /// Check if a process is still alive
    fn is_alive(&self, pid: u32) -> bool;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Mock executor behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Exit with code 0 after the given number of polls
        Succeed { polls: usize },
        /// Exit with the given code after the given number of polls
        Exit { polls: usize, code: i32 },
        /// Refuse to spawn
        SpawnFail(String),
        /// Never exit on its own
        Hang,
    }

    #[derive(Default)]
    struct Counters {
        spawned: AtomicUsize,
        alive: AtomicUsize,
        peak_alive: AtomicUsize,
        next_pid: AtomicU32,
    }

    /// Mock Task Executor for testing
    ///
    /// Tracks how many processes are alive at once so tests can assert the
    /// pool's concurrency cap.
    pub struct MockTaskExecutor {
        default_behavior: MockBehavior,
        per_output: Mutex<HashMap<String, Vec<MockBehavior>>>,
        counters: Arc<Counters>,
        write_outputs: bool,
    }

    impl MockTaskExecutor {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                default_behavior: behavior,
                per_output: Mutex::new(HashMap::new()),
                counters: Arc::new(Counters {
                    next_pid: AtomicU32::new(10_000),
                    ..Default::default()
                }),
                write_outputs: true,
            }
        }

        pub fn new_success() -> Self {
            Self::new(MockBehavior::Succeed { polls: 1 })
        }

        /// Do not write evidence files on success
        pub fn without_outputs(mut self) -> Self {
            self.write_outputs = false;
            self
        }

        /// Script successive runs of the job writing `output_path`
        pub fn script(&self, output_path: impl Into<String>, behaviors: Vec<MockBehavior>) {
            self.per_output
                .lock()
                .unwrap()
                .insert(output_path.into(), behaviors);
        }

        pub fn spawn_count(&self) -> usize {
            self.counters.spawned.load(Ordering::SeqCst)
        }

        pub fn alive_count(&self) -> usize {
            self.counters.alive.load(Ordering::SeqCst)
        }

        pub fn peak_alive(&self) -> usize {
            self.counters.peak_alive.load(Ordering::SeqCst)
        }

        fn behavior_for(&self, job: &RetrievalJob) -> MockBehavior {
            let mut scripted = self.per_output.lock().unwrap();
            match scripted.get_mut(&job.output_path) {
                Some(queue) if !queue.is_empty() => queue.remove(0),
                _ => self.default_behavior.clone(),
            }
        }
    }

    struct MockProcess {
        pid: u32,
        remaining_polls: Option<usize>,
        exit_code: i32,
        output_path: Option<String>,
        counters: Arc<Counters>,
        finished: bool,
        killed: bool,
    }

    impl MockProcess {
        fn finish(&mut self) {
            if !self.finished {
                self.finished = true;
                self.counters.alive.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    impl ProcessHandle for MockProcess {
        fn pid(&self) -> Option<u32> {
            if self.finished {
                None
            } else {
                Some(self.pid)
            }
        }

        fn try_wait(&mut self) -> Result<Option<ExecutionResult>, ExecutionError> {
            if self.killed {
                self.finish();
                return Ok(Some(ExecutionResult {
                    status: ExecutionStatus::Killed,
                    duration_ms: 0,
                    exit_code: None,
                }));
            }
            let Some(remaining) = self.remaining_polls.as_mut() else {
                return Ok(None);
            };
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(None);
            }
            self.finish();
            if self.exit_code == 0 {
                if let Some(path) = &self.output_path {
                    std::fs::write(path, r#"{"logz": [-50.0, -10.0]}"#)
                        .map_err(|e| ExecutionError::IoError(e.to_string()))?;
                }
            }
            Ok(Some(ExecutionResult {
                status: if self.exit_code == 0 {
                    ExecutionStatus::Success
                } else {
                    ExecutionStatus::Failed
                },
                duration_ms: 10,
                exit_code: Some(self.exit_code),
            }))
        }

        fn start_kill(&mut self) -> Result<(), ExecutionError> {
            self.killed = true;
            self.finish();
            Ok(())
        }
    }

    #[async_trait]
    impl TaskExecutor for MockTaskExecutor {
        fn spawn(&self, job: &RetrievalJob) -> Result<Box<dyn ProcessHandle>, ExecutionError> {
            let (remaining_polls, exit_code) = match self.behavior_for(job) {
                MockBehavior::Succeed { polls } => (Some(polls), 0),
                MockBehavior::Exit { polls, code } => (Some(polls), code),
                MockBehavior::SpawnFail(msg) => return Err(ExecutionError::SpawnFailed(msg)),
                MockBehavior::Hang => (None, 0),
            };

            self.counters.spawned.fetch_add(1, Ordering::SeqCst);
            let alive = self.counters.alive.fetch_add(1, Ordering::SeqCst) + 1;
            self.counters.peak_alive.fetch_max(alive, Ordering::SeqCst);

            Ok(Box::new(MockProcess {
                pid: self.counters.next_pid.fetch_add(1, Ordering::SeqCst),
                remaining_polls,
                exit_code,
                output_path: self.write_outputs.then(|| job.output_path.clone()),
                counters: Arc::clone(&self.counters),
                finished: false,
                killed: false,
            }))
        }

        async fn kill(&self, _pid: u32) -> Result<(), ExecutionError> {
            Ok(())
        }

        fn is_alive(&self, _pid: u32) -> bool {
            false
        }
    }
}

// Subprocess executor for nested-sampling retrievals
// reason: tokio::process for non-blocking polling, nix for signals (unix)
use async_trait::async_trait;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::json_command::allowed_env;
use retrieval_core::application::worker::constants::GRACEFUL_SHUTDOWN_TIMEOUT_MS;
use retrieval_core::domain::{Hypothesis, RetrievalJob};
use retrieval_core::port::task_executor::{
    ExecutionError, ExecutionResult, ExecutionStatus, ProcessHandle, TaskExecutor,
};
use retrieval_core::port::TimeProvider;

/// Launches the retrieval command once per job
///
/// Command line: `<argv...> --data <path> --output <path> --distance-au <a>`
/// plus `--remove-gas <gas>` (lower case) for the gas-removed hypothesis.
/// Stdout and stderr are appended to the job's log file.
pub struct SubprocessExecutor {
    argv: Vec<String>,
    working_dir: Option<PathBuf>,
    env_allowlist: Vec<String>,
    time_provider: Arc<dyn TimeProvider>,
}

impl SubprocessExecutor {
    /// Create a new subprocess executor
    ///
    /// # Arguments
    /// * `argv` - Retrieval program and its fixed arguments
    /// * `time_provider` - Time provider for duration tracking
    /// * `env_allowlist` - Environment variables passed through to children
    ///
    /// # Example
    /// ```text
    /// let executor = SubprocessExecutor::new(
    ///     vec!["python3".into(), "retrieve.py".into()],
    ///     Arc::new(SystemTimeProvider),
    ///     vec!["PATH".to_string(), "HOME".to_string()],
    /// )?;
    /// ```
    pub fn new(
        argv: Vec<String>,
        time_provider: Arc<dyn TimeProvider>,
        env_allowlist: Vec<String>,
    ) -> Result<Self, ExecutionError> {
        if argv.is_empty() {
            return Err(ExecutionError::SpawnFailed(
                "retrieval command line is empty".to_string(),
            ));
        }
        Ok(Self {
            argv,
            working_dir: None,
            env_allowlist,
            time_provider,
        })
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Arguments appended to the configured command line for one job
    fn job_args(job: &RetrievalJob) -> Result<Vec<String>, ExecutionError> {
        if job.data_path.is_empty() || job.output_path.is_empty() {
            return Err(ExecutionError::InvalidJob(format!(
                "job {} has no data or output path",
                job.id
            )));
        }

        let mut args = vec![
            "--data".to_string(),
            job.data_path.clone(),
            "--output".to_string(),
            job.output_path.clone(),
            "--distance-au".to_string(),
            job.distance_au.to_string(),
        ];
        if job.hypothesis == Hypothesis::GasRemoved {
            args.push("--remove-gas".to_string());
            args.push(job.tested_gas.to_lowercase());
        }
        Ok(args)
    }

    /// Stdout/stderr targets: the job log file, or nothing
    fn log_streams(log_path: Option<&str>) -> Result<(Stdio, Stdio), ExecutionError> {
        let Some(path) = log_path else {
            return Ok((Stdio::null(), Stdio::null()));
        };
        let path = Path::new(path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ExecutionError::IoError(e.to_string()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| ExecutionError::IoError(format!("{}: {}", path.display(), e)))?;
        let stderr = file
            .try_clone()
            .map_err(|e| ExecutionError::IoError(e.to_string()))?;
        Ok((Stdio::from(file), Stdio::from(stderr)))
    }

    /// Kill process with SIGTERM first, then SIGKILL if needed
    async fn kill_graceful(&self, pid: u32) -> Result<(), ExecutionError> {
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            let pid = i32::try_from(pid)
                .map_err(|_| ExecutionError::Killed(format!("pid {} out of range", pid)))?;

            info!(pid = %pid, "Sending SIGTERM");
            kill(Pid::from_raw(pid), Signal::SIGTERM)
                .map_err(|e| ExecutionError::Killed(format!("SIGTERM failed: {}", e)))?;

            let start_time = self.time_provider.now_millis();
            loop {
                tokio::time::sleep(Duration::from_millis(100)).await;

                if kill(Pid::from_raw(pid), None).is_err() {
                    info!(pid = %pid, "Process exited after SIGTERM");
                    return Ok(());
                }

                if self.time_provider.now_millis() - start_time > GRACEFUL_SHUTDOWN_TIMEOUT_MS {
                    warn!(pid = %pid, "Process did not exit after SIGTERM, sending SIGKILL");
                    kill(Pid::from_raw(pid), Signal::SIGKILL)
                        .map_err(|e| ExecutionError::Killed(format!("SIGKILL failed: {}", e)))?;
                    return Ok(());
                }
            }
        }

        #[cfg(not(unix))]
        {
            Err(ExecutionError::Killed(format!(
                "killing pid {} is only supported on unix",
                pid
            )))
        }
    }
}

#[async_trait]
impl TaskExecutor for SubprocessExecutor {
    fn spawn(&self, job: &RetrievalJob) -> Result<Box<dyn ProcessHandle>, ExecutionError> {
        let args = Self::job_args(job)?;
        let (stdout, stderr) = Self::log_streams(job.log_path.as_deref())?;

        let mut command = Command::new(&self.argv[0]);
        command
            .args(&self.argv[1..])
            .args(&args)
            .env_clear()
            .envs(allowed_env(&self.env_allowlist))
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let child = command
            .spawn()
            .map_err(|e| ExecutionError::SpawnFailed(format!("{}: {}", self.argv[0], e)))?;
        let pid = child.id();

        info!(
            job_id = %job.id,
            pid = ?pid,
            hypothesis = %job.hypothesis,
            stem = %job.file_stem,
            "Retrieval process started"
        );

        Ok(Box::new(ChildProcess {
            child,
            started_at: self.time_provider.now_millis(),
            time_provider: Arc::clone(&self.time_provider),
        }))
    }

    async fn kill(&self, pid: u32) -> Result<(), ExecutionError> {
        self.kill_graceful(pid).await
    }

    fn is_alive(&self, pid: u32) -> bool {
        #[cfg(unix)]
        {
            use nix::sys::signal::kill;
            use nix::unistd::Pid;

            // Signal 0 checks if process exists without actually sending a signal
            match i32::try_from(pid) {
                Ok(pid) => kill(Pid::from_raw(pid), None).is_ok(),
                Err(_) => false,
            }
        }

        #[cfg(not(unix))]
        {
            let _ = pid;
            false
        }
    }
}

/// A running retrieval child
struct ChildProcess {
    child: Child,
    started_at: i64,
    time_provider: Arc<dyn TimeProvider>,
}

impl ProcessHandle for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn try_wait(&mut self) -> Result<Option<ExecutionResult>, ExecutionError> {
        let status = match self.child.try_wait() {
            Ok(Some(status)) => status,
            Ok(None) => return Ok(None),
            Err(e) => return Err(ExecutionError::IoError(e.to_string())),
        };

        let status_kind = if status.success() {
            ExecutionStatus::Success
        } else if status.code().is_none() {
            // No exit code means the process was terminated by a signal
            ExecutionStatus::Killed
        } else {
            ExecutionStatus::Failed
        };

        Ok(Some(ExecutionResult {
            status: status_kind,
            duration_ms: self.time_provider.now_millis() - self.started_at,
            exit_code: status.code(),
        }))
    }

    fn start_kill(&mut self) -> Result<(), ExecutionError> {
        self.child
            .start_kill()
            .map_err(|e| ExecutionError::Killed(e.to_string()))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use retrieval_core::port::time_provider::SystemTimeProvider;

    fn job_in(dir: &Path, hypothesis: Hypothesis) -> RetrievalJob {
        let mut job = RetrievalJob::new("job-1", 0, "exp", 0, "Ts=288.00000_SNR=5.00000", hypothesis);
        job.tested_gas = "CH4".to_string();
        job.distance_au = 1.5;
        job.data_path = dir.join("data.json").display().to_string();
        job.output_path = dir.join("out.json").display().to_string();
        job.log_path = Some(dir.join("logs/job.log").display().to_string());
        job
    }

    fn executor(script: &str) -> SubprocessExecutor {
        SubprocessExecutor::new(
            vec!["sh".into(), "-c".into(), script.into(), "retrieve".into()],
            Arc::new(SystemTimeProvider),
            vec!["PATH".to_string()],
        )
        .unwrap()
    }

    async fn wait(handle: &mut Box<dyn ProcessHandle>) -> ExecutionResult {
        for _ in 0..200 {
            if let Some(result) = handle.try_wait().unwrap() {
                return result;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("process did not finish");
    }

    #[test]
    fn test_job_args() {
        let dir = Path::new("/tmp/exp");
        let all = SubprocessExecutor::job_args(&job_in(dir, Hypothesis::AllGases)).unwrap();
        assert_eq!(
            all,
            vec!["--data", "/tmp/exp/data.json", "--output", "/tmp/exp/out.json", "--distance-au", "1.5"]
        );

        let removed = SubprocessExecutor::job_args(&job_in(dir, Hypothesis::GasRemoved)).unwrap();
        assert_eq!(&removed[6..], ["--remove-gas", "ch4"]);
    }

    #[test]
    fn test_job_without_paths_is_invalid() {
        let job = RetrievalJob::new("job-1", 0, "exp", 0, "stem", Hypothesis::AllGases);
        assert!(matches!(
            SubprocessExecutor::job_args(&job),
            Err(ExecutionError::InvalidJob(_))
        ));
    }

    #[tokio::test]
    async fn test_output_and_log_written() {
        let dir = tempfile::tempdir().unwrap();
        let job = job_in(dir.path(), Hypothesis::GasRemoved);
        // "$@" holds the job arguments; $4 is the output path
        let executor = executor(r#"echo "args: $*"; echo '{"logz": [-3.0]}' > "$4""#);

        let mut handle = executor.spawn(&job).unwrap();
        assert!(handle.pid().is_some());
        let result = wait(&mut handle).await;

        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.exit_code, Some(0));
        assert!(Path::new(&job.output_path).exists());
        let log = std::fs::read_to_string(job.log_path.unwrap()).unwrap();
        assert!(log.contains("--remove-gas ch4"));
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor("echo boom >&2; exit 4");
        let mut handle = executor.spawn(&job_in(dir.path(), Hypothesis::AllGases)).unwrap();

        let result = wait(&mut handle).await;
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.exit_code, Some(4));
    }

    #[tokio::test]
    async fn test_start_kill_reports_killed() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor("sleep 30");
        let mut handle = executor.spawn(&job_in(dir.path(), Hypothesis::AllGases)).unwrap();

        assert!(handle.try_wait().unwrap().is_none());
        handle.start_kill().unwrap();
        let result = wait(&mut handle).await;
        assert_eq!(result.status, ExecutionStatus::Killed);
        assert_eq!(result.exit_code, None);
    }

    #[tokio::test]
    async fn test_kill_by_pid() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor("sleep 30");
        let mut handle = executor.spawn(&job_in(dir.path(), Hypothesis::AllGases)).unwrap();
        let pid = handle.pid().unwrap();

        assert!(executor.is_alive(pid));
        executor.kill(pid).await.unwrap();
        let result = wait(&mut handle).await;
        assert_eq!(result.status, ExecutionStatus::Killed);
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let executor = SubprocessExecutor::new(
            vec!["/nonexistent/retrieve".into()],
            Arc::new(SystemTimeProvider),
            vec![],
        )
        .unwrap();
        assert!(matches!(
            executor.spawn(&job_in(dir.path(), Hypothesis::AllGases)),
            Err(ExecutionError::SpawnFailed(_))
        ));
    }
}

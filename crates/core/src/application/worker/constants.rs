// Pool constants (no magic values)
use std::time::Duration;

/// Default number of process slots, the orchestrator included
pub const DEFAULT_MAX_PROCESSES: usize = 40;

/// Default interval between pool polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Slots kept for the orchestrator itself
pub const ORCHESTRATOR_SLOTS: usize = 1;

/// Default retry base delay (1000ms = 1s)
pub const DEFAULT_RETRY_BASE_DELAY_MS: i64 = 1000;

/// Graceful process shutdown timeout (5 seconds)
/// SIGTERM first, SIGKILL after this
pub const GRACEFUL_SHUTDOWN_TIMEOUT_MS: i64 = 5000;

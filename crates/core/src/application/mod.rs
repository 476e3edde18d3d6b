// Application Layer - Use Cases and Business Logic

pub mod atmosphere_file;
pub mod guess;
pub mod noise;
pub mod physics;
pub mod planner;
pub mod recovery;
pub mod retry;
pub mod scr_template;
pub mod significance;
pub mod stable_climate;
pub mod summary;
pub mod synthesis;
pub mod worker;

// Re-exports
pub use planner::{PlanOptions, PlannedPoint, PlannerService, RunPlan};
pub use recovery::RecoveryService;
pub use retry::{RetryDecision, RetryPolicy};
pub use significance::detection_sigma;
pub use summary::{summarize, write_summary, ExperimentSummary, SummaryEntry};
pub use synthesis::DataSynthesizer;
pub use worker::{
    shutdown_channel, PoolConfig, RetrievalPool, RunReport, ShutdownSender, ShutdownToken,
};

// Port Layer - Interfaces for external dependencies

pub mod climate_model;
pub mod id_provider; // For deterministic testing
pub mod job_repository;
pub mod observation_source;
pub mod spectrum_model;
pub mod task_executor;
pub mod time_provider;

// Re-exports
pub use climate_model::{
    ClimateModel, ClimateProfile, ClimateSettings, FluxRequest, ModelError, ProfileComposition,
    ProfileRequest, ToaFluxes,
};
pub use id_provider::IdProvider;
pub use job_repository::JobRepository;
pub use observation_source::ObservationSource;
pub use spectrum_model::SpectrumModel;
pub use task_executor::{
    ExecutionError, ExecutionResult, ExecutionStatus, ProcessHandle, TaskExecutor,
};
pub use time_provider::TimeProvider;

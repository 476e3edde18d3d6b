// Domain Layer - Pure business logic and entities

pub mod error;
pub mod experiment;
pub mod grid;
pub mod job;
pub mod observation;

// Re-exports
pub use error::DomainError;
pub use experiment::{
    AtmosphereSpec, AxisValues, Baseline, ClimateSpec, ExperimentSpec, GridSpec, MixingAxis,
};
pub use grid::{format_scientific, species_key, GasAbundance, GridPoint, PointPaths};
pub use job::{Hypothesis, JobId, JobState, RetrievalJob};
pub use observation::{EvidenceFile, FakeObservation, Spectrum};

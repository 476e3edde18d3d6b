// Retrieval Infrastructure - System Adapters
// Implements: TaskExecutor, ClimateModel, SpectrumModel over external commands

pub mod external_climate;
pub mod external_spectrum;
pub mod json_command;
pub mod subprocess_executor;

pub use external_climate::ExternalClimateModel;
pub use external_spectrum::ExternalSpectrumModel;
pub use json_command::JsonCommand;
pub use subprocess_executor::SubprocessExecutor;

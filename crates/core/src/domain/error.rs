// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid job state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Invalid experiment: {0}")]
    InvalidExperiment(String),

    #[error("Invalid grid axis '{axis}': {reason}")]
    InvalidAxis { axis: String, reason: String },
}

pub type Result<T> = std::result::Result<T, DomainError>;

//! Line startup errors.

use singu_common::config::ConfigError;
use singu_control_unit::PlanError;
use singu_hal::DriveError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Drive(#[from] DriveError),

    #[error("axis controller topology {controller} does not match configuration {config}")]
    TopologyMismatch { controller: usize, config: usize },
}

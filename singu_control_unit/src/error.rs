//! Planner error type.
//!
//! Sequence anomalies are not errors (see [`DropReason`](crate::guard::DropReason));
//! only configuration and shape problems surface as `Err`.

use singu_common::config::ConfigError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum PlanError {
    #[error("axis count mismatch: planner has {expected}, topology {topology}, frame {input}")]
    AxisCountMismatch {
        expected: usize,
        topology: usize,
        input: usize,
    },

    #[error("main axis count mismatch: topology has {expected}, frame {actual}")]
    MainCountMismatch { expected: usize, actual: usize },

    #[error("non-finite speed in frame {sequence}")]
    NonFiniteSpeed { sequence: i64 },

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
}

//! Singulation line configuration and tuning types.
//!
//! This module contains the `singu.toml` schema and the runtime types
//! derived from it:
//! - `LineConfig` - Root configuration loaded from singu.toml
//! - `PlannerConfig` / `PlannerParams` - Speed planner mechanics and tuning
//! - `GuardConfig` - Frame guard supervision parameters

pub mod config;
pub mod tuning;

pub use config::{
    AxisEntry, ControllerTemplate, GridConfig, GuardSection, HubConfig, LineConfig,
    MechanicsSection, PlannerSection, TransportRole, UpstreamConfig,
};
pub use tuning::{AxisMechanics, GuardConfig, PlannerConfig, PlannerParams};

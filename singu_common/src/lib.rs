//! Singulation Line Common Library
//!
//! This crate provides the shared data model, constants and configuration
//! loading utilities for all singulation line workspace crates.
//!
//! # Module Structure
//!
//! - [`frame`] - Decoded upstream frames (`SpeedSet`) and channel kinds
//! - [`axis`] - Axis identifiers, topology, RPM values and axis events
//! - [`safety`] - Safety isolation state and trigger vocabulary
//! - [`codec`] - Contract for turning raw bytes into `SpeedSet` values
//! - [`config`] - Configuration loading traits and types
//! - [`line`] - Line configuration (`singu.toml`) and validation
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use singu_common::prelude::*;
//!
//! let topology = ConveyorTopology::from_roles(&[
//!     (AxisId(1), AxisRole::Main),
//!     (AxisId(2), AxisRole::Eject),
//! ])
//! .unwrap();
//! assert_eq!(topology.main_count(), 1);
//! ```

pub mod axis;
pub mod codec;
pub mod config;
pub mod consts;
pub mod frame;
pub mod line;
pub mod prelude;
pub mod safety;

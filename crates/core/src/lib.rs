//! Core utilities for the prism GPU submission and binding core.
//!
//! This crate provides foundational types used across the workspace:
//! - Engine configuration
//! - Logging initialization

mod config;
mod logging;

pub use config::{BindingFlagsConfig, EngineConfig};
pub use logging::init_logging;

//! Core provisioning logic: config, resolution, planning and the pipeline.

pub mod artifact;
pub mod error;
pub mod executor;
pub mod host;
pub mod marker;
pub mod parser;
pub mod planner;
pub mod resolver;
pub mod state;
pub mod types;

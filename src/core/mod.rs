//! Core build logic: config, input, specification, cache, stages, runner.

pub mod artifact;
pub mod cache;
pub mod config;
pub mod error;
pub mod input;
pub mod pipeline;
pub mod planner;
pub mod runner;
pub mod spec;
pub mod types;
pub mod workspace;

//! CLI command implementations.

pub mod agent;
pub mod config;
pub mod run;
pub mod workflow;

//! Domain layer for the conductor orchestration core
//!
//! Pure data types, the error taxonomy and the trait seams the services
//! depend on.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainResult, OrchestrationError};

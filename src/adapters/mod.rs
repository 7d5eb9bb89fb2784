//! Concrete implementations of the domain ports.

pub mod condition;
pub mod file_store;
pub mod memory;
pub mod notify;
pub mod simulated;

pub use condition::OutputConditionEvaluator;
pub use file_store::JsonFileExecutionStore;
pub use memory::InMemoryExecutionStore;
pub use notify::{RecordingNotifier, TracingNotifier};
pub use simulated::{SimulatedConfig, SimulatedExecutor, SimulatedResponse};

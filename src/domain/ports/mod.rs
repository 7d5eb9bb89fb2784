//! Port trait definitions (Hexagonal Architecture)
//!
//! - `CapabilityExecutor`: runs a task's capability on an agent
//! - `ExecutionStore`: persists execution snapshots
//! - `NotificationSink`: delivers notifications
//! - `ConditionEvaluator`: decides conditional phases, loop exits and gates

pub mod capability_executor;
pub mod condition_evaluator;
pub mod errors;
pub mod execution_store;
pub mod notification_sink;

pub use capability_executor::{
    CapabilityExecutor, CapabilityRequest, CapabilityResult, ProgressReporter,
};
pub use condition_evaluator::{is_truthy, ConditionContext, ConditionEvaluator};
pub use errors::{CapabilityError, StoreError};
pub use execution_store::ExecutionStore;
pub use notification_sink::{Notification, NotificationKind, NotificationSink};

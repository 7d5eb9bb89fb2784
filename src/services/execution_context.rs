//! Shared per-execution state.
//!
//! The execution record is owned by the task driving it; phase executors and
//! observers go through this context. Every mutation bumps a `watch` change
//! counter so waiters re-evaluate readiness without polling. Events are
//! appended to the execution log and published on the bus under the same
//! write lock, which keeps per-execution ordering.

use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::watch;
use uuid::Uuid;

use crate::domain::models::{EventPayload, WorkflowDefinition, WorkflowExecution};
use crate::services::event_bus::EventBus;

pub struct ExecutionContext {
    id: Uuid,
    definition: RwLock<Arc<WorkflowDefinition>>,
    state: RwLock<WorkflowExecution>,
    bus: Arc<EventBus>,
    changes: watch::Sender<u64>,
    cancel: watch::Sender<bool>,
    pause: watch::Sender<bool>,
    /// Open only while the driver is parked on a human escalation.
    awaiting_resume: watch::Sender<bool>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .field("paused", &self.is_pause_requested())
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    pub fn new(
        execution: WorkflowExecution,
        definition: Arc<WorkflowDefinition>,
        bus: Arc<EventBus>,
    ) -> Arc<Self> {
        let (changes, _) = watch::channel(0);
        let (cancel, _) = watch::channel(false);
        let (pause, _) = watch::channel(false);
        let (awaiting_resume, _) = watch::channel(false);
        Arc::new(Self {
            id: execution.id,
            definition: RwLock::new(definition),
            state: RwLock::new(execution),
            bus,
            changes,
            cancel,
            pause,
            awaiting_resume,
        })
    }

    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Definition currently being executed (changes on fallback).
    pub fn definition(&self) -> Arc<WorkflowDefinition> {
        Arc::clone(
            &self
                .definition
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    pub fn set_definition(&self, definition: Arc<WorkflowDefinition>) {
        *self
            .definition
            .write()
            .unwrap_or_else(PoisonError::into_inner) = definition;
        self.bump();
    }

    /// Cloned snapshot of the execution record.
    pub fn snapshot(&self) -> WorkflowExecution {
        self.read(Clone::clone)
    }

    pub fn read<R>(&self, f: impl FnOnce(&WorkflowExecution) -> R) -> R {
        let guard = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    /// Mutate the record and wake every waiter.
    pub fn update<R>(&self, f: impl FnOnce(&mut WorkflowExecution) -> R) -> R {
        let result = {
            let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
            f(&mut guard)
        };
        self.bump();
        result
    }

    /// Append an event to the execution log and publish it.
    pub fn emit(&self, payload: EventPayload) {
        {
            let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let event = self.bus.publish(payload);
            guard.push_event(event.sequence.0, event.payload);
        }
        self.bump();
    }

    /// Mutate the record, then log and publish the returned events, all under
    /// one write lock.
    pub fn update_and_emit(&self, f: impl FnOnce(&mut WorkflowExecution) -> Vec<EventPayload>) {
        {
            let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
            for payload in f(&mut guard) {
                let event = self.bus.publish(payload);
                guard.push_event(event.sequence.0, event.payload);
            }
        }
        self.bump();
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    fn bump(&self) {
        self.changes.send_modify(|counter| *counter = counter.wrapping_add(1));
    }

    /// Request cooperative cancellation.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
        self.bump();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel.subscribe();
        // The sender lives as long as `self`, so this only ends on `true`.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Ask the engine to pause at the next phase boundary.
    pub fn request_pause(&self) {
        self.pause.send_replace(true);
    }

    pub fn is_pause_requested(&self) -> bool {
        *self.pause.borrow()
    }

    /// Withdraw a pause request, releasing a paused execution.
    pub fn clear_pause(&self) {
        self.pause.send_replace(false);
    }

    /// Wait until the pause request is withdrawn. Returns false if cancelled
    /// instead.
    pub async fn wait_while_paused(&self) -> bool {
        let mut rx = self.pause.subscribe();
        tokio::select! {
            released = async { rx.wait_for(|paused| !*paused).await.is_ok() } => {
                released && !self.is_cancelled()
            }
            () = self.cancelled() => false,
        }
    }

    /// Release an execution parked on an escalation. False when the driver
    /// is not parked; the call leaves nothing behind for a later wait.
    pub fn resume(&self) -> bool {
        self.awaiting_resume.send_if_modified(|awaiting| std::mem::replace(awaiting, false))
    }

    pub fn is_awaiting_resume(&self) -> bool {
        *self.awaiting_resume.borrow()
    }

    /// Park until [`ExecutionContext::resume`]. Returns false if cancelled
    /// instead.
    pub async fn wait_for_resume(&self) -> bool {
        let mut rx = self.awaiting_resume.subscribe();
        self.awaiting_resume.send_replace(true);
        if self.is_cancelled() {
            self.awaiting_resume.send_replace(false);
            return false;
        }
        let resumed = tokio::select! {
            released = async { rx.wait_for(|awaiting| !*awaiting).await.is_ok() } => {
                released && !self.is_cancelled()
            }
            () = self.cancelled() => false,
        };
        self.awaiting_resume.send_replace(false);
        resumed
    }
}

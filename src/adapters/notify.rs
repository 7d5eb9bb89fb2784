//! Notification sinks.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::domain::ports::{Notification, NotificationKind, NotificationSink};

/// Emits one structured log line per notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl NotificationSink for TracingNotifier {
    async fn notify(&self, notification: Notification) -> anyhow::Result<()> {
        match notification.kind {
            NotificationKind::Failure
            | NotificationKind::Escalation
            | NotificationKind::SlaViolation => warn!(
                execution_id = %notification.execution_id,
                workflow_id = %notification.workflow_id,
                kind = ?notification.kind,
                channel = %notification.channel,
                subject = %notification.subject,
                body = %notification.body,
                "notification"
            ),
            NotificationKind::Completion | NotificationKind::ConstraintWarning => info!(
                execution_id = %notification.execution_id,
                workflow_id = %notification.workflow_id,
                kind = ?notification.kind,
                channel = %notification.channel,
                subject = %notification.subject,
                "notification"
            ),
        }
        Ok(())
    }
}

/// Keeps every notification in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }

    pub async fn of_kind(&self, kind: NotificationKind) -> Vec<Notification> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|n| n.kind == kind)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn notify(&self, notification: Notification) -> anyhow::Result<()> {
        self.sent.lock().await.push(notification);
        Ok(())
    }
}

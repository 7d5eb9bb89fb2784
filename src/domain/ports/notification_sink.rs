use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::models::NotificationChannel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
    Completion,
    Failure,
    Escalation,
    SlaViolation,
    ConstraintWarning,
}

/// Message routed to one declared notification channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub kind: NotificationKind,
    pub channel: NotificationChannel,
    pub subject: String,
    pub body: String,
}

/// Outbound notification delivery
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: Notification) -> anyhow::Result<()>;
}

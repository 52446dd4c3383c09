mod webhook;

pub use webhook::WebhookNotifier;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::Result;

/// Events a faculty member is told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    Submitted,
    Rejected,
    Appealed,
    Finalized,
}

impl fmt::Display for NotificationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationEvent::Submitted => write!(f, "submitted"),
            NotificationEvent::Rejected => write!(f, "rejected"),
            NotificationEvent::Appealed => write!(f, "appealed"),
            NotificationEvent::Finalized => write!(f, "finalized"),
        }
    }
}

/// Delivers notifications. Callers treat failures as best-effort.
#[allow(async_fn_in_trait)]
pub trait NotificationSink {
    async fn notify(&self, faculty_id: &str, event: NotificationEvent, payload: Value) -> Result<()>;
}

/// Writes notifications to the tracing log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    async fn notify(&self, faculty_id: &str, event: NotificationEvent, payload: Value) -> Result<()> {
        info!(faculty_id, %event, %payload, "Notification");
        Ok(())
    }
}

/// The sink chosen from configuration: a webhook when `notify_url` is set.
#[derive(Debug, Clone)]
pub enum Notifier {
    Webhook(WebhookNotifier),
    Log(LogNotifier),
}

impl Notifier {
    pub fn from_config(url: Option<&str>, timeout_ms: u64) -> Result<Self> {
        match url {
            Some(url) => Ok(Notifier::Webhook(WebhookNotifier::new(url, timeout_ms)?)),
            None => Ok(Notifier::Log(LogNotifier)),
        }
    }
}

impl NotificationSink for Notifier {
    async fn notify(&self, faculty_id: &str, event: NotificationEvent, payload: Value) -> Result<()> {
        match self {
            Notifier::Webhook(n) => n.notify(faculty_id, event, payload).await,
            Notifier::Log(n) => n.notify(faculty_id, event, payload).await,
        }
    }
}

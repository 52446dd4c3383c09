use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use super::{NotificationEvent, NotificationSink};
use crate::error::{EscalafonError, Result};

#[derive(Debug, Serialize)]
struct WebhookBody<'a> {
    faculty_id: &'a str,
    event: NotificationEvent,
    sent_at: chrono::DateTime<Utc>,
    payload: Value,
}

/// POSTs each notification as JSON to a configured URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout_ms: u64) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_millis(timeout_ms.min(10_000)))
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

impl NotificationSink for WebhookNotifier {
    async fn notify(&self, faculty_id: &str, event: NotificationEvent, payload: Value) -> Result<()> {
        let body = WebhookBody {
            faculty_id,
            event,
            sent_at: Utc::now(),
            payload,
        };
        let response = self.client.post(&self.url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(EscalafonError::Notification(format!(
                "webhook returned {}: {message}",
                status.as_u16()
            )));
        }
        Ok(())
    }
}

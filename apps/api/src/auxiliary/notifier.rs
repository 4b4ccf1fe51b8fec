//! Learner-facing notifications about generation outcomes.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    ContentReady {
        job_id: Uuid,
        learner_id: String,
        course_id: String,
        content_id: Uuid,
    },
    GenerationFailed {
        job_id: Uuid,
        learner_id: String,
        course_id: String,
        error_message: String,
    },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Default notifier when no webhook is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        info!("Notification: {:?}", notification);
        Ok(())
    }
}

/// POSTs each notification as JSON to a fixed URL.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(client: Client, url: String) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        let response = self.client.post(&self.url).json(notification).send().await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("webhook {} returned {}", self.url, status);
        }
        Ok(())
    }
}

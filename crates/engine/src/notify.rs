//! Outbound delete notifications.

use std::time::Duration;

use anyhow::Context;
use serde::Serialize;
use tracing::debug;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Best-effort notification sink; failures are logged by the caller, never fatal.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Serialize)]
struct WebhookMessage<'a> {
    message: &'a str,
}

/// Posts `{"message": ...}` to a webhook. Without a URL every call is a no-op.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    url: Option<String>,
    http: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { url: url.filter(|u| !u.is_empty()), http }
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, message: &str) -> anyhow::Result<()> {
        let Some(url) = &self.url else {
            return Ok(());
        };
        debug!(%url, "posting delete notification");
        self.http
            .post(url)
            .json(&WebhookMessage { message })
            .send()
            .await
            .context("sending webhook notification")?
            .error_for_status()
            .context("webhook rejected notification")?;
        Ok(())
    }
}

//! Alert delivery.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use fleetops_core::{ConfigError, FleetConfig, Notifier};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::ControllerResult;

/// Writes alerts to the log. Used when no webhook is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_alert(&self, subject: &str, html: &str) -> anyhow::Result<()> {
        warn!(%subject, body = %html, "alert");
        Ok(())
    }
}

#[derive(Serialize)]
struct AlertPayload<'a> {
    subject: &'a str,
    html: &'a str,
}

/// POSTs alerts as JSON to a webhook.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("fleetops/0.1")
            .build()
            .context("failed to build webhook client")?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send_alert(&self, subject: &str, html: &str) -> anyhow::Result<()> {
        debug!(url = %self.url, %subject, "sending webhook alert");
        self.client
            .post(&self.url)
            .json(&AlertPayload { subject, html })
            .send()
            .await
            .with_context(|| format!("webhook {} unreachable", self.url))?
            .error_for_status()
            .context("webhook rejected alert")?;
        info!(%subject, "alert delivered");
        Ok(())
    }
}

/// Notifier described by `config.notify`.
pub fn from_config(config: &FleetConfig) -> ControllerResult<Arc<dyn Notifier>> {
    match &config.notify.webhook_url {
        Some(url) => {
            let timeout = config.notify_timeout()?;
            let notifier = WebhookNotifier::new(url.clone(), timeout)
                .map_err(|e| ConfigError::Invalid(format!("notify.webhook_url: {e:#}")))?;
            Ok(Arc::new(notifier))
        }
        None => Ok(Arc::new(LogNotifier)),
    }
}

/// `<p>` paragraphs for an alert body.
pub fn paragraphs<I, S>(lines: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    lines
        .into_iter()
        .map(|line| format!("<p>{}</p>", line.as_ref()))
        .collect()
}

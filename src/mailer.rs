use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::info;

use crate::config::AppConfig;

#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Transactional-mail seam. Dispatch is at-most-once; the notification row is
/// the durable record of intent.
#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    async fn send(&self, message: EmailMessage) -> Result<()>;
}

/// Posts to a transactional-mail HTTP API (JSON body, bearer key).
pub struct HttpMailer {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    from: String,
}

impl HttpMailer {
    pub fn new(endpoint: String, api_key: Option<String>, from: String) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            api_key,
            from,
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, message: EmailMessage) -> Result<()> {
        let payload = json!({
            "from": self.from,
            "to": message.to,
            "subject": message.subject,
            "html": message.html,
            "text": message.text,
        });

        let mut request = self.client.post(&self.endpoint).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.context("email request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("email provider returned {status}: {body}");
        }
        Ok(())
    }
}

/// Used when no provider is configured; logs and succeeds so notification
/// flow stays exercisable in development.
pub struct NoopMailer;

#[async_trait]
impl Mailer for NoopMailer {
    async fn send(&self, message: EmailMessage) -> Result<()> {
        info!(to = %message.to, subject = %message.subject, "email provider not configured; dropping message");
        Ok(())
    }
}

pub fn from_config(config: &AppConfig) -> std::sync::Arc<dyn Mailer> {
    match &config.email_api_url {
        Some(endpoint) => std::sync::Arc::new(HttpMailer::new(
            endpoint.clone(),
            config.email_api_key.clone(),
            config.email_from.clone(),
        )),
        None => std::sync::Arc::new(NoopMailer),
    }
}

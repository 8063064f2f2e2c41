use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::info;

use crate::config::AppConfig;

#[async_trait]
pub trait SmsSender: Send + Sync + 'static {
    async fn send(&self, to: &str, text: &str) -> Result<()>;
}

pub struct HttpSmsSender {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    from: Option<String>,
}

impl HttpSmsSender {
    pub fn new(endpoint: String, api_key: Option<String>, from: Option<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            api_key,
            from,
        }
    }
}

#[async_trait]
impl SmsSender for HttpSmsSender {
    async fn send(&self, to: &str, text: &str) -> Result<()> {
        let payload = json!({
            "from": self.from,
            "to": to,
            "body": text,
        });

        let mut request = self.client.post(&self.endpoint).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.context("sms request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("sms provider returned {status}: {body}");
        }
        Ok(())
    }
}

pub struct NoopSmsSender;

#[async_trait]
impl SmsSender for NoopSmsSender {
    async fn send(&self, to: &str, text: &str) -> Result<()> {
        info!(%to, %text, "sms provider not configured; dropping message");
        Ok(())
    }
}

pub fn from_config(config: &AppConfig) -> std::sync::Arc<dyn SmsSender> {
    match &config.sms_api_url {
        Some(endpoint) => std::sync::Arc::new(HttpSmsSender::new(
            endpoint.clone(),
            config.sms_api_key.clone(),
            config.sms_from.clone(),
        )),
        None => std::sync::Arc::new(NoopSmsSender),
    }
}

/// Message template for upcoming rent.
pub fn rent_reminder_text(property_name: &str, amount_cents: i64, due_date: &str) -> String {
    format!(
        "Rent reminder: {}.{:02} due on {due_date} for {property_name}. Reply STOP to opt out.",
        amount_cents / 100,
        amount_cents % 100
    )
}

/// Message template for request status updates.
pub fn request_update_text(title: &str, status: &str) -> String {
    format!("Maintenance update: \"{title}\" is now {status}.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rent_reminder_formats_cents() {
        let text = rent_reminder_text("Oakwood", 123450, "2024-06-01");
        assert!(text.contains("1234.50"));
        assert!(text.contains("Oakwood"));
    }
}

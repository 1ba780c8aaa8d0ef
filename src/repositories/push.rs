use anyhow::bail;
use async_trait::async_trait;

use crate::models::notifications::PushMessage;

/// Outbound push delivery.
#[async_trait]
pub trait PushSender: Send + Sync + 'static {
    async fn send(&self, message: &PushMessage) -> Result<(), anyhow::Error>;
}

pub struct PushApi {
    url: String,
    access_token: Option<String>,
    client: reqwest::Client,
}

impl PushApi {
    pub fn new(url: String, access_token: Option<String>) -> Self {
        Self {
            url,
            access_token,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl PushSender for PushApi {
    async fn send(&self, message: &PushMessage) -> Result<(), anyhow::Error> {
        let mut request = self
            .client
            .post(&self.url)
            .header("Accept", "application/json")
            .json(message);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            bail!("Push provider returned {}: {}", status, body);
        }

        let response_json: serde_json::Value = serde_json::from_str(&body)?;
        if let Some(errors) = response_json.get("errors") {
            bail!("Push provider rejected message: {}", errors);
        }

        Ok(())
    }
}

/// Accepts every message and delivers nothing. Used when push is disabled.
pub struct DisabledPush;

#[async_trait]
impl PushSender for DisabledPush {
    async fn send(&self, message: &PushMessage) -> Result<(), anyhow::Error> {
        log::debug!("Push disabled, dropping message for {}.", message.to);
        Ok(())
    }
}

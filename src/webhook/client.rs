use std::time::Duration;

use reqwest::Client;

use super::error::WebhookError;
use super::types::{WebhookReply, WebhookRequest};

/// URL padrão do webhook REST exposto pelo backend de testes.
pub const DEFAULT_WEBHOOK_URL: &str = "http://localhost:30916/webhooks/myio/webhook";

pub struct WebhookClient {
    client: Client,
    url: String,
}

impl WebhookClient {
    /// Cria um cliente para `url` com o timeout total por requisição.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, WebhookError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10).min(timeout))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn send(&self, req: &WebhookRequest) -> Result<WebhookReply, WebhookError> {
        let response = self
            .client
            .post(&self.url)
            .header("content-type", "application/json")
            .json(req)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(WebhookError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| WebhookError::Decode(e.to_string()))
    }
}

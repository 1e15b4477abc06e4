use std::time::Duration;

use async_trait::async_trait;
use plaudit_config::{Email, WhatsApp};
use plaudit_kernel::EmailContent;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::GatewayError;

/// Chat-app sender. A returned id means the provider accepted the message.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send(&self, payload: &Value) -> Result<String, GatewayError>;

    fn is_configured(&self) -> bool;
}

/// Transactional e-mail sender.
#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, to: &str, content: &EmailContent) -> Result<Option<String>, GatewayError>;

    fn is_configured(&self) -> bool;
}

fn http_client(timeout_ms: u64) -> Result<Client, GatewayError> {
    Client::builder()
        .timeout(Duration::from_millis(timeout_ms))
        .build()
        .map_err(|e| GatewayError::Transport(e.to_string()))
}

fn provider_message(body: &Value) -> String {
    body.pointer("/error/message")
        .and_then(Value::as_str)
        .or_else(|| body.get("message").and_then(Value::as_str))
        .unwrap_or("unknown error")
        .to_string()
}

/// WhatsApp Cloud API gateway.
pub struct WhatsAppClient {
    client: Client,
    url: String,
    access_token: Option<String>,
}

impl WhatsAppClient {
    pub fn new(cfg: &WhatsApp, access_token: Option<String>) -> Result<Self, GatewayError> {
        Ok(Self {
            client: http_client(cfg.timeout_ms)?,
            url: cfg.messages_url(),
            access_token,
        })
    }
}

#[async_trait]
impl ChatTransport for WhatsAppClient {
    async fn send(&self, payload: &Value) -> Result<String, GatewayError> {
        let token = self
            .access_token
            .as_deref()
            .ok_or(GatewayError::NotConfigured("whatsapp"))?;
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(token)
            .json(payload)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        if !status.is_success() || body.get("error").is_some() {
            let message = provider_message(&body);
            warn!(status = status.as_u16(), %message, "whatsapp api rejected message");
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        let id = body
            .pointer("/messages/0/id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        debug!(message_id = %id, "whatsapp message accepted");
        Ok(id)
    }

    fn is_configured(&self) -> bool {
        self.access_token.is_some()
    }
}

/// Gateway for an HTTPS e-mail relay that accepts JSON messages.
pub struct EmailRelayClient {
    client: Client,
    endpoint: Option<String>,
    api_key: Option<String>,
    from_email: String,
    from_name: String,
}

impl EmailRelayClient {
    pub fn new(cfg: &Email, api_key: Option<String>) -> Result<Self, GatewayError> {
        Ok(Self {
            client: http_client(cfg.timeout_ms)?,
            endpoint: cfg
                .endpoint
                .as_ref()
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty()),
            api_key,
            from_email: cfg.from_email.clone(),
            from_name: cfg.from_name.clone(),
        })
    }
}

#[async_trait]
impl EmailTransport for EmailRelayClient {
    async fn send(&self, to: &str, content: &EmailContent) -> Result<Option<String>, GatewayError> {
        let endpoint = self
            .endpoint
            .as_deref()
            .ok_or(GatewayError::NotConfigured("email"))?;
        let request = json!({
            "from": { "email": self.from_email, "name": self.from_name },
            "to": [{ "email": to }],
            "subject": content.subject,
            "html": content.html,
            "text": content.text,
        });
        let mut builder = self.client.post(endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message: provider_message(&body),
            });
        }
        Ok(body
            .get("id")
            .or_else(|| body.get("message_id"))
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }
}

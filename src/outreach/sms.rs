//! SMS through a Fast2SMS-style bulk HTTP gateway.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{digits_only, Channel, Delivery, Notifier, OutreachMessage};
use crate::config::ProviderSettings;

#[derive(Debug, Clone)]
pub struct SmsGateway {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl SmsGateway {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, timeout: std::time::Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        })
    }

    /// `None` when no API key is configured.
    pub fn from_settings(settings: &ProviderSettings) -> anyhow::Result<Option<Self>> {
        match &settings.sms_api_key {
            Some(key) => Ok(Some(Self::new(
                settings.sms_endpoint.clone(),
                key.clone(),
                settings.http_timeout(),
            )?)),
            None => Ok(None),
        }
    }

    fn payload(message: &OutreachMessage) -> Value {
        let text = if message.emergency {
            format!("URGENT: {}", message.body)
        } else {
            message.body.clone()
        };
        json!({
            "route": "q",
            "numbers": digits_only(&message.phone),
            "message": text,
        })
    }

    async fn send(&self, message: &OutreachMessage) -> anyhow::Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("authorization", &self.api_key)
            .json(&Self::payload(message))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("SMS gateway error ({}): {}", status, body);
        }
        // The gateway reports some rejections with a 200 and `return: false`.
        if let Ok(parsed) = serde_json::from_str::<Value>(&body) {
            if parsed.get("return").and_then(Value::as_bool) == Some(false) {
                let reason = parsed
                    .get("message")
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "rejected".to_string());
                anyhow::bail!("SMS gateway rejected message: {}", reason);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for SmsGateway {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    async fn notify(&self, message: &OutreachMessage) -> Delivery {
        if digits_only(&message.phone).is_empty() {
            return Delivery::failed("donor has no phone number");
        }
        match self.send(message).await {
            Ok(()) => Delivery::Delivered,
            Err(e) => Delivery::failed(e.to_string()),
        }
    }
}

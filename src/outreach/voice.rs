//! Voice calls through the Twilio Calls API.
//!
//! The call itself only points Twilio at a callback URL; the spoken script
//! and keypad handling live behind that URL, outside this crate.

use async_trait::async_trait;

use super::{to_e164, Channel, Delivery, Notifier, OutreachMessage};
use crate::config::ProviderSettings;

const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";

#[derive(Debug, Clone)]
pub struct VoiceCaller {
    client: reqwest::Client,
    account_sid: String,
    auth_token: String,
    from_number: String,
    callback_base_url: String,
    default_country_code: String,
}

impl VoiceCaller {
    /// `None` unless the account SID, auth token and caller number are all
    /// configured.
    pub fn from_settings(settings: &ProviderSettings) -> anyhow::Result<Option<Self>> {
        let (Some(sid), Some(token), Some(from)) = (
            settings.twilio_account_sid.as_ref(),
            settings.twilio_auth_token.as_ref(),
            settings.twilio_phone_number.as_ref(),
        ) else {
            return Ok(None);
        };
        let client = reqwest::Client::builder()
            .timeout(settings.http_timeout())
            .build()?;
        Ok(Some(Self {
            client,
            account_sid: sid.clone(),
            auth_token: token.clone(),
            from_number: from.clone(),
            callback_base_url: settings.callback_base_url.trim_end_matches('/').to_string(),
            default_country_code: settings.default_country_code.clone(),
        }))
    }

    fn callback_url(&self, message: &OutreachMessage) -> String {
        let path = if message.emergency {
            "voice-emergency"
        } else {
            "voice"
        };
        format!(
            "{}/{}?request_id={}&blood_group={}&hospital_id={}",
            self.callback_base_url,
            path,
            message.request_id,
            url_component(message.blood_group.as_str()),
            message.hospital_id.as_deref().unwrap_or(""),
        )
    }

    async fn place_call(&self, message: &OutreachMessage) -> anyhow::Result<String> {
        let url = format!("{}/Accounts/{}/Calls.json", TWILIO_API_BASE, self.account_sid);
        let to = to_e164(&message.phone, &self.default_country_code);
        let callback = self.callback_url(message);
        let status_callback = format!("{}/voice-status", self.callback_base_url);

        let response = self
            .client
            .post(url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[
                ("To", to.as_str()),
                ("From", self.from_number.as_str()),
                ("Url", callback.as_str()),
                ("StatusCallback", status_callback.as_str()),
                ("StatusCallbackMethod", "POST"),
            ])
            .send()
            .await?;

        let status = response.status();
        let body: serde_json::Value = response.json().await.unwrap_or_default();
        if !status.is_success() {
            let reason = body
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error");
            anyhow::bail!("Twilio error ({}): {}", status, reason);
        }
        Ok(body
            .get("sid")
            .and_then(|s| s.as_str())
            .unwrap_or_default()
            .to_string())
    }
}

/// Percent-encode the characters blood groups carry.
fn url_component(value: &str) -> String {
    value.replace('+', "%2B").replace('-', "%2D")
}

#[async_trait]
impl Notifier for VoiceCaller {
    fn channel(&self) -> Channel {
        Channel::Voice
    }

    async fn notify(&self, message: &OutreachMessage) -> Delivery {
        match self.place_call(message).await {
            Ok(sid) => {
                log::info!("[VOICE] Call {} placed for request {}", sid, message.request_id);
                Delivery::Delivered
            }
            Err(e) => Delivery::failed(e.to_string()),
        }
    }
}

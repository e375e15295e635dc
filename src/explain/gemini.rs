//! Gemini `generateContent` explainer.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::Explainer;
use crate::config::ProviderSettings;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Context is cut to this many characters before it goes into the prompt.
const MAX_CONTEXT_CHARS: usize = 6000;

#[derive(Debug, Clone)]
pub struct GeminiExplainer {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiExplainer {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, timeout: std::time::Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    pub fn from_settings(settings: &ProviderSettings) -> anyhow::Result<Option<Self>> {
        match &settings.gemini_api_key {
            Some(key) => Ok(Some(Self::new(
                key.clone(),
                settings.gemini_model.clone(),
                settings.http_timeout(),
            )?)),
            None => Ok(None),
        }
    }

    pub(crate) fn prompt(task: &str, context: &Value) -> String {
        let data: String = context.to_string().chars().take(MAX_CONTEXT_CHARS).collect();
        format!(
            "You explain blood-logistics decisions to hospital staff.\n\
             From the structured data below, write:\n\
             1. One sentence stating what happened.\n\
             2. Two bullet points quoting concrete numbers.\n\
             3. One recommended next step.\n\
             Be brief and professional.\n\
             TASK: {task}\n\
             DATA: {data}"
        )
    }

    fn extract_text(body: &Value) -> Option<String> {
        let parts = body.pointer("/candidates/0/content/parts")?.as_array()?;
        let text: String = parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect();
        Some(text)
    }
}

#[async_trait]
impl Explainer for GeminiExplainer {
    async fn explain(&self, task: &str, context: &Value) -> anyhow::Result<String> {
        let endpoint = format!("{}/{}:generateContent", API_BASE, self.model);
        let body = json!({
            "contents": [{"role": "user", "parts": [{"text": Self::prompt(task, context)}]}],
            "generationConfig": {"temperature": 0.2, "maxOutputTokens": 400}
        });

        let response = self
            .client
            .post(&endpoint)
            .header("content-type", "application/json")
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            anyhow::bail!(
                "Gemini API error ({}): {}",
                status,
                &text[..text.len().min(500)]
            );
        }
        let parsed: Value = serde_json::from_str(&text)?;
        if let Some(error) = parsed.get("error") {
            let msg = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Unknown Gemini API error");
            anyhow::bail!("Gemini API error: {}", msg);
        }
        Self::extract_text(&parsed).ok_or_else(|| anyhow::anyhow!("Gemini response had no text"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_truncates_context() {
        let big = json!({"blob": "x".repeat(10_000)});
        let prompt = GeminiExplainer::prompt("low_inventory", &big);
        assert!(prompt.contains("TASK: low_inventory"));
        let data = prompt.split("DATA: ").nth(1).unwrap();
        assert_eq!(data.chars().count(), MAX_CONTEXT_CHARS);
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let body = json!({"candidates": [{"content": {"parts": [{"text": "a"}, {"text": "b"}]}}]});
        assert_eq!(GeminiExplainer::extract_text(&body).as_deref(), Some("ab"));
        assert!(GeminiExplainer::extract_text(&json!({})).is_none());
    }
}

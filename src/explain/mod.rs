//! Human-readable explanations of workflow outcomes.
//!
//! An [`Explainer`] is optional. [`Narrator`] always produces text: it asks
//! the explainer first and falls back to the deterministic template for the
//! outcome when the explainer is missing, fails or answers with nothing.

pub mod gemini;

pub use gemini::GeminiExplainer;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::templates::Templates;

/// External summarization capability.
#[async_trait]
pub trait Explainer: Send + Sync + fmt::Debug {
    async fn explain(&self, task: &str, context: &Value) -> anyhow::Result<String>;
}

#[derive(Debug, Clone)]
pub struct Narrator {
    explainer: Option<Arc<dyn Explainer>>,
    templates: Arc<Templates>,
}

impl Narrator {
    pub fn new(explainer: Option<Arc<dyn Explainer>>, templates: Arc<Templates>) -> Self {
        Self {
            explainer,
            templates,
        }
    }

    /// Deterministic text for `action` rendered from `summary`.
    pub fn fallback(&self, action: &str, summary: &Value) -> String {
        let name = format!("explain/{}", action);
        if !self.templates.has(&name) {
            return format!("Workflow finished: {}.", action.replace('_', " "));
        }
        match self.templates.render(&name, summary) {
            Ok(text) => text,
            Err(e) => {
                log::warn!("[EXPLAIN] fallback template {} failed: {}", name, e);
                format!("Workflow finished: {}.", action.replace('_', " "))
            }
        }
    }

    pub async fn narrate(&self, task: &str, action: &str, summary: &Value, context: &Value) -> String {
        let Some(explainer) = &self.explainer else {
            return self.fallback(action, summary);
        };
        match explainer.explain(task, context).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                log::warn!("[EXPLAIN] empty explanation for {}, using fallback", task);
                self.fallback(action, summary)
            }
            Err(e) => {
                log::warn!("[EXPLAIN] explanation fallback ({}): {}", task, e);
                self.fallback(action, summary)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug)]
    struct Fixed(anyhow::Result<String>);

    #[async_trait]
    impl Explainer for Fixed {
        async fn explain(&self, _task: &str, _context: &Value) -> anyhow::Result<String> {
            match &self.0 {
                Ok(text) => Ok(text.clone()),
                Err(e) => Err(anyhow::anyhow!("{}", e)),
            }
        }
    }

    fn templates() -> Arc<Templates> {
        Arc::new(Templates::new().unwrap())
    }

    #[tokio::test]
    async fn test_fallback_when_absent_or_failing() {
        let summary = json!({"request_id": "r1"});
        let narrator = Narrator::new(None, templates());
        let text = narrator.narrate("arrival", "donor_declined", &summary, &json!({})).await;
        assert_eq!(text, "Donor declined request r1.");

        let failing: Arc<dyn Explainer> = Arc::new(Fixed(Err(anyhow::anyhow!("503"))));
        let narrator = Narrator::new(Some(failing), templates());
        let text = narrator.narrate("arrival", "donor_declined", &summary, &json!({})).await;
        assert_eq!(text, "Donor declined request r1.");

        let blank: Arc<dyn Explainer> = Arc::new(Fixed(Ok("   ".into())));
        let narrator = Narrator::new(Some(blank), templates());
        let text = narrator.narrate("arrival", "donor_declined", &summary, &json!({})).await;
        assert_eq!(text, "Donor declined request r1.");
    }

    #[tokio::test]
    async fn test_explainer_text_wins() {
        let fixed: Arc<dyn Explainer> = Arc::new(Fixed(Ok(" All good. ".into())));
        let narrator = Narrator::new(Some(fixed), templates());
        let text = narrator
            .narrate("arrival", "donor_declined", &json!({"request_id": "r1"}), &json!({}))
            .await;
        assert_eq!(text, "All good.");
    }

    #[test]
    fn test_unknown_action_has_generic_text() {
        let narrator = Narrator::new(None, templates());
        assert_eq!(
            narrator.fallback("something_else", &json!({})),
            "Workflow finished: something else."
        );
    }
}

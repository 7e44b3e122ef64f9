use std::sync::Arc;

use super::client::GenerativeClient;
use super::context::BatchContext;
use super::prompts::{ChatTurn, PromptConfig};
use super::retry::RetryPolicy;
use super::sanitize::{sanitize, ResponseKind};
use crate::transactions::repo_types::Transaction;

/// Text handed back to the caller. `fallback` marks canned text that stood
/// in for a failed or unusable generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Narrative {
    pub text: String,
    pub fallback: bool,
}

impl Narrative {
    fn fallback(kind: ResponseKind) -> Self {
        Self {
            text: kind.fallback().to_string(),
            fallback: true,
        }
    }
}

/// Turns prompts into sanitized model text. Never fails: exhausted retries
/// and unusable output become fallback text.
pub struct Narrator {
    client: Arc<dyn GenerativeClient>,
    retry: RetryPolicy,
    prompts: PromptConfig,
}

impl Narrator {
    pub fn new(client: Arc<dyn GenerativeClient>, retry: RetryPolicy, prompts: PromptConfig) -> Self {
        Self {
            client,
            retry,
            prompts,
        }
    }

    pub fn prompts(&self) -> &PromptConfig {
        &self.prompts
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }

    async fn narrate(&self, op: &str, prompt: String, kind: ResponseKind) -> Narrative {
        let client = &self.client;
        let prompt = prompt.as_str();
        match self.retry.run(op, || client.generate(prompt)).await {
            Ok(raw) => match sanitize(&raw, kind) {
                Some(text) => Narrative {
                    text,
                    fallback: false,
                },
                None => {
                    tracing::warn!(operation = op, len = raw.len(), "model output unusable, using fallback");
                    Narrative::fallback(kind)
                }
            },
            Err(e) => {
                tracing::warn!(operation = op, error = %e, "model unavailable, using fallback");
                Narrative::fallback(kind)
            }
        }
    }

    pub async fn explain(&self, t: &Transaction) -> Narrative {
        let prompt = self.prompts.explanation(t);
        self.narrate("explain", prompt, ResponseKind::Explanation).await
    }

    pub async fn chat(&self, ctx: &BatchContext, history: &[ChatTurn], question: &str) -> Narrative {
        let prompt = self.prompts.chat(ctx, history, question);
        self.narrate("chat", prompt, ResponseKind::Chat).await
    }

    pub async fn deep_analysis(&self, ctx: &BatchContext) -> Narrative {
        let prompt = self.prompts.deep_analysis(ctx);
        self.narrate("deep_analysis", prompt, ResponseKind::DeepAnalysis).await
    }

    /// One attempt, no retry. True when the model answered with any text.
    pub async fn probe(&self) -> bool {
        let client = &self.client;
        let prompt = self.prompts.health_probe();
        self.retry
            .single()
            .run("health_probe", || client.generate(prompt))
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::client::fake::{EchoModel, FlakyModel};
    use crate::ai::client::{AiError, GenerativeClient};
    use axum::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use time::macros::datetime;
    use uuid::Uuid;

    struct DeadModel;

    #[async_trait]
    impl GenerativeClient for DeadModel {
        async fn generate(&self, _prompt: &str) -> Result<String, AiError> {
            Err(AiError::Network("connection refused".into()))
        }

        fn model(&self) -> &str {
            "dead"
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(1),
            timeout: Duration::from_secs(1),
        }
    }

    fn narrator(client: Arc<dyn GenerativeClient>) -> Narrator {
        Narrator::new(client, fast_retry(), PromptConfig::default())
    }

    fn txn() -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            upload_batch_id: Uuid::new_v4(),
            amount: dec!(7500000),
            timestamp: datetime!(2024-04-10 02:13 UTC),
            merchant: "Crypto Exchange".into(),
            location: Some("Singapore".into()),
            user_id: Some("ACC-77".into()),
            transaction_type: Some("transfer".into()),
            channel: Some("web".into()),
            device_type: None,
            is_anomaly: Some(true),
            anomaly_score: Some(0.97),
            gemini_explanation: None,
        }
    }

    #[tokio::test]
    async fn explanation_is_sanitized() {
        let model = Arc::new(EchoModel::replying(
            "Sure! The amount is far above this account's normal spending and it happened at 2am.",
        ));
        let out = narrator(model.clone()).explain(&txn()).await;
        assert!(!out.fallback);
        assert!(out.text.starts_with("The amount"));
        assert!(model.last_prompt().contains("Crypto Exchange"));
        assert!(model.last_prompt().contains("score 0.9700"));
    }

    #[tokio::test]
    async fn unavailable_model_yields_fallback() {
        let out = narrator(Arc::new(DeadModel)).explain(&txn()).await;
        assert!(out.fallback);
        assert_eq!(out.text, ResponseKind::Explanation.fallback());
    }

    #[tokio::test]
    async fn too_short_answer_yields_fallback() {
        let out = narrator(Arc::new(EchoModel::replying("OK")))
            .deep_analysis(&BatchContext::default())
            .await;
        assert!(out.fallback);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let model = Arc::new(FlakyModel {
            failures: 2,
            reply: "Most anomalies cluster between 1am and 4am at online merchants.".into(),
            attempts: AtomicU32::new(0),
        });
        let out = narrator(model.clone())
            .chat(&BatchContext::default(), &[], "when do anomalies happen?")
            .await;
        assert!(!out.fallback);
        assert_eq!(model.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn probe_makes_a_single_attempt() {
        let model = Arc::new(FlakyModel {
            failures: 1,
            reply: "OK".into(),
            attempts: AtomicU32::new(0),
        });
        assert!(!narrator(model.clone()).probe().await);
        assert_eq!(model.attempts.load(Ordering::SeqCst), 1);

        let echo = Arc::new(EchoModel::replying("OK"));
        assert!(narrator(echo.clone()).probe().await);
        assert_eq!(echo.calls(), 1);
    }
}

use std::fmt::Write;

use serde::Deserialize;

use super::context::BatchContext;
use crate::transactions::repo_types::Transaction;

/// Prompt parameters. Built once at startup and shared read-only.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptConfig {
    /// Language the model is asked to answer in.
    pub language: String,
    pub top_anomalies: usize,
    pub breakdown_top_k: usize,
    pub max_history_turns: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            language: "Indonesian".into(),
            top_anomalies: 10,
            breakdown_top_k: 5,
            max_history_turns: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, serde::Serialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

impl PromptConfig {
    fn preamble(&self, task: &str) -> String {
        format!(
            "You are a fraud analyst at a bank reviewing card and transfer activity. {task}\n\
             Answer in {lang}. Be concrete and refer to the figures given. \
             Do not mention that you are an AI or a language model.\n\n",
            lang = self.language
        )
    }

    pub fn explanation(&self, t: &Transaction) -> String {
        let mut p = self.preamble(
            "Explain in two or three short paragraphs why the transaction below was or was not \
             flagged as suspicious, and what the customer or bank should check.",
        );
        let _ = writeln!(p, "Transaction:");
        let _ = writeln!(p, "- amount: {}", t.amount);
        let _ = writeln!(p, "- time: {}", t.timestamp);
        let _ = writeln!(p, "- merchant: {}", t.merchant);
        let opt = |v: &Option<String>| v.clone().unwrap_or_else(|| "unknown".into());
        let _ = writeln!(p, "- location: {}", opt(&t.location));
        let _ = writeln!(p, "- account: {}", opt(&t.user_id));
        let _ = writeln!(p, "- type: {}", opt(&t.transaction_type));
        let _ = writeln!(p, "- channel: {}", opt(&t.channel));
        let _ = writeln!(p, "- device: {}", opt(&t.device_type));
        match (t.is_anomaly, t.anomaly_score) {
            (Some(flag), Some(score)) => {
                let _ = writeln!(
                    p,
                    "- model verdict: {} (score {score:.4})",
                    if flag { "anomalous" } else { "normal" }
                );
            }
            _ => {
                let _ = writeln!(p, "- model verdict: not analyzed yet");
            }
        }
        p
    }

    pub fn chat(&self, ctx: &BatchContext, history: &[ChatTurn], question: &str) -> String {
        let mut p = self.preamble(
            "Answer the user's question about the uploaded transaction batch using only the \
             batch summary below.",
        );
        p.push_str(&ctx.render());

        let start = history.len().saturating_sub(self.max_history_turns);
        let recent = &history[start..];
        if !recent.is_empty() {
            p.push_str("\nConversation so far:\n");
            for turn in recent {
                let _ = writeln!(p, "{}: {}", turn.role, turn.content.trim());
            }
        }
        let _ = write!(p, "\nQuestion: {}\n", question.trim());
        p
    }

    pub fn deep_analysis(&self, ctx: &BatchContext) -> String {
        let mut p = self.preamble(
            "Write a risk report for the batch below: overall risk level, the main fraud \
             patterns (time of day, merchants, locations, devices, channels), the most \
             suspicious transactions and concrete recommended actions.",
        );
        p.push_str(&ctx.render());
        p
    }

    pub fn health_probe(&self) -> &'static str {
        "Reply with the single word OK."
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(i: usize) -> ChatTurn {
        ChatTurn {
            role: if i % 2 == 0 { "user" } else { "assistant" }.into(),
            content: format!("message {i}"),
        }
    }

    #[test]
    fn chat_keeps_only_recent_history() {
        let cfg = PromptConfig::default();
        let history: Vec<ChatTurn> = (0..14).map(turn).collect();
        let prompt = cfg.chat(&BatchContext::default(), &history, "  which merchant?  ");
        assert!(!prompt.contains("message 3\n"));
        assert!(prompt.contains("message 4\n"));
        assert!(prompt.contains("message 13\n"));
        assert!(prompt.contains("Question: which merchant?\n"));
    }

    #[test]
    fn language_is_configurable() {
        let cfg = PromptConfig {
            language: "English".into(),
            ..PromptConfig::default()
        };
        assert!(cfg.deep_analysis(&BatchContext::default()).contains("Answer in English."));
    }
}

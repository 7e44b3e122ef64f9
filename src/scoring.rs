use std::time::Duration;

use axum::async_trait;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::ScoringConfig;
use crate::transactions::repo_types::Transaction;

const UNKNOWN: &str = "Unknown";

#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("scoring service unreachable: {0}")]
    Network(String),

    #[error("scoring service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("scoring service sent an unreadable response: {0}")]
    Decode(String),
}

/// One transaction as the scoring service expects it.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ScoringInput {
    pub id: Uuid,
    pub amount: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: time::OffsetDateTime,
    pub merchant: String,
    pub location: String,
    pub user_id: String,
    pub transaction_type: String,
    pub channel: String,
    pub device_type: String,
}

impl From<&Transaction> for ScoringInput {
    fn from(t: &Transaction) -> Self {
        let or_unknown = |v: &Option<String>| {
            v.as_deref()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(UNKNOWN)
                .to_string()
        };
        Self {
            id: t.id,
            amount: t.amount.to_f64().unwrap_or_default(),
            timestamp: t.timestamp,
            merchant: t.merchant.clone(),
            location: or_unknown(&t.location),
            user_id: or_unknown(&t.user_id),
            transaction_type: or_unknown(&t.transaction_type),
            channel: or_unknown(&t.channel),
            device_type: or_unknown(&t.device_type),
        }
    }
}

#[derive(Debug, Serialize)]
struct ScoringRequest<'a> {
    transactions: &'a [ScoringInput],
}

/// Per-transaction verdict. Extra fields the service sends are kept so they
/// can be echoed back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScoreResult {
    pub id: Uuid,
    pub is_anomaly: bool,
    pub anomaly_score: f64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[async_trait]
pub trait ScoringClient: Send + Sync {
    async fn score(&self, inputs: &[ScoringInput]) -> Result<Vec<ScoreResult>, ScoringError>;
}

pub struct HttpScoringClient {
    http: reqwest::Client,
    url: String,
}

impl HttpScoringClient {
    pub fn new(cfg: &ScoringConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            url: cfg.url.clone(),
        })
    }
}

#[async_trait]
impl ScoringClient for HttpScoringClient {
    async fn score(&self, inputs: &[ScoringInput]) -> Result<Vec<ScoreResult>, ScoringError> {
        tracing::debug!(count = inputs.len(), url = %self.url, "sending batch to scoring service");

        let resp = self
            .http
            .post(&self.url)
            .json(&ScoringRequest { transactions: inputs })
            .send()
            .await
            .map_err(|e| ScoringError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ScoringError::Status {
                status: status.as_u16(),
                body,
            });
        }

        resp.json::<Vec<ScoreResult>>()
            .await
            .map_err(|e| ScoringError::Decode(e.to_string()))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use time::macros::datetime;

    fn txn() -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            upload_batch_id: Uuid::new_v4(),
            amount: dec!(1500.25),
            timestamp: datetime!(2024-03-01 10:00 UTC),
            merchant: "Tokopedia".into(),
            location: None,
            user_id: Some("U-9".into()),
            transaction_type: Some("  ".into()),
            channel: Some("mobile".into()),
            device_type: None,
            is_anomaly: None,
            anomaly_score: None,
            gemini_explanation: None,
        }
    }

    #[test]
    fn missing_fields_become_unknown() {
        let input = ScoringInput::from(&txn());
        assert_eq!(input.location, "Unknown");
        assert_eq!(input.transaction_type, "Unknown");
        assert_eq!(input.device_type, "Unknown");
        assert_eq!(input.user_id, "U-9");
        assert_eq!(input.channel, "mobile");
        assert_eq!(input.amount, 1500.25);
    }

    #[test]
    fn request_body_shape() {
        let inputs = vec![ScoringInput::from(&txn())];
        let body = serde_json::to_value(ScoringRequest { transactions: &inputs }).unwrap();
        let first = &body["transactions"][0];
        assert_eq!(first["merchant"], "Tokopedia");
        assert_eq!(first["timestamp"], "2024-03-01T10:00:00Z");
        assert_eq!(first["device_type"], "Unknown");
    }

    #[test]
    fn result_keeps_extra_fields() {
        let id = Uuid::new_v4();
        let raw = format!(
            r#"[{{"id":"{id}","isAnomaly":true,"anomalyScore":0.91,"hour":3}}]"#
        );
        let parsed: Vec<ScoreResult> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed[0].id, id);
        assert!(parsed[0].is_anomaly);
        assert_eq!(parsed[0].extra.get("hour"), Some(&serde_json::json!(3)));

        let echoed = serde_json::to_value(&parsed[0]).unwrap();
        assert_eq!(echoed["anomalyScore"], 0.91);
        assert_eq!(echoed["hour"], 3);
    }

    #[tokio::test]
    async fn fake_scorer_flags_large_amounts() {
        let scorer = fake::ThresholdScorer { threshold: 1000.0 };
        let inputs = vec![ScoringInput::from(&txn())];
        let out = scorer.score(&inputs).await.unwrap();
        assert!(out[0].is_anomaly);
    }
}

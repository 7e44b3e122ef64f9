use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

/// Lifecycle of an upload batch. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "batch_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum BatchStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal batch transition {from:?} -> {to:?}")]
pub struct IllegalTransition {
    pub from: BatchStatus,
    pub to: BatchStatus,
}

impl BatchStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, BatchStatus::Pending)
    }

    /// Only PENDING moves, and only into a terminal state.
    pub fn transition(self, to: BatchStatus) -> Result<BatchStatus, IllegalTransition> {
        if self.is_terminal() || !to.is_terminal() {
            return Err(IllegalTransition { from: self, to });
        }
        Ok(to)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UploadBatch {
    pub id: Uuid,
    pub file_name: String,
    pub status: BatchStatus,
    pub user_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Batch row joined with owner and counts, for the batch list.
#[derive(Debug, Clone, FromRow)]
pub struct BatchSummaryRow {
    pub id: Uuid,
    pub file_name: String,
    pub status: BatchStatus,
    pub user_id: Uuid,
    pub created_at: OffsetDateTime,
    pub owner_name: String,
    pub owner_email: String,
    pub transaction_count: i64,
    pub anomaly_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: Uuid,
    pub upload_batch_id: Uuid,
    pub amount: Decimal,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub merchant: String,
    pub location: Option<String>,
    /// Account reference from the source file, not the owning user.
    #[serde(rename = "user_id")]
    pub user_id: Option<String>,
    #[serde(rename = "transaction_type")]
    pub transaction_type: Option<String>,
    pub channel: Option<String>,
    #[serde(rename = "device_type")]
    pub device_type: Option<String>,
    pub is_anomaly: Option<bool>,
    pub anomaly_score: Option<f64>,
    pub gemini_explanation: Option<String>,
}

impl Transaction {
    pub fn is_flagged(&self) -> bool {
        self.is_anomaly == Some(true)
    }

    pub fn is_scored(&self) -> bool {
        self.is_anomaly.is_some() || self.anomaly_score.is_some()
    }
}

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::ingest::IngestStats;
use super::repo_types::{BatchStatus, BatchSummaryRow, Transaction, UploadBatch};
use crate::ai::prompts::ChatTurn;
use crate::scoring::ScoreResult;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub batch: UploadBatch,
    pub stats: IngestStats,
}

#[derive(Debug, Serialize)]
pub struct BatchOwner {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchListItem {
    pub id: Uuid,
    pub file_name: String,
    pub status: BatchStatus,
    pub user_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub user: BatchOwner,
    pub transaction_count: i64,
    pub anomaly_count: i64,
}

impl From<BatchSummaryRow> for BatchListItem {
    fn from(r: BatchSummaryRow) -> Self {
        Self {
            id: r.id,
            file_name: r.file_name,
            status: r.status,
            user_id: r.user_id,
            created_at: r.created_at,
            user: BatchOwner {
                name: r.owner_name,
                email: r.owner_email,
            },
            transaction_count: r.transaction_count,
            anomaly_count: r.anomaly_count,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    pub message: String,
    pub batch_id: Uuid,
    pub updated: u64,
    pub results: Vec<ScoreResult>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomaliesResponse {
    pub anomalies: Vec<Transaction>,
    pub total_transactions: i64,
    pub anomaly_count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub message: String,
    pub deleted_transactions_count: u64,
    pub deleted_batch_info: UploadBatch,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChatRequest {
    pub question: Option<String>,
    pub chat_history: Vec<ChatTurn>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub answer: String,
    pub batch_id: Uuid,
    pub fallback: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeepAnalysisResponse {
    pub batch_id: Uuid,
    pub needs_analysis: bool,
    pub analysis: String,
    pub fallback: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainResponse {
    pub transaction_id: Uuid,
    pub explanation: String,
    pub cached: bool,
    pub fallback: bool,
}

#[derive(Debug, Serialize)]
pub struct AiHealthResponse {
    pub status: &'static str,
    pub model: String,
}

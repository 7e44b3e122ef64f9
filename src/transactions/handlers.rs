use std::path::Path as FsPath;

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderName, StatusCode},
    routing::{get, post},
    Json, Router,
};
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::dto::{
    AiHealthResponse, AnalyzeResponse, AnomaliesResponse, BatchListItem, ChatRequest, ChatResponse,
    DeepAnalysisResponse, DeleteResponse, ExplainResponse, UploadResponse,
};
use super::export;
use super::repo;
use super::repo_types::Transaction;
use super::services::{self, DeepAnalysis, IngestOutcome, TempUpload};
use crate::{
    auth::jwt::AuthUser,
    config::UploadConfig,
    error::{ApiError, ApiResult},
    state::AppState,
};

/// Room for the multipart envelope around the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn transaction_routes(upload: &UploadConfig) -> Router<AppState> {
    Router::new()
        .route(
            "/upload",
            post(upload_csv).layer(DefaultBodyLimit::max(upload.max_bytes + MULTIPART_OVERHEAD)),
        )
        .route("/analyze/:batch_id", post(analyze_batch))
        .route("/anomalies/:batch_id", get(get_anomalies))
        .route("/batches", get(list_batches))
        .route("/batch/:batch_id", get(get_batch).delete(delete_batch))
        .route("/chat/:batch_id", post(chat))
        .route("/deep-analysis/:batch_id", post(deep_analysis))
        .route("/explain/:transaction_id", post(explain))
        .route("/download/:batch_id", get(download_csv))
        .route("/ai-health", get(ai_health))
}

fn has_csv_extension(name: &str) -> bool {
    FsPath::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"))
}

/// Streams the `file` field to a temp file under the upload dir, enforcing
/// the size limit as bytes arrive.
async fn spool_csv(mp: &mut Multipart, cfg: &UploadConfig) -> ApiResult<(TempUpload, String)> {
    while let Some(mut field) = mp.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field
            .file_name()
            .and_then(|n| FsPath::new(n).file_name())
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| ApiError::bad_request("No file uploaded"))?;

        if !has_csv_extension(&file_name) {
            warn!(%file_name, "rejected non-csv upload");
            return Err(ApiError::bad_request("Only CSV files are allowed"));
        }

        let (upload, mut file) = TempUpload::create(&cfg.dir).await?;
        let mut written = 0usize;
        while let Some(chunk) = field.chunk().await? {
            written += chunk.len();
            if written > cfg.max_bytes {
                warn!(%file_name, limit = cfg.max_bytes, "upload exceeds size limit");
                return Err(ApiError::bad_request("File too large"));
            }
            file.write_all(&chunk).await.context("write temp upload")?;
        }
        file.flush().await.context("flush temp upload")?;
        return Ok((upload, file_name));
    }
    Err(ApiError::bad_request("No file uploaded"))
}

#[instrument(skip(state, user, mp), fields(user_id = %user.id))]
pub async fn upload_csv(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    mut mp: Multipart,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    let (upload, file_name) = spool_csv(&mut mp, &state.config.upload).await?;

    match services::ingest_upload(&state, user.id, &file_name, upload).await? {
        IngestOutcome::Completed { batch, stats } => Ok((
            StatusCode::CREATED,
            Json(UploadResponse {
                message: "File uploaded and processed successfully".into(),
                batch,
                stats,
            }),
        )),
        IngestOutcome::NoValidRows { batch, stats } => {
            info!(batch_id = %batch.id, rejected = stats.rejected_rows, "upload had no valid rows");
            Err(ApiError::bad_request("No valid transactions found in the file"))
        }
    }
}

#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn analyze_batch(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<Json<AnalyzeResponse>> {
    let (updated, results) = services::run_analysis(&state, user.id, batch_id).await?;
    Ok(Json(AnalyzeResponse {
        message: "Analysis completed".into(),
        batch_id,
        updated,
        results,
    }))
}

#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn get_anomalies(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<Json<AnomaliesResponse>> {
    services::owned_batch(&state, user.id, batch_id).await?;

    let total_transactions = repo::count_by_batch(&state.db, batch_id).await?;
    let anomalies = repo::list_anomalies(&state.db, batch_id).await?;
    if anomalies.is_empty() {
        return Err(ApiError::not_found("No anomalies found for this batch"));
    }

    Ok(Json(AnomaliesResponse {
        anomaly_count: anomalies.len(),
        anomalies,
        total_transactions,
    }))
}

#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn list_batches(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> ApiResult<Json<Vec<BatchListItem>>> {
    let rows = repo::list_batches(&state.db, user.id).await?;
    Ok(Json(rows.into_iter().map(BatchListItem::from).collect()))
}

#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn get_batch(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Transaction>>> {
    let rows = services::owned_transactions(&state, user.id, batch_id).await?;
    Ok(Json(rows))
}

#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn delete_batch(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<Json<DeleteResponse>> {
    let (deleted, batch) = repo::delete_batch(&state.db, user.id, batch_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Batch not found"))?;

    info!(%batch_id, deleted, "batch deleted");
    Ok(Json(DeleteResponse {
        message: "Batch and its transactions deleted successfully".into(),
        deleted_transactions_count: deleted,
        deleted_batch_info: batch,
    }))
}

#[instrument(skip(state, user, body), fields(user_id = %user.id))]
pub async fn chat(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(batch_id): Path<Uuid>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> ApiResult<Json<ChatResponse>> {
    let Json(body) = body?;
    let question = body
        .question
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ApiError::bad_request("Question is required"))?;

    let answer =
        services::chat_about_batch(&state, user.id, batch_id, question, &body.chat_history).await?;
    Ok(Json(ChatResponse {
        answer: answer.text,
        batch_id,
        fallback: answer.fallback,
    }))
}

#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn deep_analysis(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<Json<DeepAnalysisResponse>> {
    let resp = match services::deep_analysis(&state, user.id, batch_id).await? {
        DeepAnalysis::NeedsScoring(hint) => DeepAnalysisResponse {
            batch_id,
            needs_analysis: true,
            analysis: hint.to_string(),
            fallback: false,
        },
        DeepAnalysis::Report(report) => DeepAnalysisResponse {
            batch_id,
            needs_analysis: false,
            analysis: report.text,
            fallback: report.fallback,
        },
    };
    Ok(Json(resp))
}

#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn explain(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(transaction_id): Path<Uuid>,
) -> ApiResult<Json<ExplainResponse>> {
    let out = services::explain_transaction(&state, user.id, transaction_id).await?;
    Ok(Json(ExplainResponse {
        transaction_id,
        explanation: out.text,
        cached: out.cached,
        fallback: out.fallback,
    }))
}

#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn download_csv(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<([(HeaderName, String); 2], Vec<u8>)> {
    let rows = services::owned_transactions(&state, user.id, batch_id).await?;
    let body = export::render_csv(&rows)?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", export::file_name(batch_id)),
            ),
        ],
        body,
    ))
}

#[instrument(skip(state))]
pub async fn ai_health(State(state): State<AppState>) -> Json<AiHealthResponse> {
    let ok = state.narrator.probe().await;
    Json(AiHealthResponse {
        status: if ok { "ok" } else { "degraded" },
        model: state.narrator.model().to_string(),
    })
}

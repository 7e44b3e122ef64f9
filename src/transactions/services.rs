use std::path::{Path, PathBuf};

use anyhow::Context;
use sqlx::PgPool;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::ingest::{parse_csv_file, IngestStats};
use super::repo;
use super::repo_types::{BatchStatus, Transaction, UploadBatch};
use crate::ai::context::BatchContext;
use crate::ai::prompts::ChatTurn;
use crate::ai::Narrative;
use crate::error::{ApiError, ApiResult};
use crate::scoring::{ScoreResult, ScoringInput};
use crate::state::AppState;

const NEEDS_ANALYSIS_HINT: &str =
    "This batch has not been analyzed yet. Run the anomaly analysis first, then request the deep analysis again.";

/// Upload spooled to disk. The file is removed when the guard drops, on
/// every exit path.
#[derive(Debug)]
pub struct TempUpload {
    path: PathBuf,
}

impl TempUpload {
    pub async fn create(dir: &Path) -> anyhow::Result<(Self, tokio::fs::File)> {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("create upload dir {}", dir.display()))?;
        let path = dir.join(format!("{}.csv", Uuid::new_v4()));
        let file = tokio::fs::File::create(&path)
            .await
            .with_context(|| format!("create temp upload {}", path.display()))?;
        Ok((Self { path }, file))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempUpload {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove temp upload"),
        }
    }
}

#[derive(Debug)]
pub enum IngestOutcome {
    Completed { batch: UploadBatch, stats: IngestStats },
    /// The file parsed but no row survived validation. The batch is FAILED.
    NoValidRows { batch: UploadBatch, stats: IngestStats },
}

async fn mark_failed(db: &PgPool, batch_id: Uuid) -> Option<UploadBatch> {
    match repo::transition_batch(db, batch_id, BatchStatus::Pending, BatchStatus::Failed).await {
        Ok(b) => b,
        Err(e) => {
            error!(%batch_id, error = ?e, "could not mark batch failed");
            None
        }
    }
}

/// Creates a PENDING batch, parses the whole file off the async runtime,
/// then stores every accepted row and completes the batch in one DB
/// transaction. Any failure after the batch exists leaves it FAILED.
pub async fn ingest_upload(
    state: &AppState,
    user_id: Uuid,
    file_name: &str,
    upload: TempUpload,
) -> anyhow::Result<IngestOutcome> {
    let batch = repo::create_batch(&state.db, user_id, file_name).await?;
    info!(batch_id = %batch.id, %file_name, "batch created");

    let mapper = state.mapper.clone();
    let path = upload.path().to_path_buf();
    let parsed = tokio::task::spawn_blocking(move || parse_csv_file(&path, &mapper))
        .await
        .context("csv parser task panicked")
        .and_then(|r| r);
    drop(upload);

    let parsed = match parsed {
        Ok(p) => p,
        Err(e) => {
            mark_failed(&state.db, batch.id).await;
            return Err(e);
        }
    };

    let mut stats = parsed.stats;
    if parsed.rows.is_empty() {
        warn!(batch_id = %batch.id, total = stats.total_rows, "no valid rows in upload");
        let batch = mark_failed(&state.db, batch.id).await.unwrap_or(UploadBatch {
            status: BatchStatus::Failed,
            ..batch
        });
        return Ok(IngestOutcome::NoValidRows { batch, stats });
    }

    let stored = async {
        let mut tx = state.db.begin().await.context("begin tx")?;
        let saved = repo::insert_transactions_tx(&mut tx, batch.id, &parsed.rows).await?;
        let completed = repo::transition_batch(
            &mut *tx,
            batch.id,
            BatchStatus::Pending,
            BatchStatus::Completed,
        )
        .await?
        .context("batch left PENDING while ingesting")?;
        tx.commit().await.context("commit tx")?;
        anyhow::Ok((saved, completed))
    }
    .await;

    match stored {
        Ok((saved, completed)) => {
            stats.saved_rows = saved as usize;
            info!(
                batch_id = %completed.id,
                saved = stats.saved_rows,
                rejected = stats.rejected_rows,
                "batch completed"
            );
            Ok(IngestOutcome::Completed {
                batch: completed,
                stats,
            })
        }
        Err(e) => {
            mark_failed(&state.db, batch.id).await;
            Err(e)
        }
    }
}

pub async fn owned_batch(state: &AppState, user_id: Uuid, batch_id: Uuid) -> ApiResult<UploadBatch> {
    repo::find_owned_batch(&state.db, user_id, batch_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Batch not found"))
}

/// Rows of an owned batch; absent, foreign and empty batches are all 404.
pub async fn owned_transactions(
    state: &AppState,
    user_id: Uuid,
    batch_id: Uuid,
) -> ApiResult<Vec<Transaction>> {
    owned_batch(state, user_id, batch_id).await?;
    let rows = repo::list_by_batch(&state.db, batch_id).await?;
    if rows.is_empty() {
        return Err(ApiError::not_found("No transactions found for this batch"));
    }
    Ok(rows)
}

/// Sends the batch to the scoring service and stores the verdicts.
/// Returns the number of rows updated and the raw results.
pub async fn run_analysis(
    state: &AppState,
    user_id: Uuid,
    batch_id: Uuid,
) -> ApiResult<(u64, Vec<ScoreResult>)> {
    let rows = owned_transactions(state, user_id, batch_id).await?;
    let inputs: Vec<ScoringInput> = rows.iter().map(ScoringInput::from).collect();

    info!(%batch_id, count = inputs.len(), "scoring batch");
    let results = state.scoring.score(&inputs).await.map_err(|e| {
        ApiError::Upstream(format!("Anomaly scoring failed: {e}"))
    })?;

    let updated = repo::apply_scores(&state.db, batch_id, &results).await?;
    if (updated as usize) < results.len() {
        warn!(
            %batch_id,
            ignored = results.len() - updated as usize,
            "scoring results referenced unknown transactions"
        );
    }
    info!(%batch_id, updated, "batch scored");
    Ok((updated, results))
}

pub struct Explanation {
    pub text: String,
    pub cached: bool,
    pub fallback: bool,
}

/// Cached text wins. Fresh model text is stored once; fallback text is
/// returned but never stored.
pub async fn explain_transaction(
    state: &AppState,
    user_id: Uuid,
    transaction_id: Uuid,
) -> ApiResult<Explanation> {
    let txn = repo::find_owned_transaction(&state.db, user_id, transaction_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Transaction not found"))?;

    if let Some(text) = txn.gemini_explanation.clone().filter(|t| !t.trim().is_empty()) {
        return Ok(Explanation {
            text,
            cached: true,
            fallback: false,
        });
    }

    let Narrative { text, fallback } = state.narrator.explain(&txn).await;
    if fallback {
        return Ok(Explanation {
            text,
            cached: false,
            fallback,
        });
    }

    let stored = repo::save_explanation(&state.db, transaction_id, &text).await?;
    Ok(Explanation {
        text: stored,
        cached: false,
        fallback: false,
    })
}

pub async fn chat_about_batch(
    state: &AppState,
    user_id: Uuid,
    batch_id: Uuid,
    question: &str,
    history: &[ChatTurn],
) -> ApiResult<Narrative> {
    let rows = owned_transactions(state, user_id, batch_id).await?;
    let ctx = BatchContext::build(&rows, state.narrator.prompts());
    Ok(state.narrator.chat(&ctx, history, question).await)
}

pub enum DeepAnalysis {
    NeedsScoring(&'static str),
    Report(Narrative),
}

pub async fn deep_analysis(
    state: &AppState,
    user_id: Uuid,
    batch_id: Uuid,
) -> ApiResult<DeepAnalysis> {
    let rows = owned_transactions(state, user_id, batch_id).await?;
    let ctx = BatchContext::build(&rows, state.narrator.prompts());
    if !ctx.has_scores() {
        return Ok(DeepAnalysis::NeedsScoring(NEEDS_ANALYSIS_HINT));
    }
    Ok(DeepAnalysis::Report(state.narrator.deep_analysis(&ctx).await))
}

use anyhow::Context;
use sqlx::{PgExecutor, PgPool, Postgres, QueryBuilder, Transaction as PgTransaction};
use uuid::Uuid;

use super::mapper::CleanRow;
use super::repo_types::{BatchStatus, BatchSummaryRow, Transaction, UploadBatch};
use crate::scoring::ScoreResult;

/// Rows per multi-VALUES insert; ten binds per row stays under the
/// Postgres 65535 bind limit.
const INSERT_CHUNK: usize = 1000;

// ---- Batches ----

pub async fn create_batch(db: &PgPool, user_id: Uuid, file_name: &str) -> anyhow::Result<UploadBatch> {
    let batch = sqlx::query_as::<_, UploadBatch>(
        r#"
        INSERT INTO upload_batches (file_name, status, user_id)
        VALUES ($1, 'PENDING', $2)
        RETURNING id, file_name, status, user_id, created_at
        "#,
    )
    .bind(file_name)
    .bind(user_id)
    .fetch_one(db)
    .await
    .context("insert upload batch")?;
    Ok(batch)
}

/// The batch, only when it belongs to `user_id`.
pub async fn find_owned_batch(
    db: &PgPool,
    user_id: Uuid,
    batch_id: Uuid,
) -> anyhow::Result<Option<UploadBatch>> {
    let batch = sqlx::query_as::<_, UploadBatch>(
        r#"
        SELECT id, file_name, status, user_id, created_at
          FROM upload_batches
         WHERE id = $1 AND user_id = $2
        "#,
    )
    .bind(batch_id)
    .bind(user_id)
    .fetch_optional(db)
    .await
    .context("find owned batch")?;
    Ok(batch)
}

/// Moves a batch out of `from`. Returns the updated row, or `None` when the
/// batch was no longer in `from`.
pub async fn transition_batch<'e, E>(
    db: E,
    batch_id: Uuid,
    from: BatchStatus,
    to: BatchStatus,
) -> anyhow::Result<Option<UploadBatch>>
where
    E: PgExecutor<'e>,
{
    from.transition(to)?;
    let batch = sqlx::query_as::<_, UploadBatch>(
        r#"
        UPDATE upload_batches
           SET status = $3
         WHERE id = $1 AND status = $2
        RETURNING id, file_name, status, user_id, created_at
        "#,
    )
    .bind(batch_id)
    .bind(from)
    .bind(to)
    .fetch_optional(db)
    .await
    .context("update batch status")?;
    Ok(batch)
}

pub async fn list_batches(db: &PgPool, user_id: Uuid) -> anyhow::Result<Vec<BatchSummaryRow>> {
    let rows = sqlx::query_as::<_, BatchSummaryRow>(
        r#"
        SELECT b.id, b.file_name, b.status, b.user_id, b.created_at,
               u.name  AS owner_name,
               u.email AS owner_email,
               COUNT(t.id) AS transaction_count,
               COUNT(t.id) FILTER (WHERE t.is_anomaly) AS anomaly_count
          FROM upload_batches b
          JOIN users u ON u.id = b.user_id
          LEFT JOIN transactions t ON t.upload_batch_id = b.id
         WHERE b.user_id = $1
         GROUP BY b.id, u.name, u.email
         ORDER BY b.created_at DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(db)
    .await
    .context("list batches")?;
    Ok(rows)
}

/// Deletes the batch's transactions and then the batch inside `tx`.
/// Nothing is visible to others until the caller commits.
pub async fn delete_batch_tx(
    tx: &mut PgTransaction<'_, Postgres>,
    user_id: Uuid,
    batch_id: Uuid,
) -> anyhow::Result<Option<(u64, UploadBatch)>> {
    let owned: Option<(Uuid,)> = sqlx::query_as(
        r#"SELECT id FROM upload_batches WHERE id = $1 AND user_id = $2 FOR UPDATE"#,
    )
    .bind(batch_id)
    .bind(user_id)
    .fetch_optional(&mut **tx)
    .await
    .context("lock batch for delete")?;
    if owned.is_none() {
        return Ok(None);
    }

    let deleted = sqlx::query(r#"DELETE FROM transactions WHERE upload_batch_id = $1"#)
        .bind(batch_id)
        .execute(&mut **tx)
        .await
        .context("delete batch transactions")?
        .rows_affected();

    let batch = sqlx::query_as::<_, UploadBatch>(
        r#"
        DELETE FROM upload_batches
         WHERE id = $1
        RETURNING id, file_name, status, user_id, created_at
        "#,
    )
    .bind(batch_id)
    .fetch_one(&mut **tx)
    .await
    .context("delete batch")?;

    Ok(Some((deleted, batch)))
}

pub async fn delete_batch(
    db: &PgPool,
    user_id: Uuid,
    batch_id: Uuid,
) -> anyhow::Result<Option<(u64, UploadBatch)>> {
    let mut tx = db.begin().await.context("begin tx")?;
    let result = delete_batch_tx(&mut tx, user_id, batch_id).await?;
    if result.is_some() {
        tx.commit().await.context("commit tx")?;
    }
    Ok(result)
}

// ---- Transactions ----

pub async fn insert_transactions_tx(
    tx: &mut PgTransaction<'_, Postgres>,
    batch_id: Uuid,
    rows: &[CleanRow],
) -> anyhow::Result<u64> {
    let mut inserted = 0;
    for chunk in rows.chunks(INSERT_CHUNK) {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"INSERT INTO transactions (upload_batch_id, amount, "timestamp", merchant, location, user_id, transaction_type, channel, device_type) "#,
        );
        qb.push_values(chunk, |mut b, row| {
            b.push_bind(batch_id)
                .push_bind(row.amount)
                .push_bind(row.timestamp)
                .push_bind(&row.merchant)
                .push_bind(&row.location)
                .push_bind(&row.user_id)
                .push_bind(&row.transaction_type)
                .push_bind(&row.channel)
                .push_bind(&row.device_type);
        });
        inserted += qb
            .build()
            .execute(&mut **tx)
            .await
            .context("bulk insert transactions")?
            .rows_affected();
    }
    Ok(inserted)
}

pub async fn list_by_batch(db: &PgPool, batch_id: Uuid) -> anyhow::Result<Vec<Transaction>> {
    let rows = sqlx::query_as::<_, Transaction>(
        r#"
        SELECT id, upload_batch_id, amount, "timestamp", merchant, location, user_id,
               transaction_type, channel, device_type, is_anomaly, anomaly_score,
               gemini_explanation
          FROM transactions
         WHERE upload_batch_id = $1
         ORDER BY "timestamp" ASC, id ASC
        "#,
    )
    .bind(batch_id)
    .fetch_all(db)
    .await
    .context("list batch transactions")?;
    Ok(rows)
}

pub async fn list_anomalies(db: &PgPool, batch_id: Uuid) -> anyhow::Result<Vec<Transaction>> {
    let rows = sqlx::query_as::<_, Transaction>(
        r#"
        SELECT id, upload_batch_id, amount, "timestamp", merchant, location, user_id,
               transaction_type, channel, device_type, is_anomaly, anomaly_score,
               gemini_explanation
          FROM transactions
         WHERE upload_batch_id = $1 AND is_anomaly
         ORDER BY anomaly_score DESC NULLS LAST, "timestamp" ASC
        "#,
    )
    .bind(batch_id)
    .fetch_all(db)
    .await
    .context("list batch anomalies")?;
    Ok(rows)
}

pub async fn count_by_batch(db: &PgPool, batch_id: Uuid) -> anyhow::Result<i64> {
    let (count,): (i64,) =
        sqlx::query_as(r#"SELECT COUNT(*) FROM transactions WHERE upload_batch_id = $1"#)
            .bind(batch_id)
            .fetch_one(db)
            .await
            .context("count batch transactions")?;
    Ok(count)
}

/// Writes each score with its own UPDATE, all inside one DB transaction.
/// Results for ids outside the batch are ignored.
pub async fn apply_scores(
    db: &PgPool,
    batch_id: Uuid,
    results: &[ScoreResult],
) -> anyhow::Result<u64> {
    let mut tx = db.begin().await.context("begin tx")?;
    let mut updated = 0;
    for r in results {
        updated += sqlx::query(
            r#"
            UPDATE transactions
               SET is_anomaly = $3, anomaly_score = $4
             WHERE id = $1 AND upload_batch_id = $2
            "#,
        )
        .bind(r.id)
        .bind(batch_id)
        .bind(r.is_anomaly)
        .bind(r.anomaly_score)
        .execute(&mut *tx)
        .await
        .context("apply anomaly score")?
        .rows_affected();
    }
    tx.commit().await.context("commit tx")?;
    Ok(updated)
}

/// The transaction, only when its batch belongs to `user_id`.
pub async fn find_owned_transaction(
    db: &PgPool,
    user_id: Uuid,
    transaction_id: Uuid,
) -> anyhow::Result<Option<Transaction>> {
    let row = sqlx::query_as::<_, Transaction>(
        r#"
        SELECT t.id, t.upload_batch_id, t.amount, t."timestamp", t.merchant, t.location,
               t.user_id, t.transaction_type, t.channel, t.device_type, t.is_anomaly,
               t.anomaly_score, t.gemini_explanation
          FROM transactions t
          JOIN upload_batches b ON b.id = t.upload_batch_id
         WHERE t.id = $1 AND b.user_id = $2
        "#,
    )
    .bind(transaction_id)
    .bind(user_id)
    .fetch_optional(db)
    .await
    .context("find owned transaction")?;
    Ok(row)
}

/// Stores the explanation unless one is already present and returns
/// whichever text ends up on the row.
pub async fn save_explanation(
    db: &PgPool,
    transaction_id: Uuid,
    explanation: &str,
) -> anyhow::Result<String> {
    let (stored,): (String,) = sqlx::query_as(
        r#"
        UPDATE transactions
           SET gemini_explanation = COALESCE(gemini_explanation, $2)
         WHERE id = $1
        RETURNING gemini_explanation
        "#,
    )
    .bind(transaction_id)
    .bind(explanation)
    .fetch_one(db)
    .await
    .context("save explanation")?;
    Ok(stored)
}

use anyhow::Context;
use time::format_description::well_known::Rfc3339;

use super::repo_types::Transaction;

const HEADER: [&str; 12] = [
    "ID",
    "Amount",
    "Timestamp",
    "Merchant",
    "Location",
    "UserID",
    "TransactionType",
    "Channel",
    "DeviceType",
    "IsAnomaly",
    "AnomalyScore",
    "Explanation",
];

pub fn file_name(batch_id: uuid::Uuid) -> String {
    format!("fraud_results_{batch_id}.csv")
}

/// Scored batch as CSV. Text fields are quoted, numbers are not; unset
/// values are written as empty fields.
pub fn render_csv(rows: &[Transaction]) -> anyhow::Result<Vec<u8>> {
    let mut w = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::NonNumeric)
        .from_writer(Vec::new());

    w.write_record(HEADER)?;
    for t in rows {
        let timestamp = t.timestamp.format(&Rfc3339).context("format timestamp")?;
        w.write_record([
            t.id.to_string(),
            t.amount.to_string(),
            timestamp,
            t.merchant.clone(),
            t.location.clone().unwrap_or_default(),
            t.user_id.clone().unwrap_or_default(),
            t.transaction_type.clone().unwrap_or_default(),
            t.channel.clone().unwrap_or_default(),
            t.device_type.clone().unwrap_or_default(),
            t.is_anomaly.map(|b| b.to_string()).unwrap_or_default(),
            t.anomaly_score.map(|s| s.to_string()).unwrap_or_default(),
            t.gemini_explanation.clone().unwrap_or_default(),
        ])?;
    }
    w.into_inner()
        .map_err(|e| anyhow::anyhow!("flush csv: {}", e.error()))
}

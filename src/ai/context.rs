use std::collections::HashMap;
use std::fmt::Write;

use rust_decimal::Decimal;
use time::OffsetDateTime;
use uuid::Uuid;

use super::prompts::PromptConfig;
use crate::transactions::repo_types::Transaction;

#[derive(Debug, Clone, PartialEq)]
pub struct TopAnomaly {
    pub id: Uuid,
    pub amount: Decimal,
    pub timestamp: OffsetDateTime,
    pub merchant: String,
    pub location: Option<String>,
    pub score: f64,
}

/// Deterministic summary of a batch handed to the model. The same rows and
/// config always render the same text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchContext {
    pub total: usize,
    pub analyzed: usize,
    pub anomalies: usize,
    /// Percent of analyzed transactions flagged.
    pub anomaly_rate: f64,
    pub total_amount: Decimal,
    pub average_amount: Decimal,
    pub anomaly_amount: Decimal,
    pub average_anomaly_amount: Decimal,
    pub top_anomalies: Vec<TopAnomaly>,
    pub by_hour: Vec<(String, usize)>,
    pub by_merchant: Vec<(String, usize)>,
    pub by_location: Vec<(String, usize)>,
    pub by_device: Vec<(String, usize)>,
    pub by_channel: Vec<(String, usize)>,
}

/// Most frequent keys first, ties broken by key.
fn top_k<I>(keys: I, k: usize) -> Vec<(String, usize)>
where
    I: IntoIterator<Item = String>,
{
    let mut counts: HashMap<String, usize> = HashMap::new();
    for key in keys {
        *counts.entry(key).or_default() += 1;
    }
    let mut v: Vec<(String, usize)> = counts.into_iter().collect();
    v.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    v.truncate(k);
    v
}

fn mean(sum: Decimal, n: usize) -> Decimal {
    if n == 0 {
        Decimal::ZERO
    } else {
        (sum / Decimal::from(n)).round_dp(2)
    }
}

impl BatchContext {
    pub fn build(rows: &[Transaction], cfg: &PromptConfig) -> Self {
        let flagged: Vec<&Transaction> = rows.iter().filter(|t| t.is_flagged()).collect();
        let analyzed = rows.iter().filter(|t| t.is_scored()).count();

        let total_amount: Decimal = rows.iter().map(|t| t.amount).sum();
        let anomaly_amount: Decimal = flagged.iter().map(|t| t.amount).sum();

        let mut ranked = flagged.clone();
        ranked.sort_by(|a, b| {
            let sa = a.anomaly_score.unwrap_or(f64::MIN);
            let sb = b.anomaly_score.unwrap_or(f64::MIN);
            sb.total_cmp(&sa).then_with(|| a.timestamp.cmp(&b.timestamp))
        });
        let top_anomalies = ranked
            .into_iter()
            .take(cfg.top_anomalies)
            .map(|t| TopAnomaly {
                id: t.id,
                amount: t.amount,
                timestamp: t.timestamp,
                merchant: t.merchant.clone(),
                location: t.location.clone(),
                score: t.anomaly_score.unwrap_or_default(),
            })
            .collect();

        let k = cfg.breakdown_top_k;
        let label = |v: &Option<String>| v.clone().unwrap_or_else(|| "Unknown".into());

        Self {
            total: rows.len(),
            analyzed,
            anomalies: flagged.len(),
            anomaly_rate: if analyzed == 0 {
                0.0
            } else {
                flagged.len() as f64 * 100.0 / analyzed as f64
            },
            total_amount,
            average_amount: mean(total_amount, rows.len()),
            anomaly_amount,
            average_anomaly_amount: mean(anomaly_amount, flagged.len()),
            top_anomalies,
            by_hour: top_k(flagged.iter().map(|t| format!("{:02}:00", t.timestamp.hour())), k),
            by_merchant: top_k(flagged.iter().map(|t| t.merchant.clone()), k),
            by_location: top_k(flagged.iter().map(|t| label(&t.location)), k),
            by_device: top_k(flagged.iter().map(|t| label(&t.device_type)), k),
            by_channel: top_k(flagged.iter().map(|t| label(&t.channel)), k),
        }
    }

    pub fn has_scores(&self) -> bool {
        self.analyzed > 0
    }

    pub fn render(&self) -> String {
        let mut s = String::new();
        let _ = writeln!(s, "Batch summary:");
        let _ = writeln!(s, "- transactions: {}", self.total);
        let _ = writeln!(s, "- analyzed: {}", self.analyzed);
        let _ = writeln!(s, "- anomalies: {} ({:.2}% of analyzed)", self.anomalies, self.anomaly_rate);
        let _ = writeln!(
            s,
            "- amount: total {}, average {}",
            self.total_amount, self.average_amount
        );
        let _ = writeln!(
            s,
            "- anomalous amount: total {}, average {}",
            self.anomaly_amount, self.average_anomaly_amount
        );

        if !self.top_anomalies.is_empty() {
            let _ = writeln!(s, "\nHighest-scoring anomalies:");
            for (i, a) in self.top_anomalies.iter().enumerate() {
                let _ = writeln!(
                    s,
                    "{}. {} at {} ({}) on {}, score {:.4}",
                    i + 1,
                    a.amount,
                    a.merchant,
                    a.location.as_deref().unwrap_or("Unknown"),
                    a.timestamp.date(),
                    a.score
                );
            }
        }

        let sections = [
            ("hour of day", &self.by_hour),
            ("merchant", &self.by_merchant),
            ("location", &self.by_location),
            ("device type", &self.by_device),
            ("channel", &self.by_channel),
        ];
        for (title, entries) in sections {
            if entries.is_empty() {
                continue;
            }
            let _ = writeln!(s, "\nAnomalies by {title}:");
            for (key, n) in entries {
                let _ = writeln!(s, "- {key}: {n}");
            }
        }
        s
    }
}

//! Column mapping and cleaning for uploaded CSV rows.
//!
//! Heterogeneous source headers are normalized (lowercased, whitespace
//! removed) and looked up in a fixed alias table to produce canonical
//! fields. Mapping is pure: the same raw row always yields the same outcome.

use std::collections::HashMap;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;
use time::{
    format_description::well_known::Rfc3339, macros::format_description, Date, OffsetDateTime,
    PrimitiveDateTime,
};

/// Largest amount that fits `NUMERIC(18, 2)`.
const MAX_AMOUNT: i64 = 9_999_999_999_999_999;

/// Scale of the `amount` column.
const AMOUNT_SCALE: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalField {
    Amount,
    Timestamp,
    Merchant,
    Location,
    UserId,
    TransactionType,
    Channel,
    DeviceType,
}

impl CanonicalField {
    pub fn name(self) -> &'static str {
        match self {
            CanonicalField::Amount => "amount",
            CanonicalField::Timestamp => "timestamp",
            CanonicalField::Merchant => "merchant",
            CanonicalField::Location => "location",
            CanonicalField::UserId => "user_id",
            CanonicalField::TransactionType => "transaction_type",
            CanonicalField::Channel => "channel",
            CanonicalField::DeviceType => "device_type",
        }
    }
}

/// A row that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanRow {
    pub amount: Decimal,
    pub timestamp: OffsetDateTime,
    pub merchant: String,
    pub location: Option<String>,
    pub user_id: Option<String>,
    pub transaction_type: Option<String>,
    pub channel: Option<String>,
    pub device_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("amount column missing or empty")]
    MissingAmount,
    #[error("amount {0:?} is not a number")]
    InvalidAmount(String),
    #[error("amount must be positive")]
    NonPositiveAmount,
    #[error("amount exceeds the storable range")]
    AmountOutOfRange,
    #[error("timestamp column missing or empty")]
    MissingTimestamp,
    #[error("timestamp {0:?} is not a recognised date")]
    InvalidTimestamp(String),
    #[error("merchant column missing or empty")]
    MissingMerchant,
}

impl RejectReason {
    /// Canonical field the row failed on.
    pub fn field(&self) -> CanonicalField {
        match self {
            RejectReason::MissingAmount
            | RejectReason::InvalidAmount(_)
            | RejectReason::NonPositiveAmount
            | RejectReason::AmountOutOfRange => CanonicalField::Amount,
            RejectReason::MissingTimestamp | RejectReason::InvalidTimestamp(_) => {
                CanonicalField::Timestamp
            }
            RejectReason::MissingMerchant => CanonicalField::Merchant,
        }
    }

    /// Stable key used when tallying rejections.
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::MissingAmount => "missing_amount",
            RejectReason::InvalidAmount(_) => "invalid_amount",
            RejectReason::NonPositiveAmount => "non_positive_amount",
            RejectReason::AmountOutOfRange => "amount_out_of_range",
            RejectReason::MissingTimestamp => "missing_timestamp",
            RejectReason::InvalidTimestamp(_) => "invalid_timestamp",
            RejectReason::MissingMerchant => "missing_merchant",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Accepted(CleanRow),
    Rejected(RejectReason),
}

/// Immutable alias table. Aliases are stored normalized; within a field the
/// first alias with a non-empty value wins.
#[derive(Debug, Clone)]
pub struct ColumnMapper {
    aliases: Vec<(CanonicalField, Vec<String>)>,
}

impl Default for ColumnMapper {
    fn default() -> Self {
        Self::new(vec![
            (
                CanonicalField::Amount,
                vec!["transactionamount", "amount", "jumlah", "nilai", "nominal"],
            ),
            (
                CanonicalField::Timestamp,
                vec!["transactiondate", "timestamp", "waktu", "tanggal", "datetime", "date"],
            ),
            (
                CanonicalField::Merchant,
                vec!["merchantid", "merchant", "merchantname", "toko"],
            ),
            (CanonicalField::Location, vec!["location", "lokasi", "city", "kota"]),
            (CanonicalField::UserId, vec!["accountid", "user_id", "userid", "customerid"]),
            (
                CanonicalField::TransactionType,
                vec!["transactiontype", "transaction_type", "type", "jenistransaksi"],
            ),
            (CanonicalField::Channel, vec!["channel", "kanal"]),
            (
                CanonicalField::DeviceType,
                vec!["devicetype", "device_type", "device", "perangkat"],
            ),
        ])
    }
}

impl ColumnMapper {
    pub fn new<S: AsRef<str>>(aliases: Vec<(CanonicalField, Vec<S>)>) -> Self {
        let aliases = aliases
            .into_iter()
            .map(|(field, names)| {
                let names = names
                    .iter()
                    .map(|n| Self::normalize_header(n.as_ref()))
                    .collect();
                (field, names)
            })
            .collect();
        Self { aliases }
    }

    /// Lowercases and strips all whitespace (and a UTF-8 BOM).
    pub fn normalize_header(raw: &str) -> String {
        raw.trim_start_matches('\u{feff}')
            .chars()
            .filter(|c| !c.is_whitespace())
            .flat_map(char::to_lowercase)
            .collect()
    }

    /// Resolves canonical fields from `(header, value)` pairs.
    pub fn resolve<'a, I>(&self, row: I) -> HashMap<CanonicalField, &'a str>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut by_key: HashMap<String, &'a str> = HashMap::new();
        for (header, value) in row {
            by_key
                .entry(Self::normalize_header(header))
                .or_insert_with(|| value.trim());
        }

        let mut out = HashMap::new();
        for (field, names) in &self.aliases {
            let hit = names
                .iter()
                .filter_map(|n| by_key.get(n.as_str()).copied())
                .find(|v| !v.is_empty());
            if let Some(v) = hit {
                out.insert(*field, v);
            }
        }
        out
    }

    pub fn map_row<'a, I>(&self, row: I) -> RowOutcome
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let fields = self.resolve(row);
        let get = |f: CanonicalField| fields.get(&f).copied();
        let optional = |f: CanonicalField| get(f).map(str::to_string);

        let Some(raw_amount) = get(CanonicalField::Amount) else {
            return RowOutcome::Rejected(RejectReason::MissingAmount);
        };
        // Rounded the way Postgres rounds into NUMERIC(18, 2), so the
        // positivity check sees the value that will be stored.
        let stored = clean_amount(raw_amount).map(|a| {
            a.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::MidpointAwayFromZero)
        });
        let amount = match stored {
            Some(a) if a <= Decimal::ZERO => {
                return RowOutcome::Rejected(RejectReason::NonPositiveAmount)
            }
            Some(a) if a > Decimal::from(MAX_AMOUNT) => {
                return RowOutcome::Rejected(RejectReason::AmountOutOfRange)
            }
            Some(a) => a,
            None => return RowOutcome::Rejected(RejectReason::InvalidAmount(raw_amount.into())),
        };

        let Some(raw_ts) = get(CanonicalField::Timestamp) else {
            return RowOutcome::Rejected(RejectReason::MissingTimestamp);
        };
        let Some(timestamp) = parse_timestamp(raw_ts) else {
            return RowOutcome::Rejected(RejectReason::InvalidTimestamp(raw_ts.into()));
        };

        let Some(merchant) = optional(CanonicalField::Merchant) else {
            return RowOutcome::Rejected(RejectReason::MissingMerchant);
        };

        RowOutcome::Accepted(CleanRow {
            amount,
            timestamp,
            merchant,
            location: optional(CanonicalField::Location),
            user_id: optional(CanonicalField::UserId),
            transaction_type: optional(CanonicalField::TransactionType),
            channel: optional(CanonicalField::Channel),
            device_type: optional(CanonicalField::DeviceType),
        })
    }
}

lazy_static! {
    static ref CURRENCY_RE: Regex = Regex::new(r"(?i)idr|usd|rp\.?|[$€£]").unwrap();
}

/// Parses a money string written in either Indonesian (`Rp 1.000,50`) or
/// English (`$1,000.50`) notation.
///
/// When both `.` and `,` appear, the right-most one is the decimal mark.
/// A lone separator followed by exactly three digits is a thousands
/// separator (`1.000` is one thousand); otherwise it is the decimal mark.
pub fn clean_amount(raw: &str) -> Option<Decimal> {
    let stripped = CURRENCY_RE.replace_all(raw, "");
    let s: String = stripped.chars().filter(|c| !c.is_whitespace()).collect();
    let s = s.strip_prefix('+').unwrap_or(&s);
    if s.is_empty() {
        return None;
    }

    let dots = s.matches('.').count();
    let commas = s.matches(',').count();
    let normalized = match (dots, commas) {
        (0, 0) => s.to_string(),
        (_, 0) if dots > 1 => s.replace('.', ""),
        (0, _) if commas > 1 => s.replace(',', ""),
        (1, 0) => single_separator(s, '.'),
        (0, 1) => single_separator(s, ','),
        _ => {
            let last_dot = s.rfind('.')?;
            let last_comma = s.rfind(',')?;
            if last_dot > last_comma {
                s.replace(',', "")
            } else {
                s.replace('.', "").replace(',', ".")
            }
        }
    };

    Decimal::from_str(&normalized).ok()
}

fn single_separator(s: &str, sep: char) -> String {
    let (int_part, frac) = s.split_once(sep).unwrap_or((s, ""));
    let digits = int_part.trim_start_matches('-');
    let is_grouping = frac.len() == 3
        && frac.chars().all(|c| c.is_ascii_digit())
        && !digits.is_empty()
        && digits.len() <= 3
        && !digits.starts_with('0');
    if is_grouping {
        format!("{int_part}{frac}")
    } else {
        format!("{int_part}.{frac}")
    }
}

/// Accepts RFC 3339 plus the common spreadsheet layouts. Values without an
/// offset are taken as UTC; `dd/mm/yyyy` is tried before `mm/dd/yyyy`.
pub fn parse_timestamp(raw: &str) -> Option<OffsetDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(t) = OffsetDateTime::parse(s, &Rfc3339) {
        return Some(t);
    }

    let datetime_formats = [
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]"),
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"),
        format_description!("[year]-[month]-[day] [hour]:[minute]"),
        format_description!("[year]-[month]-[day]T[hour]:[minute]"),
        format_description!("[day]/[month]/[year] [hour]:[minute]:[second]"),
        format_description!("[day]/[month]/[year] [hour]:[minute]"),
        format_description!("[month]/[day]/[year] [hour]:[minute]:[second]"),
        format_description!("[month]/[day]/[year] [hour]:[minute]"),
    ];
    for fmt in datetime_formats {
        if let Ok(dt) = PrimitiveDateTime::parse(s, fmt) {
            return Some(dt.assume_utc());
        }
    }

    let date_formats = [
        format_description!("[year]-[month]-[day]"),
        format_description!("[day]/[month]/[year]"),
        format_description!("[month]/[day]/[year]"),
        format_description!("[day]-[month]-[year]"),
    ];
    for fmt in date_formats {
        if let Ok(d) = Date::parse(s, fmt) {
            return Some(d.midnight().assume_utc());
        }
    }
    None
}

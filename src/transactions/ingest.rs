use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use anyhow::Context;
use serde::Serialize;
use tracing::debug;

use super::mapper::{CleanRow, ColumnMapper, RowOutcome};

/// Aggregate counts reported back to the uploader.
#[derive(Debug, Default, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IngestStats {
    pub total_rows: usize,
    pub saved_rows: usize,
    pub rejected_rows: usize,
    pub rejection_reasons: BTreeMap<&'static str, usize>,
}

#[derive(Debug)]
pub struct ParsedFile {
    pub rows: Vec<CleanRow>,
    pub stats: IngestStats,
}

/// Reads every record before returning; a malformed record aborts the
/// whole file.
pub fn parse_csv<R: Read>(reader: R, mapper: &ColumnMapper) -> Result<ParsedFile, csv::Error> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let mut rows = Vec::new();
    let mut stats = IngestStats::default();

    for record in rdr.records() {
        let record = record?;
        stats.total_rows += 1;
        let pairs = headers.iter().zip(record.iter());
        match mapper.map_row(pairs) {
            RowOutcome::Accepted(row) => rows.push(row),
            RowOutcome::Rejected(reason) => {
                debug!(
                    row = stats.total_rows,
                    field = reason.field().name(),
                    %reason,
                    "row rejected"
                );
                stats.rejected_rows += 1;
                *stats.rejection_reasons.entry(reason.code()).or_default() += 1;
            }
        }
    }

    Ok(ParsedFile { rows, stats })
}

pub fn parse_csv_file(path: &Path, mapper: &ColumnMapper) -> anyhow::Result<ParsedFile> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("open upload {}", path.display()))?;
    parse_csv(std::io::BufReader::new(file), mapper)
        .with_context(|| format!("read csv {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    #[test]
    fn three_rows_one_malformed() {
        let csv = "\
TransactionAmount,TransactionDate,MerchantID,Location
150.75,2024-01-02 09:00:00,M001,Bandung
not-a-number,2024-01-02 10:00:00,M002,Jakarta
\"Rp 1.000,50\",2024-01-01 08:00:00,M003,Surabaya
";
        let parsed = parse_csv(csv.as_bytes(), &ColumnMapper::default()).unwrap();
        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(parsed.stats.total_rows, 3);
        assert_eq!(parsed.stats.rejected_rows, 1);
        assert_eq!(parsed.stats.rejection_reasons.get("invalid_amount"), Some(&1));
        assert_eq!(parsed.rows[0].amount, dec!(150.75));
        assert_eq!(parsed.rows[1].amount, dec!(1000.50));
        assert_eq!(parsed.rows[1].merchant, "M003");
    }

    #[test]
    fn ragged_rows_are_tolerated() {
        let csv = "amount,timestamp,merchant,channel\n10,2024-01-01,A\n20,2024-01-02,B,web,extra\n";
        let parsed = parse_csv(csv.as_bytes(), &ColumnMapper::default()).unwrap();
        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(parsed.rows[0].channel, None);
        assert_eq!(parsed.rows[1].channel.as_deref(), Some("web"));
    }

    #[test]
    fn header_only_file_yields_no_rows() {
        let parsed = parse_csv("amount,timestamp,merchant\n".as_bytes(), &ColumnMapper::default())
            .unwrap();
        assert!(parsed.rows.is_empty());
        assert_eq!(parsed.stats.total_rows, 0);
    }

    #[test]
    fn invalid_utf8_is_a_read_error() {
        let mut bytes = b"amount,timestamp,merchant\n10,2024-01-01,".to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe, b'\n']);
        assert!(parse_csv(bytes.as_slice(), &ColumnMapper::default()).is_err());
    }

    #[test]
    fn parses_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "jumlah,waktu,merchant").unwrap();
        writeln!(file, "\"25.000\",2024-05-05,Alfamart").unwrap();
        let parsed = parse_csv_file(file.path(), &ColumnMapper::default()).unwrap();
        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.rows[0].amount, dec!(25000));
    }
}

//! Wide CSV import and export for price tables.
//!
//! Expected format:
//! ```csv
//! datetime,BTC/USDT:USDT,SOL/USDT:USDT
//! 2024-01-01 00:00:00,42000.5,101.25
//! 2024-01-01 00:15:00,42010.0,101.40
//! ```

use super::table::{PriceSeries, PriceTable};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};

impl PriceTable {
    /// Load a table from a wide CSV file.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read CSV file: {}", path.display()))?;

        Self::from_csv_content(&content)
    }

    /// Load a table from wide CSV content.
    ///
    /// A column with any missing or empty cell is dropped entirely; remaining
    /// columns are aligned on the rows they all share.
    pub fn from_csv_content(content: &str) -> Result<Self> {
        let mut lines = content.lines().filter(|l| !l.trim().is_empty());

        let header = lines.next().context("CSV file is empty")?;
        let names: Vec<String> = header
            .split(',')
            .skip(1)
            .map(|h| h.trim().to_string())
            .collect();

        if names.is_empty() {
            anyhow::bail!("CSV header has no instrument columns");
        }

        let mut series: Vec<PriceSeries> = vec![Vec::new(); names.len()];
        let mut incomplete = vec![false; names.len()];
        let mut rows = 0usize;

        for (line_num, line) in lines.enumerate() {
            let parts: Vec<&str> = line.split(',').collect();
            let timestamp = parse_timestamp(parts[0]).with_context(|| {
                format!("Invalid timestamp on line {}: {}", line_num + 2, parts[0])
            })?;

            for (col, name) in names.iter().enumerate() {
                let cell = parts.get(col + 1).map(|c| c.trim()).unwrap_or("");
                if cell.is_empty() {
                    incomplete[col] = true;
                    continue;
                }

                let price: f64 = cell.parse().with_context(|| {
                    format!("Invalid price for {} on line {}: {}", name, line_num + 2, cell)
                })?;

                if price.is_finite() {
                    series[col].push((timestamp, price));
                } else {
                    incomplete[col] = true;
                }
            }
            rows += 1;
        }

        if rows == 0 {
            anyhow::bail!("CSV file contains no data rows");
        }

        let kept: Vec<(String, PriceSeries)> = names
            .into_iter()
            .zip(series)
            .zip(incomplete)
            .filter_map(|((name, points), missing)| {
                if missing {
                    warn!(instrument = %name, "Dropping column with missing prices");
                    None
                } else {
                    Some((name, points))
                }
            })
            .collect();

        let table = PriceTable::from_series(kept);
        debug!(
            instruments = table.width(),
            rows = table.len(),
            "Loaded price table from CSV"
        );

        Ok(table)
    }

    /// Write the table as wide CSV.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create CSV file: {}", path.display()))?;

        writeln!(file, "datetime,{}", self.names().join(","))?;

        for (row, timestamp) in self.index().iter().enumerate() {
            let cells: Vec<String> = (0..self.width())
                .map(|col| self.column(col)[row].to_string())
                .collect();
            writeln!(file, "{},{}", timestamp.to_rfc3339(), cells.join(","))?;
        }

        Ok(())
    }
}

/// Parse a timestamp in RFC 3339, `%Y-%m-%d %H:%M:%S` or `%Y-%m-%d` form.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_csv_parsing() {
        let csv = r#"datetime,BTC,ETH
2024-01-01 00:00:00,42000.5,2300.25
2024-01-01 00:15:00,42010.0,2301.00
2024-01-01 00:30:00,42020.0,2302.50
"#;

        let table = PriceTable::from_csv_content(csv).unwrap();

        assert_eq!(table.width(), 2);
        assert_eq!(table.len(), 3);
        assert_eq!(table.names(), &["BTC".to_string(), "ETH".to_string()]);
        assert_eq!(
            table.index()[1],
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 15, 0).unwrap()
        );
        assert_eq!(table.get("ETH").unwrap()[2], 2302.5);
    }

    #[test]
    fn test_column_with_gaps_is_dropped() {
        let csv = r#"datetime,BTC,NEW,ETH
2024-01-01T00:00:00Z,1.0,,10.0
2024-01-01T00:15:00Z,2.0,5.0,20.0
"#;

        let table = PriceTable::from_csv_content(csv).unwrap();
        assert_eq!(table.names(), &["BTC".to_string(), "ETH".to_string()]);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_invalid_price_is_an_error() {
        let csv = "datetime,BTC\n2024-01-01,abc\n";
        assert!(PriceTable::from_csv_content(csv).is_err());
    }

    #[test]
    fn test_empty_content_is_an_error() {
        assert!(PriceTable::from_csv_content("").is_err());
        assert!(PriceTable::from_csv_content("datetime,BTC\n").is_err());
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-03-05"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-05 00:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-05T00:00:00+00:00"), Some(expected));
        assert_eq!(parse_timestamp("not a date"), None);
    }

    #[test]
    fn test_csv_round_trip() {
        let csv = "datetime,A,B\n2024-01-01,1.25,3.5\n2024-01-02,1.5,3.75\n";
        let table = PriceTable::from_csv_content(csv).unwrap();

        let path = std::env::temp_dir().join(format!("prices_{}.csv", std::process::id()));
        table.to_csv(&path).unwrap();
        let reloaded = PriceTable::from_csv(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(reloaded, table);
    }
}

//! Dataset sources
//!
//! The engine only needs a cleaned, ordered bar series. [`DatasetSource`] is
//! the seam to whatever stores those series; [`CsvDirectory`] reads them from
//! a folder of CSV exports.

use super::types::{Bar, Dataset};
use crate::error::{RegimeError, Result};
use chrono::NaiveDate;
use std::path::PathBuf;

/// Columns every dataset must carry
const REQUIRED_COLUMNS: [&str; 6] = ["date", "open", "high", "low", "close", "volume"];

/// Anything that can list and load named datasets
pub trait DatasetSource {
    /// Names of the available datasets
    fn list(&self) -> Result<Vec<String>>;

    /// Load a dataset by name, failing with `NotFound` when absent
    fn load(&self, name: &str) -> Result<Dataset>;
}

/// A directory of `Date,Open,High,Low,Close,Volume` CSV files
#[derive(Debug, Clone)]
pub struct CsvDirectory {
    root: PathBuf,
}

impl CsvDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Write bars to `<root>/<name>` with the standard header
    pub fn save(&self, name: &str, bars: &[Bar]) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.root)?;
        let path = self.root.join(name);
        let mut writer = csv::Writer::from_path(&path)?;

        writer.write_record(["Date", "Open", "High", "Low", "Close", "Volume"])?;
        for bar in bars {
            writer.write_record(&[
                bar.date.format("%Y-%m-%d").to_string(),
                bar.open.to_string(),
                bar.high.to_string(),
                bar.low.to_string(),
                bar.close.to_string(),
                bar.volume.to_string(),
            ])?;
        }

        writer.flush()?;
        tracing::info!(path = %path.display(), bars = bars.len(), "dataset saved");
        Ok(path)
    }
}

impl DatasetSource for CsvDirectory {
    fn list(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(dir = %self.root.display(), "data directory does not exist");
                return Ok(vec![]);
            }
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if name.ends_with(".csv") {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn load(&self, name: &str) -> Result<Dataset> {
        let path = self.root.join(name);
        if !path.is_file() {
            return Err(RegimeError::NotFound(name.to_string()));
        }

        tracing::info!(dataset = name, "loading dataset");
        let mut reader = csv::Reader::from_path(&path)?;
        let headers = reader.headers()?.clone();

        let position = |column: &str| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(column))
        };
        let missing: Vec<&str> = REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|c| position(*c).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(RegimeError::Validation(format!(
                "Missing columns in {}: {:?}",
                name, missing
            )));
        }
        let idx: Vec<usize> = REQUIRED_COLUMNS
            .iter()
            .filter_map(|c| position(*c))
            .collect();

        let mut bars = Vec::new();
        for (line, result) in reader.records().enumerate() {
            let record = result?;
            let field = |i: usize| record.get(idx[i]).unwrap_or("").trim();
            let number = |i: usize| -> Result<f64> {
                field(i).parse::<f64>().map_err(|_| {
                    RegimeError::Validation(format!(
                        "row {}: column '{}' is not numeric: '{}'",
                        line + 1,
                        REQUIRED_COLUMNS[i],
                        field(i)
                    ))
                })
            };

            bars.push(Bar {
                date: parse_date(field(0)).ok_or_else(|| {
                    RegimeError::Validation(format!(
                        "row {}: unparseable date '{}'",
                        line + 1,
                        field(0)
                    ))
                })?,
                open: number(1)?,
                high: number(2)?,
                low: number(3)?,
                close: number(4)?,
                volume: number(5)?,
            });
        }

        // Chronological order, first occurrence wins on duplicate dates
        bars.sort_by_key(|b| b.date);
        bars.dedup_by_key(|b| b.date);

        if let (Some(first), Some(last)) = (bars.first(), bars.last()) {
            tracing::info!(
                dataset = name,
                bars = bars.len(),
                from = %first.date,
                to = %last.date,
                "dataset loaded"
            );
        }

        Ok(Dataset::new(name, bars))
    }
}

/// Accepts `YYYY-MM-DD`, optionally followed by a time component
fn parse_date(raw: &str) -> Option<NaiveDate> {
    let day = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_save_and_load_bars() {
        let dir = tempdir().unwrap();
        let store = CsvDirectory::new(dir.path());
        let bars = vec![
            Bar {
                date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                open: 100.0,
                high: 110.0,
                low: 95.0,
                close: 105.0,
                volume: 1000.0,
            },
            Bar {
                date: NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
                open: 105.0,
                high: 112.0,
                low: 101.0,
                close: 108.0,
                volume: 1500.0,
            },
        ];

        store.save("AAPL.csv", &bars).unwrap();
        let loaded = store.load("AAPL.csv").unwrap();

        assert_eq!(loaded.name, "AAPL.csv");
        assert_eq!(loaded.bars, bars);
        assert_eq!(store.list().unwrap(), vec!["AAPL.csv".to_string()]);
    }

    #[test]
    fn test_load_sorts_and_dedups() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("x.csv"),
            "Date,Open,High,Low,Close,Volume,Adj Close\n\
             2024-01-03 00:00:00,2,2,2,2,10,2\n\
             2024-01-02,1,1,1,1,10,1\n\
             2024-01-03,3,3,3,3,10,3\n",
        )
        .unwrap();

        let dataset = CsvDirectory::new(dir.path()).load("x.csv").unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.bars[0].close, 1.0);
        assert_eq!(dataset.bars[1].close, 2.0);
    }

    #[test]
    fn test_missing_columns() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("bad.csv"), "Date,Close\n2024-01-02,1\n").unwrap();

        let err = CsvDirectory::new(dir.path()).load("bad.csv").unwrap_err();
        match err {
            RegimeError::Validation(msg) => {
                assert!(msg.contains("open"));
                assert!(msg.contains("volume"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_dataset_is_not_found() {
        let dir = tempdir().unwrap();
        let err = CsvDirectory::new(dir.path()).load("nope.csv").unwrap_err();
        assert!(matches!(err, RegimeError::NotFound(_)));
    }

    #[test]
    fn test_list_missing_directory_is_empty() {
        let store = CsvDirectory::new("/definitely/not/here");
        assert!(store.list().unwrap().is_empty());
    }
}

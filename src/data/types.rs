//! Data types for daily market data

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One trading session of OHLCV data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Session date
    pub date: NaiveDate,
    /// Opening price
    pub open: f64,
    /// High price
    pub high: f64,
    /// Low price
    pub low: f64,
    /// Closing price
    pub close: f64,
    /// Traded volume
    pub volume: f64,
}

impl Bar {
    /// All numeric fields are finite, prices positive and volume non-negative
    pub fn is_well_formed(&self) -> bool {
        let prices = [self.open, self.high, self.low, self.close];
        prices.iter().all(|p| p.is_finite() && *p > 0.0)
            && self.volume.is_finite()
            && self.volume >= 0.0
    }
}

/// A named, chronologically ordered series of bars
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Dataset identity (e.g. the file it was loaded from)
    pub name: String,
    /// Bars in ascending date order
    pub bars: Vec<Bar>,
}

impl Dataset {
    /// Create new dataset from bars
    pub fn new(name: impl Into<String>, bars: Vec<Bar>) -> Self {
        Self {
            name: name.into(),
            bars,
        }
    }

    /// Number of bars
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Keep only the most recent `max_bars` bars
    pub fn tail(&self, max_bars: usize) -> Dataset {
        let start = self.bars.len().saturating_sub(max_bars);
        Dataset {
            name: self.name.clone(),
            bars: self.bars[start..].to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bar(day: u32, close: f64) -> Bar {
        Bar {
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            open: 100.0,
            high: 110.0,
            low: 95.0,
            close,
            volume: 1000.0,
        }
    }

    #[test]
    fn test_bar_well_formed() {
        assert!(sample_bar(2, 105.0).is_well_formed());
        assert!(!sample_bar(2, f64::NAN).is_well_formed());
        assert!(!sample_bar(2, 0.0).is_well_formed());
    }

    #[test]
    fn test_tail_keeps_most_recent() {
        let dataset = Dataset::new(
            "test",
            (1..=10).map(|d| sample_bar(d, 100.0 + d as f64)).collect(),
        );
        let tail = dataset.tail(3);
        assert_eq!(tail.len(), 3);
        assert_eq!(tail.bars[0].date, NaiveDate::from_ymd_opt(2024, 1, 8).unwrap());
        assert_eq!(dataset.tail(50).len(), 10);
    }
}

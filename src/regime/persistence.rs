//! Regime persistence: how long regimes last before switching

use super::labeler::RegimeLabelMapping;
use crate::config::RegimeConfig;
use crate::error::{RegimeError, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Coarse verdict on regime stability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PersistenceQuality {
    Good,
    Moderate,
    Poor,
}

impl fmt::Display for PersistenceQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistenceQuality::Good => write!(f, "GOOD"),
            PersistenceQuality::Moderate => write!(f, "MODERATE"),
            PersistenceQuality::Poor => write!(f, "POOR"),
        }
    }
}

/// Run-length summary of one regime
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegimeDuration {
    /// Mean run length
    pub avg: f64,
    /// Number of runs
    pub count: usize,
}

/// Run-length statistics of a decoded state sequence
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistenceMetrics {
    pub total_switches: usize,
    pub avg_duration: f64,
    pub median_duration: f64,
    pub min_duration: usize,
    pub max_duration: usize,
    /// Average run length over sequence length, in (0, 1]
    pub persistence_score: f64,
    /// Only regimes that occur in the sequence
    pub duration_by_regime: BTreeMap<String, RegimeDuration>,
    pub quality: PersistenceQuality,
}

/// Scores how stable a decoded regime sequence is
#[derive(Debug, Clone)]
pub struct PersistenceAnalyzer {
    good_threshold: f64,
    moderate_threshold: f64,
}

impl Default for PersistenceAnalyzer {
    fn default() -> Self {
        Self::from_config(&RegimeConfig::default())
    }
}

impl PersistenceAnalyzer {
    pub fn new(good_threshold: f64, moderate_threshold: f64) -> Self {
        Self {
            good_threshold,
            moderate_threshold,
        }
    }

    pub fn from_config(config: &RegimeConfig) -> Self {
        Self::new(
            config.good_persistence_threshold,
            config.moderate_persistence_threshold,
        )
    }

    /// Quality band of a persistence score
    pub fn quality(&self, score: f64) -> PersistenceQuality {
        if score > self.good_threshold {
            PersistenceQuality::Good
        } else if score > self.moderate_threshold {
            PersistenceQuality::Moderate
        } else {
            PersistenceQuality::Poor
        }
    }

    /// Analyze maximal runs of equal states
    pub fn analyze(
        &self,
        states: &[usize],
        mapping: &RegimeLabelMapping,
    ) -> Result<PersistenceMetrics> {
        if states.is_empty() {
            return Err(RegimeError::Validation(
                "cannot score persistence of an empty state sequence".to_string(),
            ));
        }

        let runs = run_lengths(states);
        let lengths: Vec<usize> = runs.iter().map(|&(_, len)| len).collect();

        let avg_duration = lengths.iter().sum::<usize>() as f64 / lengths.len() as f64;
        let min_duration = lengths.iter().copied().min().unwrap_or(0);
        let max_duration = lengths.iter().copied().max().unwrap_or(0);
        let persistence_score = avg_duration / states.len() as f64;

        let mut per_state: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for &(state, len) in &runs {
            per_state.entry(state).or_default().push(len);
        }
        let mut duration_by_regime = BTreeMap::new();
        for (state, lens) in per_state {
            let label = mapping.label(state).ok_or_else(|| {
                RegimeError::Validation(format!("state {} has no regime label", state))
            })?;
            duration_by_regime.insert(
                label.to_string(),
                RegimeDuration {
                    avg: lens.iter().sum::<usize>() as f64 / lens.len() as f64,
                    count: lens.len(),
                },
            );
        }

        let quality = self.quality(persistence_score);
        tracing::info!(
            persistence_score,
            switches = runs.len() - 1,
            %quality,
            "persistence scored"
        );

        Ok(PersistenceMetrics {
            total_switches: runs.len() - 1,
            avg_duration,
            median_duration: median(&lengths),
            min_duration,
            max_duration,
            persistence_score,
            duration_by_regime,
            quality,
        })
    }
}

/// Maximal runs as (state, length)
fn run_lengths(states: &[usize]) -> Vec<(usize, usize)> {
    let mut runs: Vec<(usize, usize)> = Vec::new();
    for &state in states {
        if let Some((current, len)) = runs.last_mut() {
            if *current == state {
                *len += 1;
                continue;
            }
        }
        runs.push((state, 1));
    }
    runs
}

fn median(values: &[usize]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let n = sorted.len();
    if n == 0 {
        0.0
    } else if n % 2 == 1 {
        sorted[n / 2] as f64
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) as f64 / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regime::Regime;

    fn mapping() -> RegimeLabelMapping {
        RegimeLabelMapping::new(vec![Regime::Bear, Regime::Bull]).unwrap()
    }

    #[test]
    fn test_run_lengths() {
        assert_eq!(
            run_lengths(&[0, 0, 1, 1, 1, 0]),
            vec![(0, 2), (1, 3), (0, 1)]
        );
    }

    #[test]
    fn test_analyze_metrics() {
        let metrics = PersistenceAnalyzer::default()
            .analyze(&[0, 0, 1, 1, 1, 0], &mapping())
            .unwrap();

        assert_eq!(metrics.total_switches, 2);
        assert!((metrics.avg_duration - 2.0).abs() < 1e-12);
        assert_eq!(metrics.median_duration, 2.0);
        assert_eq!(metrics.min_duration, 1);
        assert_eq!(metrics.max_duration, 3);
        assert!((metrics.persistence_score - 2.0 / 6.0).abs() < 1e-12);
        assert_eq!(metrics.quality, PersistenceQuality::Good);

        let bear = &metrics.duration_by_regime["Bear"];
        assert_eq!(bear.count, 2);
        assert!((bear.avg - 1.5).abs() < 1e-12);
        assert_eq!(metrics.duration_by_regime["Bull"].count, 1);
    }

    #[test]
    fn test_single_observation() {
        let metrics = PersistenceAnalyzer::default()
            .analyze(&[1], &mapping())
            .unwrap();
        assert_eq!(metrics.total_switches, 0);
        assert_eq!(metrics.persistence_score, 1.0);
        assert_eq!(metrics.duration_by_regime.len(), 1);
        assert!(metrics.duration_by_regime.contains_key("Bull"));
    }

    #[test]
    fn test_empty_sequence_rejected() {
        let err = PersistenceAnalyzer::default().analyze(&[], &mapping());
        assert!(matches!(err, Err(RegimeError::Validation(_))));
    }

    #[test]
    fn test_quality_bands() {
        let analyzer = PersistenceAnalyzer::new(0.10, 0.05);
        assert_eq!(analyzer.quality(0.2), PersistenceQuality::Good);
        assert_eq!(analyzer.quality(0.10), PersistenceQuality::Moderate);
        assert_eq!(analyzer.quality(0.05), PersistenceQuality::Poor);
        assert_eq!(
            serde_json::to_string(&PersistenceQuality::Moderate).unwrap(),
            "\"MODERATE\""
        );
    }
}

//! Regime labeling based on per-state return and volatility statistics

use crate::data::FeatureRow;
use crate::error::{RegimeError, Result};
use crate::models::RegimeModel;
use serde::ser::{Serialize, SerializeMap, Serializer};
use statrs::statistics::Statistics;
use std::fmt;

/// Market regime names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Regime {
    /// Lowest mean return
    Bear,
    /// Between Bear and Bull in a 3-state model
    Sideways,
    /// Highest mean return
    Bull,
    /// Calmer of the two middle states in a 4-state model
    LowVolatility,
    /// More volatile of the two middle states in a 4-state model
    HighVolatility,
    /// Position in ascending-return order when no named scheme applies
    Ranked(usize),
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Regime::Bear => write!(f, "Bear"),
            Regime::Sideways => write!(f, "Sideways"),
            Regime::Bull => write!(f, "Bull"),
            Regime::LowVolatility => write!(f, "Low_Volatility"),
            Regime::HighVolatility => write!(f, "High_Volatility"),
            Regime::Ranked(rank) => write!(f, "Regime_{}", rank),
        }
    }
}

impl Serialize for Regime {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl Regime {
    /// Get color name for terminal output
    pub fn color(&self) -> &'static str {
        match self {
            Regime::Bull => "green",
            Regime::Bear => "red",
            Regime::Sideways => "yellow",
            Regime::LowVolatility => "cyan",
            Regime::HighVolatility => "magenta",
            Regime::Ranked(_) => "white",
        }
    }
}

/// Descriptive statistics of the raw features in one state
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct StateStatistics {
    pub count: usize,
    pub mean_return: f64,
    pub std_return: f64,
    pub mean_volatility: f64,
    pub std_volatility: f64,
}

impl StateStatistics {
    /// Statistics of the given rows; std uses n - 1 and is 0 below two rows
    pub fn from_rows<'a>(rows: impl IntoIterator<Item = &'a FeatureRow>) -> Self {
        let (returns, vols): (Vec<f64>, Vec<f64>) =
            rows.into_iter().map(|r| (r.log_return, r.volatility)).unzip();
        let count = returns.len();
        if count == 0 {
            return Self::default();
        }

        let sample_std = |values: &[f64]| {
            if values.len() < 2 {
                0.0
            } else {
                values.iter().std_dev()
            }
        };

        Self {
            count,
            mean_return: returns.iter().mean(),
            std_return: sample_std(&returns),
            mean_volatility: vols.iter().mean(),
            std_volatility: sample_std(&vols),
        }
    }
}

/// State index to regime, one entry per state
#[derive(Debug, Clone, PartialEq)]
pub struct RegimeLabelMapping {
    labels: Vec<Regime>,
}

impl RegimeLabelMapping {
    /// Build a mapping, rejecting duplicate labels
    pub fn new(labels: Vec<Regime>) -> Result<Self> {
        for (i, label) in labels.iter().enumerate() {
            if labels[..i].contains(label) {
                return Err(RegimeError::Validation(format!(
                    "label {} assigned to more than one state",
                    label
                )));
            }
        }
        Ok(Self { labels })
    }

    /// Label of `state`
    pub fn label(&self, state: usize) -> Option<Regime> {
        self.labels.get(state).copied()
    }

    /// State carrying `label`
    pub fn state_of(&self, label: Regime) -> Option<usize> {
        self.labels.iter().position(|&l| l == label)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, Regime)> + '_ {
        self.labels.iter().copied().enumerate()
    }
}

impl Serialize for RegimeLabelMapping {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.labels.len()))?;
        for (state, label) in self.iter() {
            map.serialize_entry(&state, &label)?;
        }
        map.end()
    }
}

/// Naming scheme: statistics per state in, one label per state out
pub type LabelPolicy = fn(&[StateStatistics]) -> Vec<Regime>;

/// Named schemes by state count; other counts use [`ranked_labels`]
const LABEL_POLICIES: [(usize, LabelPolicy); 3] = [
    (2, two_state_labels),
    (3, three_state_labels),
    (4, four_state_labels),
];

/// State indices by ascending mean return; ties keep index order
fn rank_by_return(stats: &[StateStatistics]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..stats.len()).collect();
    order.sort_by(|&a, &b| stats[a].mean_return.total_cmp(&stats[b].mean_return));
    order
}

fn assign_in_order(order: &[usize], names: &[Regime]) -> Vec<Regime> {
    let mut labels = vec![Regime::Ranked(0); order.len()];
    for (&state, &name) in order.iter().zip(names) {
        labels[state] = name;
    }
    labels
}

fn two_state_labels(stats: &[StateStatistics]) -> Vec<Regime> {
    assign_in_order(&rank_by_return(stats), &[Regime::Bear, Regime::Bull])
}

fn three_state_labels(stats: &[StateStatistics]) -> Vec<Regime> {
    assign_in_order(
        &rank_by_return(stats),
        &[Regime::Bear, Regime::Sideways, Regime::Bull],
    )
}

fn four_state_labels(stats: &[StateStatistics]) -> Vec<Regime> {
    let mut order = rank_by_return(stats);
    order[1..3].sort_by(|&a, &b| stats[a].mean_volatility.total_cmp(&stats[b].mean_volatility));
    assign_in_order(
        &order,
        &[
            Regime::Bear,
            Regime::LowVolatility,
            Regime::HighVolatility,
            Regime::Bull,
        ],
    )
}

fn ranked_labels(stats: &[StateStatistics]) -> Vec<Regime> {
    let order = rank_by_return(stats);
    let names: Vec<Regime> = (0..order.len()).map(Regime::Ranked).collect();
    assign_in_order(&order, &names)
}

/// Policy used for a model with `n_states` states
pub fn label_policy(n_states: usize) -> LabelPolicy {
    LABEL_POLICIES
        .iter()
        .find(|(n, _)| *n == n_states)
        .map(|(_, policy)| *policy)
        .unwrap_or(ranked_labels)
}

/// Maps HMM states to market regimes
#[derive(Debug, Clone, Default)]
pub struct RegimeLabeler;

impl RegimeLabeler {
    pub fn new() -> Self {
        Self
    }

    /// Compute per-state statistics over the raw feature rows and name each
    /// state.
    pub fn assign_labels(
        &self,
        model: &RegimeModel,
        rows: &[FeatureRow],
        states: &[usize],
    ) -> Result<(Vec<StateStatistics>, RegimeLabelMapping)> {
        let n_states = model.trained()?.n_states();

        if rows.len() != states.len() {
            return Err(RegimeError::Validation(format!(
                "{} feature rows but {} decoded states",
                rows.len(),
                states.len()
            )));
        }
        if let Some(&bad) = states.iter().find(|&&s| s >= n_states) {
            return Err(RegimeError::Validation(format!(
                "state index {} out of range for {} states",
                bad, n_states
            )));
        }

        let stats: Vec<StateStatistics> = (0..n_states)
            .map(|state| {
                StateStatistics::from_rows(
                    rows.iter()
                        .zip(states)
                        .filter(|(_, s)| **s == state)
                        .map(|(row, _)| row),
                )
            })
            .collect();

        let mapping = RegimeLabelMapping::new(label_policy(n_states)(&stats))?;

        for (state, label) in mapping.iter() {
            tracing::info!(
                state,
                regime = %label,
                count = stats[state].count,
                mean_return = stats[state].mean_return,
                mean_volatility = stats[state].mean_volatility,
                "state labeled"
            );
        }

        Ok((stats, mapping))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegimeConfig;

    fn stats(returns: &[f64], vols: &[f64]) -> Vec<StateStatistics> {
        returns
            .iter()
            .zip(vols)
            .map(|(&mean_return, &mean_volatility)| StateStatistics {
                count: 10,
                mean_return,
                mean_volatility,
                ..Default::default()
            })
            .collect()
    }

    #[test]
    fn test_regime_display() {
        assert_eq!(format!("{}", Regime::Bull), "Bull");
        assert_eq!(format!("{}", Regime::LowVolatility), "Low_Volatility");
        assert_eq!(format!("{}", Regime::Ranked(3)), "Regime_3");
    }

    #[test]
    fn test_three_state_policy() {
        let labels = label_policy(3)(&stats(&[0.1, -0.1, 0.0], &[0.1, 0.3, 0.15]));
        assert_eq!(labels, vec![Regime::Bull, Regime::Bear, Regime::Sideways]);
    }

    #[test]
    fn test_four_state_policy_splits_middle_by_volatility() {
        let labels = label_policy(4)(&stats(&[0.02, -0.03, 0.01, 0.005], &[0.1, 0.4, 0.05, 0.3]));
        assert_eq!(
            labels,
            vec![
                Regime::Bull,
                Regime::Bear,
                Regime::LowVolatility,
                Regime::HighVolatility
            ]
        );
    }

    #[test]
    fn test_ties_keep_index_order() {
        let labels = label_policy(2)(&stats(&[0.0, 0.0], &[0.1, 0.2]));
        assert_eq!(labels, vec![Regime::Bear, Regime::Bull]);
    }

    #[test]
    fn test_default_policy_ranks() {
        let labels = label_policy(5)(&stats(&[0.3, 0.1, 0.5, 0.2, 0.4], &[0.0; 5]));
        assert_eq!(
            labels,
            vec![
                Regime::Ranked(2),
                Regime::Ranked(0),
                Regime::Ranked(4),
                Regime::Ranked(1),
                Regime::Ranked(3)
            ]
        );
    }

    #[test]
    fn test_state_statistics_small_groups() {
        let row = FeatureRow {
            date: chrono::NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            log_return: 0.01,
            volatility: 0.02,
            volatility_annualized: 0.3,
        };
        let single = StateStatistics::from_rows(std::iter::once(&row));
        assert_eq!(single.count, 1);
        assert_eq!(single.std_return, 0.0);
        assert_eq!(StateStatistics::from_rows(std::iter::empty()), StateStatistics::default());
    }

    #[test]
    fn test_mapping_rejects_duplicates() {
        assert!(RegimeLabelMapping::new(vec![Regime::Bull, Regime::Bull]).is_err());
    }

    #[test]
    fn test_mapping_serializes_as_index_map() {
        let mapping = RegimeLabelMapping::new(vec![Regime::Bull, Regime::Bear]).unwrap();
        let json = serde_json::to_string(&mapping).unwrap();
        assert_eq!(json, r#"{"0":"Bull","1":"Bear"}"#);
    }

    #[test]
    fn test_untrained_model_rejected() {
        let model = RegimeModel::new(2, &RegimeConfig::default());
        let err = RegimeLabeler::new().assign_labels(&model, &[], &[]).unwrap_err();
        assert!(matches!(err, RegimeError::NotTrained(_)));
    }
}

//! Ensemble of independent predictors and its quorum policy.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::domain::cache::CachedSeries;
use crate::domain::error::StockbotError;
use crate::domain::features::FeatureWindowBuilder;
use crate::domain::model::ModelKind;
use crate::domain::ohlcv::EarningsEvent;
use crate::ports::predictor_port::{FeatureShape, Predictor, PredictorBuilder};

/// How many members must produce a vote for the aggregate to count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuorumPolicy {
    Unanimous,
    #[default]
    Majority,
    AtLeast(usize),
}

impl QuorumPolicy {
    /// Votes needed out of `members`; never less than one.
    pub fn required(&self, members: usize) -> usize {
        let needed = match self {
            QuorumPolicy::Unanimous => members,
            QuorumPolicy::Majority => members / 2 + 1,
            QuorumPolicy::AtLeast(n) => (*n).min(members),
        };
        needed.max(1)
    }

    pub fn is_met(&self, available: usize, members: usize) -> bool {
        available >= self.required(members)
    }
}

impl fmt::Display for QuorumPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuorumPolicy::Unanimous => f.write_str("unanimous"),
            QuorumPolicy::Majority => f.write_str("majority"),
            QuorumPolicy::AtLeast(n) => write!(f, "{n}"),
        }
    }
}

impl FromStr for QuorumPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "unanimous" | "all" => Ok(QuorumPolicy::Unanimous),
            "majority" => Ok(QuorumPolicy::Majority),
            other => match other.parse::<usize>() {
                Ok(0) => Err("quorum must be at least 1".to_string()),
                Ok(n) => Ok(QuorumPolicy::AtLeast(n)),
                Err(_) => Err(format!(
                    "unknown quorum '{other}', expected unanimous, majority or a count"
                )),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub symbol: String,
    pub model: String,
    pub ratio: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemberFailure {
    pub model: String,
    pub reason: String,
}

/// One symbol's votes for one day.
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleOutcome {
    pub symbol: String,
    pub members: usize,
    pub predictions: Vec<PredictionResult>,
    pub failures: Vec<MemberFailure>,
}

impl EnsembleOutcome {
    pub fn ratios(&self) -> BTreeMap<String, f64> {
        self.predictions
            .iter()
            .map(|p| (p.model.clone(), p.ratio))
            .collect()
    }

    pub fn available(&self) -> usize {
        self.predictions.len()
    }

    /// Arithmetic mean of the available votes.
    pub fn aggregate(&self) -> Option<f64> {
        if self.predictions.is_empty() {
            return None;
        }
        let sum: f64 = self.predictions.iter().map(|p| p.ratio).sum();
        Some(sum / self.predictions.len() as f64)
    }

    pub fn meets(&self, quorum: &QuorumPolicy) -> bool {
        quorum.is_met(self.available(), self.members)
    }

    /// First vote that does not strictly exceed `threshold`.
    pub fn first_at_or_below(&self, threshold: f64) -> Option<&PredictionResult> {
        self.predictions.iter().find(|p| p.ratio <= threshold)
    }
}

pub struct PredictorEnsemble {
    members: Vec<Box<dyn Predictor>>,
}

impl PredictorEnsemble {
    pub fn new(members: Vec<Box<dyn Predictor>>) -> Result<Self, StockbotError> {
        let mut seen = HashSet::new();
        for member in &members {
            if !seen.insert(member.id().to_string()) {
                return Err(StockbotError::ConfigInvalid {
                    section: "models".into(),
                    key: "kinds".into(),
                    reason: format!("duplicate model id '{}'", member.id()),
                });
            }
        }
        Ok(Self { members })
    }

    /// One untrained member per kind, shaped for `rows`-long windows.
    pub fn from_builder(
        kinds: &[ModelKind],
        rows: usize,
        builder: &PredictorBuilder,
    ) -> Result<Self, StockbotError> {
        let members = kinds
            .iter()
            .map(|&kind| {
                let shape = FeatureShape {
                    rows,
                    channels: kind.required_keys().len(),
                };
                builder(kind, shape)
            })
            .collect();
        Self::new(members)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> &[Box<dyn Predictor>] {
        &self.members
    }

    pub fn members_mut(&mut self) -> &mut [Box<dyn Predictor>] {
        &mut self.members
    }

    /// Ask every member for a vote on `series` as of `as_of`.
    ///
    /// A member whose channels are unavailable or whose prediction fails
    /// loses its vote. A shape mismatch means the symbol's data is
    /// inconsistent and fails the whole evaluation.
    pub fn evaluate(
        &self,
        series: &CachedSeries,
        events: Option<&[EarningsEvent]>,
        windows: &FeatureWindowBuilder,
        as_of: NaiveDate,
    ) -> Result<EnsembleOutcome, StockbotError> {
        let symbol = series.symbol.as_str();
        let mut predictions = Vec::with_capacity(self.members.len());
        let mut failures = Vec::new();

        for member in &self.members {
            let model = member.id();
            let vote = windows
                .build(series, events, member.required_keys(), as_of)
                .and_then(|window| member.predict(&window))
                .and_then(|ratio| {
                    if ratio.is_finite() && ratio > 0.0 {
                        Ok(ratio)
                    } else {
                        Err(StockbotError::PredictorFailure {
                            model: model.to_string(),
                            reason: format!("non-positive or non-finite ratio {ratio}"),
                        })
                    }
                });

            match vote {
                Ok(ratio) => {
                    debug!(symbol, model, ratio, "vote");
                    predictions.push(PredictionResult {
                        symbol: symbol.to_string(),
                        model: model.to_string(),
                        ratio,
                    });
                }
                Err(e @ StockbotError::ShapeMismatch { .. }) => return Err(e),
                Err(e) => {
                    warn!(symbol, model, error = %e, "member vote excluded");
                    failures.push(MemberFailure {
                        model: model.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(EnsembleOutcome {
            symbol: symbol.to_string(),
            members: self.members.len(),
            predictions,
            failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aligner::SameDayPolicy;
    use crate::domain::cache::CacheMode;
    use crate::domain::features::FeatureWindow;
    use crate::domain::ohlcv::OhlcvBar;
    use chrono::Duration;
    use std::path::Path;

    struct Fixed {
        id: String,
        kind: ModelKind,
        ratio: Result<f64, String>,
    }

    impl Predictor for Fixed {
        fn id(&self) -> &str {
            &self.id
        }
        fn kind(&self) -> ModelKind {
            self.kind
        }
        fn predict(&self, _window: &FeatureWindow) -> Result<f64, StockbotError> {
            self.ratio.clone().map_err(|reason| StockbotError::PredictorFailure {
                model: self.id.clone(),
                reason,
            })
        }
        fn train(&mut self, _w: &[FeatureWindow], _l: &[f64]) -> Result<(), StockbotError> {
            Ok(())
        }
        fn save(&self, _path: &Path) -> Result<(), StockbotError> {
            Ok(())
        }
        fn load(&mut self, _path: &Path) -> Result<(), StockbotError> {
            Ok(())
        }
    }

    fn member(id: &str, kind: ModelKind, ratio: Result<f64, &str>) -> Box<dyn Predictor> {
        Box::new(Fixed {
            id: id.to_string(),
            kind,
            ratio: ratio.map_err(str::to_string),
        })
    }

    fn series(n: usize) -> CachedSeries {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let bars: Vec<OhlcvBar> = (0..n)
            .map(|i| OhlcvBar {
                symbol: "A".into(),
                date: start + Duration::days(i as i64),
                open: 1.0,
                high: 1.0,
                low: 1.0,
                close: 1.0 + i as f64,
                volume: 10,
            })
            .collect();
        CachedSeries::from_bars("A", CacheMode::Offline, &bars)
    }

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 10).unwrap()
    }

    #[test]
    fn quorum_thresholds() {
        assert_eq!(QuorumPolicy::Unanimous.required(3), 3);
        assert_eq!(QuorumPolicy::Majority.required(3), 2);
        assert_eq!(QuorumPolicy::Majority.required(4), 3);
        assert_eq!(QuorumPolicy::AtLeast(5).required(3), 3);
        assert_eq!(QuorumPolicy::AtLeast(1).required(0), 1);
        assert!(!QuorumPolicy::Majority.is_met(0, 0));
    }

    #[test]
    fn quorum_parses() {
        assert_eq!("Majority".parse::<QuorumPolicy>(), Ok(QuorumPolicy::Majority));
        assert_eq!("unanimous".parse::<QuorumPolicy>(), Ok(QuorumPolicy::Unanimous));
        assert_eq!("2".parse::<QuorumPolicy>(), Ok(QuorumPolicy::AtLeast(2)));
        assert!("0".parse::<QuorumPolicy>().is_err());
        assert!("most".parse::<QuorumPolicy>().is_err());
    }

    #[test]
    fn aggregate_is_mean_of_votes() {
        let ensemble = PredictorEnsemble::new(vec![
            member("a", ModelKind::DayTrade, Ok(1.03)),
            member("b", ModelKind::Rsi, Ok(1.05)),
        ])
        .unwrap();
        let windows = FeatureWindowBuilder::new(5, SameDayPolicy::Sum);
        let out = ensemble.evaluate(&series(20), None, &windows, as_of()).unwrap();
        assert_eq!(out.available(), 2);
        assert!((out.aggregate().unwrap() - 1.04).abs() < 1e-12);
        assert_eq!(out.ratios().len(), 2);
    }

    #[test]
    fn failed_member_loses_only_its_vote() {
        let ensemble = PredictorEnsemble::new(vec![
            member("a", ModelKind::DayTrade, Ok(1.03)),
            member("b", ModelKind::Rsi, Err("boom")),
            member("c", ModelKind::Earnings, Ok(2.0)),
        ])
        .unwrap();
        let windows = FeatureWindowBuilder::new(5, SameDayPolicy::Sum);
        // no earnings source: member c cannot build its window
        let out = ensemble.evaluate(&series(20), None, &windows, as_of()).unwrap();
        assert_eq!(out.available(), 1);
        assert_eq!(out.failures.len(), 2);
        assert_eq!(out.aggregate(), Some(1.03));
        assert!(!out.meets(&QuorumPolicy::Majority));
        assert!(out.meets(&QuorumPolicy::AtLeast(1)));
    }

    #[test]
    fn non_positive_ratio_is_a_failure() {
        let ensemble =
            PredictorEnsemble::new(vec![member("a", ModelKind::DayTrade, Ok(f64::NAN))]).unwrap();
        let windows = FeatureWindowBuilder::new(5, SameDayPolicy::Sum);
        let out = ensemble.evaluate(&series(20), None, &windows, as_of()).unwrap();
        assert_eq!(out.available(), 0);
        assert_eq!(out.aggregate(), None);
    }

    #[test]
    fn shape_mismatch_fails_symbol() {
        let ensemble =
            PredictorEnsemble::new(vec![member("a", ModelKind::DayTrade, Ok(1.1))]).unwrap();
        let windows = FeatureWindowBuilder::new(60, SameDayPolicy::Sum);
        let err = ensemble
            .evaluate(&series(20), None, &windows, as_of())
            .unwrap_err();
        assert!(matches!(err, StockbotError::ShapeMismatch { .. }));
    }

    #[test]
    fn duplicate_ids_rejected() {
        let result = PredictorEnsemble::new(vec![
            member("a", ModelKind::DayTrade, Ok(1.0)),
            member("a", ModelKind::Rsi, Ok(1.0)),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn first_at_or_below_finds_weak_vote() {
        let out = EnsembleOutcome {
            symbol: "B".into(),
            members: 2,
            predictions: vec![
                PredictionResult {
                    symbol: "B".into(),
                    model: "x".into(),
                    ratio: 1.00,
                },
                PredictionResult {
                    symbol: "B".into(),
                    model: "y".into(),
                    ratio: 1.06,
                },
            ],
            failures: vec![],
        };
        assert_eq!(out.first_at_or_below(1.02).unwrap().model, "x");
        assert!(out.first_at_or_below(0.99).is_none());
    }
}

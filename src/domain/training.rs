//! Supervised examples from cached history.
//!
//! Each example is the window ending on day t, labelled with the realised
//! ratio close[t+1] / close[t].

use tracing::{info, warn};

use crate::domain::cache::CachedSeries;
use crate::domain::error::StockbotError;
use crate::domain::features::{FeatureWindow, FeatureWindowBuilder};
use crate::domain::indicator::IndicatorKey;
use crate::domain::ohlcv::EarningsEvent;
use crate::ports::predictor_port::Predictor;

#[derive(Debug, Clone, Default)]
pub struct TrainingSet {
    pub windows: Vec<FeatureWindow>,
    pub labels: Vec<f64>,
}

impl TrainingSet {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn extend(&mut self, other: TrainingSet) {
        self.windows.extend(other.windows);
        self.labels.extend(other.labels);
    }
}

/// Every full window in `series` that has a next-day close.
pub fn build_training_set(
    series: &CachedSeries,
    events: Option<&[EarningsEvent]>,
    keys: &[IndicatorKey],
    windows: &FeatureWindowBuilder,
) -> Result<TrainingSet, StockbotError> {
    let close = series.channel(IndicatorKey::Close).ok_or_else(|| {
        StockbotError::data_unavailable(&series.symbol, IndicatorKey::Close, "channel not cached")
    })?;

    let mut set = TrainingSet::default();
    if windows.window_len == 0 || series.len() <= windows.window_len {
        return Ok(set);
    }

    for t in (windows.window_len - 1)..(series.len() - 1) {
        if close[t] <= 0.0 {
            continue;
        }
        let window = windows.build(series, events, keys, series.dates[t])?;
        set.windows.push(window);
        set.labels.push(close[t + 1] / close[t]);
    }
    Ok(set)
}

/// Pool examples across symbols for one predictor and fit it.
/// Symbols whose windows cannot be built are skipped.
pub fn train_predictor(
    predictor: &mut dyn Predictor,
    histories: &[(&CachedSeries, Option<&[EarningsEvent]>)],
    windows: &FeatureWindowBuilder,
) -> Result<usize, StockbotError> {
    let keys = predictor.required_keys().to_vec();
    let mut pooled = TrainingSet::default();
    for (series, events) in histories {
        match build_training_set(series, *events, &keys, windows) {
            Ok(set) => pooled.extend(set),
            Err(e) => warn!(symbol = %series.symbol, model = predictor.id(), error = %e, "skipped for training"),
        }
    }
    if pooled.is_empty() {
        return Err(StockbotError::PredictorFailure {
            model: predictor.id().to_string(),
            reason: "no training examples".into(),
        });
    }
    predictor.train(&pooled.windows, &pooled.labels)?;
    info!(model = predictor.id(), examples = pooled.len(), "trained");
    Ok(pooled.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aligner::SameDayPolicy;
    use crate::domain::cache::CacheMode;
    use crate::domain::ohlcv::OhlcvBar;
    use chrono::{Duration, NaiveDate};

    fn series(closes: &[f64]) -> CachedSeries {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let bars: Vec<OhlcvBar> = closes
            .iter()
            .enumerate()
            .map(|(i, c)| OhlcvBar {
                symbol: "A".into(),
                date: start + Duration::days(i as i64),
                open: *c,
                high: *c,
                low: *c,
                close: *c,
                volume: 100,
            })
            .collect();
        CachedSeries::from_bars("A", CacheMode::Offline, &bars)
    }

    #[test]
    fn labels_are_next_day_ratios() {
        let s = series(&[10.0, 11.0, 12.0, 9.0, 9.0]);
        let windows = FeatureWindowBuilder::new(2, SameDayPolicy::Sum);
        let set = build_training_set(&s, None, &[IndicatorKey::Close], &windows).unwrap();
        assert_eq!(set.len(), 3);
        assert!((set.labels[0] - 12.0 / 11.0).abs() < 1e-12);
        assert!((set.labels[1] - 0.75).abs() < 1e-12);
        assert!((set.labels[2] - 1.0).abs() < 1e-12);
        assert_eq!(set.windows[0].channel(IndicatorKey::Close).unwrap(), &[10.0, 11.0]);
    }

    #[test]
    fn short_history_gives_no_examples() {
        let s = series(&[10.0, 11.0]);
        let windows = FeatureWindowBuilder::new(5, SameDayPolicy::Sum);
        let set = build_training_set(&s, None, &[IndicatorKey::Close], &windows).unwrap();
        assert!(set.is_empty());
    }
}

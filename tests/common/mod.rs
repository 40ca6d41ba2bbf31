#![allow(dead_code)]

use chrono::{Datelike, NaiveDate, Weekday};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use stockbot::domain::error::StockbotError;
use stockbot::domain::features::FeatureWindow;
use stockbot::domain::model::ModelKind;
pub use stockbot::domain::ohlcv::{EarningsEvent, OhlcvBar};
use stockbot::ports::data_port::{EarningsPort, MarketDataPort};
use stockbot::ports::predictor_port::Predictor;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn make_bar(symbol: &str, date: NaiveDate, close: f64) -> OhlcvBar {
    OhlcvBar {
        symbol: symbol.to_string(),
        date,
        open: close,
        high: close * 1.01,
        low: close * 0.99,
        close,
        volume: 1_000_000,
    }
}

/// `n` weekday bars starting on or after `start`, priced by `close(i)`.
pub fn weekday_bars(
    symbol: &str,
    start: NaiveDate,
    n: usize,
    close: impl Fn(usize) -> f64,
) -> Vec<OhlcvBar> {
    start
        .iter_days()
        .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
        .take(n)
        .enumerate()
        .map(|(i, d)| make_bar(symbol, d, close(i)))
        .collect()
}

pub struct MockMarketData {
    pub data: HashMap<String, Vec<OhlcvBar>>,
    pub errors: HashMap<String, String>,
    pub calls: AtomicUsize,
}

impl MockMarketData {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            errors: HashMap::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_bars(mut self, symbol: &str, bars: Vec<OhlcvBar>) -> Self {
        self.data.insert(symbol.to_string(), bars);
        self
    }

    pub fn with_error(mut self, symbol: &str, reason: &str) -> Self {
        self.errors.insert(symbol.to_string(), reason.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MarketDataPort for MockMarketData {
    fn fetch_daily(
        &self,
        symbol: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<OhlcvBar>, StockbotError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.errors.get(symbol) {
            return Err(StockbotError::data_unavailable(symbol, "close", reason));
        }
        Ok(self
            .data
            .get(symbol)
            .map(|bars| {
                bars.iter()
                    .filter(|b| b.date >= start_date && b.date <= end_date)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn list_symbols(&self) -> Result<Vec<String>, StockbotError> {
        let mut symbols: Vec<String> = self.data.keys().cloned().collect();
        symbols.sort();
        Ok(symbols)
    }
}

#[derive(Default)]
pub struct MockEarnings {
    pub events: HashMap<String, Vec<EarningsEvent>>,
}

impl EarningsPort for MockEarnings {
    fn fetch_earnings(&self, symbol: &str) -> Result<Vec<EarningsEvent>, StockbotError> {
        Ok(self.events.get(symbol).cloned().unwrap_or_default())
    }
}

/// Votes a fixed ratio per symbol, optionally overridden per date.
/// Symbols with no script fail the prediction.
pub struct ScriptedPredictor {
    pub id: String,
    pub ratios: HashMap<String, f64>,
    pub by_date: HashMap<(String, NaiveDate), f64>,
}

impl ScriptedPredictor {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ratios: HashMap::new(),
            by_date: HashMap::new(),
        }
    }

    pub fn vote(mut self, symbol: &str, ratio: f64) -> Self {
        self.ratios.insert(symbol.to_string(), ratio);
        self
    }

    pub fn vote_on(mut self, symbol: &str, date: NaiveDate, ratio: f64) -> Self {
        self.by_date.insert((symbol.to_string(), date), ratio);
        self
    }

    pub fn boxed(self) -> Box<dyn Predictor> {
        Box::new(self)
    }
}

impl Predictor for ScriptedPredictor {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ModelKind {
        ModelKind::DayTrade
    }

    fn predict(&self, window: &FeatureWindow) -> Result<f64, StockbotError> {
        self.by_date
            .get(&(window.symbol.clone(), window.as_of))
            .or_else(|| self.ratios.get(&window.symbol))
            .copied()
            .ok_or_else(|| StockbotError::PredictorFailure {
                model: self.id.clone(),
                reason: format!("no vote scripted for {}", window.symbol),
            })
    }

    fn train(&mut self, _windows: &[FeatureWindow], _labels: &[f64]) -> Result<(), StockbotError> {
        Ok(())
    }

    fn save(&self, _path: &Path) -> Result<(), StockbotError> {
        Ok(())
    }

    fn load(&mut self, _path: &Path) -> Result<(), StockbotError> {
        Ok(())
    }
}

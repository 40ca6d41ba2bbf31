//! Fixed-length multi-channel model input.

use chrono::NaiveDate;

use crate::domain::aligner::{DateWindow, SameDayPolicy, align_events};
use crate::domain::cache::CachedSeries;
use crate::domain::error::StockbotError;
use crate::domain::indicator::IndicatorKey;
use crate::domain::ohlcv::EarningsEvent;

/// Channels stacked in the order they were requested, each exactly
/// `len` rows long, oldest row first.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureWindow {
    pub symbol: String,
    pub as_of: NaiveDate,
    pub dates: Vec<NaiveDate>,
    pub keys: Vec<IndicatorKey>,
    channels: Vec<Vec<f64>>,
}

impl FeatureWindow {
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn width(&self) -> usize {
        self.keys.len()
    }

    pub fn channel(&self, key: IndicatorKey) -> Option<&[f64]> {
        self.keys
            .iter()
            .position(|k| *k == key)
            .map(|i| self.channels[i].as_slice())
    }

    /// Values of every channel at row `i`, in key order.
    pub fn row(&self, i: usize) -> Vec<f64> {
        self.channels.iter().map(|c| c[i]).collect()
    }

    pub fn last_row(&self) -> Vec<f64> {
        match self.len() {
            0 => vec![],
            n => self.row(n - 1),
        }
    }

    pub fn last_close(&self) -> Option<f64> {
        self.channel(IndicatorKey::Close)?.last().copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureWindowBuilder {
    pub window_len: usize,
    pub same_day_policy: SameDayPolicy,
}

impl FeatureWindowBuilder {
    pub fn new(window_len: usize, same_day_policy: SameDayPolicy) -> Self {
        Self {
            window_len,
            same_day_policy,
        }
    }

    /// Stack `keys` for the window ending at `as_of`.
    ///
    /// `events` is `None` when the earnings source failed; only a request
    /// for the earnings channel is affected. Any channel whose length is
    /// not `window_len` fails the whole window with `ShapeMismatch`.
    pub fn build(
        &self,
        series: &CachedSeries,
        events: Option<&[EarningsEvent]>,
        keys: &[IndicatorKey],
        as_of: NaiveDate,
    ) -> Result<FeatureWindow, StockbotError> {
        let symbol = series.symbol.as_str();
        let dates = series.window_dates(as_of, self.window_len);
        if dates.is_empty() {
            return Err(StockbotError::data_unavailable(
                symbol,
                "dates",
                format!("no cached rows on or before {as_of}"),
            ));
        }
        self.check_len(symbol, "dates", dates.len())?;

        let mut channels = Vec::with_capacity(keys.len());
        for &key in keys {
            let values = if key.is_event_aligned() {
                let events = events.ok_or_else(|| {
                    StockbotError::data_unavailable(symbol, key, "earnings source unavailable")
                })?;
                align_events(&DateWindow::from_dates(dates), events, self.same_day_policy).values
            } else {
                series.window(key, as_of, self.window_len)?.to_vec()
            };
            self.check_len(symbol, key, values.len())?;
            channels.push(values);
        }

        Ok(FeatureWindow {
            symbol: symbol.to_string(),
            as_of,
            dates: dates.to_vec(),
            keys: keys.to_vec(),
            channels,
        })
    }

    fn check_len(&self, symbol: &str, key: impl ToString, actual: usize) -> Result<(), StockbotError> {
        if actual != self.window_len {
            return Err(StockbotError::ShapeMismatch {
                symbol: symbol.to_string(),
                key: key.to_string(),
                expected: self.window_len,
                actual,
            });
        }
        Ok(())
    }
}

//! Per-symbol indicator cache with offline (fixed) and online (rolling) modes.
//!
//! A `CachedSeries` carries its mode tag so callers read windows the same
//! way regardless of how the rows got there. Offline series are loaded once
//! and never change; online series roll forward one row per new trading day
//! and keep a constant length.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::domain::error::StockbotError;
use crate::domain::indicator::{IndicatorKey, derive_channels};
use crate::domain::ohlcv::OhlcvBar;
use crate::ports::data_port::MarketDataPort;
use crate::ports::store_port::CacheStore;

pub const DEFAULT_CACHE_LEN: usize = 280;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    Offline,
    Online,
}

impl CacheMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheMode::Offline => "offline",
            CacheMode::Online => "online",
        }
    }
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "offline" => Ok(CacheMode::Offline),
            "online" => Ok(CacheMode::Online),
            other => Err(format!("unknown cache mode '{other}', expected online or offline")),
        }
    }
}

/// Rows of every price-derived channel for one symbol, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSeries {
    pub symbol: String,
    pub mode: CacheMode,
    pub dates: Vec<NaiveDate>,
    pub channels: BTreeMap<IndicatorKey, Vec<f64>>,
    /// Requested history range an offline series was fetched for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<(NaiveDate, NaiveDate)>,
}

impl CachedSeries {
    /// Build from raw bars; bars are sorted and duplicate dates dropped.
    pub fn from_bars(symbol: &str, mode: CacheMode, bars: &[OhlcvBar]) -> Self {
        let rows = normalize_bars(bars);
        let close: Vec<f64> = rows.iter().map(|b| b.close).collect();
        let volume: Vec<f64> = rows.iter().map(|b| b.volume as f64).collect();
        Self {
            symbol: symbol.to_string(),
            mode,
            dates: rows.iter().map(|b| b.date).collect(),
            channels: derive_channels(&close, &volume),
            range: None,
        }
    }

    /// Tag the series with the range it was requested for.
    pub fn with_range(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.range = Some((start, end));
        self
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.dates.first().copied()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    pub fn channel(&self, key: IndicatorKey) -> Option<&[f64]> {
        self.channels.get(&key).map(Vec::as_slice)
    }

    fn rows_through(&self, as_of: NaiveDate) -> usize {
        self.dates.partition_point(|d| *d <= as_of)
    }

    /// Up to `len` trailing values of `key` ending at the last row on or
    /// before `as_of`. Shorter than `len` when history runs out.
    pub fn window(
        &self,
        key: IndicatorKey,
        as_of: NaiveDate,
        len: usize,
    ) -> Result<&[f64], StockbotError> {
        let values = self.channel(key).ok_or_else(|| {
            StockbotError::data_unavailable(&self.symbol, key, "channel not cached")
        })?;
        let end = self.rows_through(as_of);
        if end == 0 {
            return Err(StockbotError::data_unavailable(
                &self.symbol,
                key,
                format!("no rows on or before {as_of}"),
            ));
        }
        values
            .get(end.saturating_sub(len)..end)
            .ok_or_else(|| StockbotError::ShapeMismatch {
                symbol: self.symbol.clone(),
                key: key.to_string(),
                expected: self.dates.len(),
                actual: values.len(),
            })
    }

    pub fn window_dates(&self, as_of: NaiveDate, len: usize) -> &[NaiveDate] {
        let end = self.rows_through(as_of);
        &self.dates[end.saturating_sub(len)..end]
    }

    /// Latest close on or before `as_of`.
    pub fn close_on_or_before(&self, as_of: NaiveDate) -> Option<(NaiveDate, f64)> {
        let end = self.rows_through(as_of);
        if end == 0 {
            return None;
        }
        let close = self.channel(IndicatorKey::Close)?.get(end - 1)?;
        Some((self.dates[end - 1], *close))
    }

    /// Append a bar newer than the last row and evict the oldest row.
    ///
    /// Returns `false` for a bar that is not newer. Derived channels are
    /// recomputed over the rolled rows.
    pub fn roll(&mut self, bar: &OhlcvBar) -> Result<bool, StockbotError> {
        if self.mode == CacheMode::Offline {
            return Err(StockbotError::Storage {
                reason: format!("offline series for {} is immutable", self.symbol),
            });
        }
        if self.last_date().is_some_and(|last| bar.date <= last) {
            return Ok(false);
        }

        let mut close = self.channel(IndicatorKey::Close).unwrap_or_default().to_vec();
        let mut volume = self.channel(IndicatorKey::Volume).unwrap_or_default().to_vec();

        if !self.dates.is_empty() {
            self.dates.remove(0);
            close.remove(0);
            volume.remove(0);
        }
        self.dates.push(bar.date);
        close.push(bar.close);
        volume.push(bar.volume as f64);

        self.channels = derive_channels(&close, &volume);
        Ok(true)
    }

    /// Structural check applied to anything read back from storage.
    pub fn validate(&self, expected_len: Option<usize>) -> Result<(), String> {
        if self.dates.windows(2).any(|w| w[0] >= w[1]) {
            return Err("dates are not strictly ascending".into());
        }
        if let Some(expected) = expected_len {
            if self.dates.len() != expected {
                return Err(format!("{} rows, expected {expected}", self.dates.len()));
            }
        }
        for key in IndicatorKey::ALL.iter().filter(|k| !k.is_event_aligned()) {
            let values = self
                .channels
                .get(key)
                .ok_or_else(|| format!("missing channel {key}"))?;
            if values.len() != self.dates.len() {
                return Err(format!(
                    "channel {key} has {} values for {} dates",
                    values.len(),
                    self.dates.len()
                ));
            }
            if values.iter().any(|v| !v.is_finite()) {
                return Err(format!("channel {key} holds non-finite values"));
            }
        }
        Ok(())
    }
}

fn normalize_bars(bars: &[OhlcvBar]) -> Vec<OhlcvBar> {
    let mut rows = bars.to_vec();
    rows.sort_by_key(|b| b.date);
    rows.dedup_by_key(|b| b.date);
    rows
}

/// Persisted form of a series: the series plus a checksum of its encoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheRecord {
    pub checksum: String,
    pub series: CachedSeries,
}

impl CacheRecord {
    pub fn seal(series: &CachedSeries) -> Result<Self, StockbotError> {
        Ok(Self {
            checksum: series_checksum(series)?,
            series: series.clone(),
        })
    }

    /// Verify the checksum and structure, yielding the trusted series.
    pub fn open(self) -> Result<CachedSeries, StockbotError> {
        let corrupt = |reason: String| StockbotError::CacheCorruption {
            symbol: self.series.symbol.clone(),
            reason,
        };
        let actual = series_checksum(&self.series)?;
        if actual != self.checksum {
            return Err(corrupt(format!(
                "checksum mismatch: stored {}, computed {actual}",
                self.checksum
            )));
        }
        self.series.validate(None).map_err(corrupt)?;
        Ok(self.series)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, StockbotError> {
        serde_json::to_vec(self).map_err(|e| StockbotError::Storage {
            reason: format!("failed to encode cache record: {e}"),
        })
    }

    /// Decode and verify; any failure is `CacheCorruption` for `symbol`.
    pub fn from_json(symbol: &str, bytes: &[u8]) -> Result<CachedSeries, StockbotError> {
        let record: CacheRecord =
            serde_json::from_slice(bytes).map_err(|e| StockbotError::CacheCorruption {
                symbol: symbol.to_string(),
                reason: format!("undecodable record: {e}"),
            })?;
        record.open()
    }
}

fn series_checksum(series: &CachedSeries) -> Result<String, StockbotError> {
    let body = serde_json::to_vec(series).map_err(|e| StockbotError::Storage {
        reason: format!("failed to encode series {}: {e}", series.symbol),
    })?;
    Ok(blake3::hash(&body).to_hex().to_string())
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheSettings {
    /// Constant length of online series.
    pub capacity: usize,
    /// Fixed history range loaded for offline series.
    pub offline_start: NaiveDate,
    pub offline_end: NaiveDate,
}

/// Shared, thread-safe front of the cache. Entries are handed out as
/// `Arc`s so concurrent readers never copy a series.
pub struct DataCache<'a> {
    provider: &'a (dyn MarketDataPort + Sync),
    store: Option<&'a (dyn CacheStore + Sync)>,
    settings: CacheSettings,
    entries: Mutex<HashMap<(String, CacheMode), Arc<CachedSeries>>>,
}

impl<'a> DataCache<'a> {
    pub fn new(provider: &'a (dyn MarketDataPort + Sync), settings: CacheSettings) -> Self {
        Self {
            provider,
            store: None,
            settings,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_store(mut self, store: &'a (dyn CacheStore + Sync)) -> Self {
        self.store = Some(store);
        self
    }

    /// Series for `symbol` holding `key`, current through `as_of`.
    ///
    /// Online: rolls an existing series forward, or cold-loads the last
    /// `capacity` rows. Offline: loads the configured range once; later
    /// calls return the same series.
    pub fn get_or_fetch(
        &self,
        symbol: &str,
        key: IndicatorKey,
        mode: CacheMode,
        as_of: NaiveDate,
    ) -> Result<Arc<CachedSeries>, StockbotError> {
        let series = match mode {
            CacheMode::Offline => self.offline(symbol)?,
            CacheMode::Online => self.online(symbol, as_of)?,
        };
        if series.channel(key).is_none() {
            return Err(StockbotError::data_unavailable(
                symbol,
                key,
                "channel not held by the price cache",
            ));
        }
        Ok(series)
    }

    fn cached(&self, symbol: &str, mode: CacheMode) -> Option<Arc<CachedSeries>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(&(symbol.to_string(), mode)).cloned()
    }

    fn remember(&self, series: CachedSeries) -> Arc<CachedSeries> {
        let series = Arc::new(series);
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert((series.symbol.clone(), series.mode), Arc::clone(&series));
        series
    }

    fn offline(&self, symbol: &str) -> Result<Arc<CachedSeries>, StockbotError> {
        if let Some(hit) = self.cached(symbol, CacheMode::Offline) {
            debug!(symbol, "offline cache hit");
            return Ok(hit);
        }

        let (start, end) = (self.settings.offline_start, self.settings.offline_end);
        let series = match self
            .load_persisted(symbol, CacheMode::Offline, None)
            .filter(|s| s.range == Some((start, end)))
        {
            Some(series) => series,
            None => {
                let bars = self.fetch(symbol, start, end)?;
                if bars.is_empty() {
                    return Err(StockbotError::data_unavailable(
                        symbol,
                        IndicatorKey::Close,
                        format!("no bars between {start} and {end}"),
                    ));
                }
                let series = CachedSeries::from_bars(symbol, CacheMode::Offline, &bars)
                    .with_range(start, end);
                debug!(symbol, rows = series.len(), "offline series loaded");
                self.persist(&series);
                series
            }
        };
        Ok(self.remember(series))
    }

    fn online(&self, symbol: &str, as_of: NaiveDate) -> Result<Arc<CachedSeries>, StockbotError> {
        let capacity = self.settings.capacity;
        let current = match self.cached(symbol, CacheMode::Online) {
            Some(hit) if hit.last_date().is_some_and(|d| d >= as_of) => {
                debug!(symbol, "online cache current");
                return Ok(hit);
            }
            Some(hit) => Some((*hit).clone()),
            None => self.load_persisted(symbol, CacheMode::Online, Some(capacity)),
        };

        let series = match current {
            Some(mut series) => {
                if self.roll_forward(&mut series, as_of)? > 0 {
                    self.persist(&series);
                }
                series
            }
            None => {
                let series = self.cold_start(symbol, as_of)?;
                self.persist(&series);
                series
            }
        };
        Ok(self.remember(series))
    }

    fn roll_forward(
        &self,
        series: &mut CachedSeries,
        as_of: NaiveDate,
    ) -> Result<usize, StockbotError> {
        let Some(start) = series.last_date().and_then(|d| d.succ_opt()) else {
            return Ok(0);
        };
        if start > as_of {
            return Ok(0);
        }
        let bars = normalize_bars(&self.fetch(&series.symbol, start, as_of)?);
        let mut rolled = 0;
        for bar in &bars {
            if series.roll(bar)? {
                rolled += 1;
            }
        }
        debug!(symbol = %series.symbol, rolled, "online cache rolled");
        Ok(rolled)
    }

    fn cold_start(&self, symbol: &str, as_of: NaiveDate) -> Result<CachedSeries, StockbotError> {
        let capacity = self.settings.capacity;
        let lookback = Duration::days(capacity as i64 * 2);
        let bars = normalize_bars(&self.fetch(symbol, as_of - lookback, as_of)?);
        if bars.len() < capacity {
            return Err(StockbotError::data_unavailable(
                symbol,
                IndicatorKey::Close,
                format!("need {capacity} rows, provider returned {}", bars.len()),
            ));
        }
        let series = CachedSeries::from_bars(
            symbol,
            CacheMode::Online,
            &bars[bars.len() - capacity..],
        );
        debug!(symbol, rows = series.len(), "online series cold-loaded");
        Ok(series)
    }

    fn fetch(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<OhlcvBar>, StockbotError> {
        self.provider
            .fetch_daily(symbol, start, end)
            .map_err(|e| match e {
                StockbotError::DataUnavailable { .. } => e,
                other => StockbotError::data_unavailable(symbol, IndicatorKey::Close, other),
            })
    }

    fn load_persisted(
        &self,
        symbol: &str,
        mode: CacheMode,
        expected_len: Option<usize>,
    ) -> Option<CachedSeries> {
        let store = self.store?;
        match store.load_series(symbol, mode) {
            Ok(Some(series)) => match series.validate(expected_len) {
                Ok(()) => {
                    debug!(symbol, %mode, rows = series.len(), "cache record restored");
                    Some(series)
                }
                Err(reason) => {
                    warn!(symbol, %mode, %reason, "cache record rejected, refetching");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(symbol, %mode, error = %e, "cache record unreadable, refetching");
                None
            }
        }
    }

    fn persist(&self, series: &CachedSeries) {
        if let Some(store) = self.store {
            if let Err(e) = store.save_series(series) {
                warn!(symbol = %series.symbol, error = %e, "failed to persist cache record");
            }
        }
    }
}

//! Indicator channels derived from daily closes and volumes.
//!
//! Every channel is dense: one finite value per input row, no warmup gaps.
//! Rolling windows use a minimum period of one, exponential averages are
//! seeded with the first observation, so a channel computed over `n` rows
//! always has exactly `n` values.
//!
//! - `IndicatorKey`: channel identity, used as the cache map key
//! - `derive_channels`: recompute every derived channel from raw rows

pub mod ema;
pub mod macd;
pub mod momentum;
pub mod rsi;
pub mod volatility;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub use ema::{calculate_ema, crossover_flips};
pub use macd::{MacdChannels, calculate_macd};
pub use momentum::{calculate_change, calculate_momentum, calculate_momentum_oscillator, calculate_trama};
pub use rsi::calculate_rsi;
pub use volatility::{bollinger_middle, liquidity_spikes};

pub const MOMENTUM_WINDOW: usize = 10;
pub const RSI_PERIOD: usize = 14;
pub const TRAMA_PERIOD: usize = 14;
pub const BOLLINGER_PERIOD: usize = 20;
pub const LIQUIDITY_WINDOW: usize = 20;
pub const LIQUIDITY_Z_THRESHOLD: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum IndicatorKey {
    Close,
    Volume,
    Ema12,
    Ema26,
    Ema200,
    Macd,
    SignalLine,
    Histogram,
    Change,
    Momentum,
    Rsi,
    Trama,
    EmaFlips,
    SignalFlips,
    LiquiditySpike,
    MomentumOscillator,
    BollingerMiddle,
    EarningsDiff,
}

impl IndicatorKey {
    pub const ALL: [IndicatorKey; 18] = [
        IndicatorKey::Close,
        IndicatorKey::Volume,
        IndicatorKey::Ema12,
        IndicatorKey::Ema26,
        IndicatorKey::Ema200,
        IndicatorKey::Macd,
        IndicatorKey::SignalLine,
        IndicatorKey::Histogram,
        IndicatorKey::Change,
        IndicatorKey::Momentum,
        IndicatorKey::Rsi,
        IndicatorKey::Trama,
        IndicatorKey::EmaFlips,
        IndicatorKey::SignalFlips,
        IndicatorKey::LiquiditySpike,
        IndicatorKey::MomentumOscillator,
        IndicatorKey::BollingerMiddle,
        IndicatorKey::EarningsDiff,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorKey::Close => "close",
            IndicatorKey::Volume => "volume",
            IndicatorKey::Ema12 => "ema_12",
            IndicatorKey::Ema26 => "ema_26",
            IndicatorKey::Ema200 => "ema_200",
            IndicatorKey::Macd => "macd",
            IndicatorKey::SignalLine => "signal_line",
            IndicatorKey::Histogram => "histogram",
            IndicatorKey::Change => "change",
            IndicatorKey::Momentum => "momentum",
            IndicatorKey::Rsi => "rsi",
            IndicatorKey::Trama => "trama",
            IndicatorKey::EmaFlips => "ema_flips",
            IndicatorKey::SignalFlips => "signal_flips",
            IndicatorKey::LiquiditySpike => "liquidity_spike",
            IndicatorKey::MomentumOscillator => "momentum_oscillator",
            IndicatorKey::BollingerMiddle => "bollinger_middle",
            IndicatorKey::EarningsDiff => "earnings_diff",
        }
    }

    /// Earnings come from the event aligner, not from the price cache.
    pub fn is_event_aligned(&self) -> bool {
        matches!(self, IndicatorKey::EarningsDiff)
    }
}

impl fmt::Display for IndicatorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown indicator key: {0}")]
pub struct UnknownIndicator(pub String);

impl FromStr for IndicatorKey {
    type Err = UnknownIndicator;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        IndicatorKey::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == wanted)
            .ok_or(UnknownIndicator(s.to_string()))
    }
}

impl TryFrom<String> for IndicatorKey {
    type Error = UnknownIndicator;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<IndicatorKey> for String {
    fn from(key: IndicatorKey) -> Self {
        key.as_str().to_string()
    }
}

/// Mean over the trailing `window` values, shrinking at the start.
pub fn rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    rolling_sum(values, window)
        .into_iter()
        .enumerate()
        .map(|(i, sum)| sum / (i + 1).min(window) as f64)
        .collect()
}

/// Sum over the trailing `window` values, shrinking at the start.
pub fn rolling_sum(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    let mut out = Vec::with_capacity(values.len());
    let mut sum = 0.0;
    for (i, v) in values.iter().enumerate() {
        sum += v;
        if i >= window {
            sum -= values[i - window];
        }
        out.push(sum);
    }
    out
}

/// Population standard deviation over the trailing `window` values.
pub fn rolling_stddev(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    let means = rolling_mean(values, window);
    (0..values.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            let slice = &values[start..=i];
            let mean = means[i];
            let variance =
                slice.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / slice.len() as f64;
            variance.sqrt()
        })
        .collect()
}

/// Rebuild every cached channel from raw closes and volumes.
///
/// The returned map holds the raw channels too, so it is the complete
/// price-derived content of a cache record.
pub fn derive_channels(close: &[f64], volume: &[f64]) -> BTreeMap<IndicatorKey, Vec<f64>> {
    let mut channels = BTreeMap::new();

    let ema12 = calculate_ema(close, 12);
    let ema26 = calculate_ema(close, 26);
    let macd = calculate_macd(close);
    let change = calculate_change(close);

    channels.insert(IndicatorKey::EmaFlips, crossover_flips(&ema12, &ema26));
    channels.insert(
        IndicatorKey::SignalFlips,
        crossover_flips(&macd.line, &macd.signal),
    );
    channels.insert(IndicatorKey::Ema12, ema12);
    channels.insert(IndicatorKey::Ema26, ema26);
    channels.insert(IndicatorKey::Ema200, calculate_ema(close, 200));
    channels.insert(IndicatorKey::Macd, macd.line);
    channels.insert(IndicatorKey::SignalLine, macd.signal);
    channels.insert(IndicatorKey::Histogram, macd.histogram);
    channels.insert(
        IndicatorKey::Momentum,
        calculate_momentum(&change, MOMENTUM_WINDOW),
    );
    channels.insert(IndicatorKey::Rsi, calculate_rsi(&change, RSI_PERIOD));
    channels.insert(
        IndicatorKey::Trama,
        calculate_trama(close, &change, TRAMA_PERIOD),
    );
    channels.insert(
        IndicatorKey::MomentumOscillator,
        calculate_momentum_oscillator(close, MOMENTUM_WINDOW),
    );
    channels.insert(
        IndicatorKey::BollingerMiddle,
        bollinger_middle(close, BOLLINGER_PERIOD),
    );
    channels.insert(
        IndicatorKey::LiquiditySpike,
        liquidity_spikes(volume, LIQUIDITY_WINDOW, LIQUIDITY_Z_THRESHOLD),
    );
    channels.insert(IndicatorKey::Change, change);
    channels.insert(IndicatorKey::Close, close.to_vec());
    channels.insert(IndicatorKey::Volume, volume.to_vec());

    channels
}

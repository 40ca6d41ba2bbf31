//! MACD (Moving Average Convergence Divergence).
//!
//! MACD Line = EMA(12) - EMA(26)
//! Signal Line = 9-row rolling mean of the MACD line
//! Histogram = MACD Line - Signal Line

use super::{calculate_ema, rolling_mean};

pub const DEFAULT_FAST: usize = 12;
pub const DEFAULT_SLOW: usize = 26;
pub const DEFAULT_SIGNAL: usize = 9;

#[derive(Debug, Clone, PartialEq)]
pub struct MacdChannels {
    pub line: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

pub fn calculate_macd(close: &[f64]) -> MacdChannels {
    calculate_macd_with(close, DEFAULT_FAST, DEFAULT_SLOW, DEFAULT_SIGNAL)
}

pub fn calculate_macd_with(close: &[f64], fast: usize, slow: usize, signal: usize) -> MacdChannels {
    let ema_fast = calculate_ema(close, fast);
    let ema_slow = calculate_ema(close, slow);

    let line: Vec<f64> = ema_fast
        .iter()
        .zip(&ema_slow)
        .map(|(f, s)| f - s)
        .collect();
    let signal = rolling_mean(&line, signal);
    let histogram = line.iter().zip(&signal).map(|(m, s)| m - s).collect();

    MacdChannels {
        line,
        signal,
        histogram,
    }
}

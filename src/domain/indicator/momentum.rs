//! Price change, momentum, momentum oscillator and TRAMA.

use super::{rolling_mean, rolling_sum};

/// Day-over-day close change; the first row has no predecessor and is 0.
pub fn calculate_change(close: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(close.len());
    for i in 0..close.len() {
        out.push(if i == 0 { 0.0 } else { close[i] - close[i - 1] });
    }
    out
}

/// Sum of the last `window` changes.
pub fn calculate_momentum(change: &[f64], window: usize) -> Vec<f64> {
    rolling_sum(change, window)
}

/// 100 * (C[i] / C[i-n] - 1), with the lookback clamped to the first row.
pub fn calculate_momentum_oscillator(close: &[f64], lookback: usize) -> Vec<f64> {
    (0..close.len())
        .map(|i| {
            let base = close[i.saturating_sub(lookback)];
            if base == 0.0 {
                0.0
            } else {
                100.0 * (close[i] / base - 1.0)
            }
        })
        .collect()
}

/// Trend-regularity adaptive moving average: rolling mean plus 0.1 * |change|.
pub fn calculate_trama(close: &[f64], change: &[f64], period: usize) -> Vec<f64> {
    rolling_mean(close, period)
        .into_iter()
        .zip(change)
        .map(|(mean, c)| mean + c.abs() * 0.1)
        .collect()
}

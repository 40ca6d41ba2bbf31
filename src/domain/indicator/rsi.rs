//! RSI (Relative Strength Index).
//!
//! Simple rolling means of gains and losses over `period` changes:
//! RSI = 100 - (100 / (1 + avg_gain / avg_loss))
//! If avg_loss == 0: RSI = 100, unless avg_gain is also 0, then 50.

use super::rolling_mean;

pub fn calculate_rsi(change: &[f64], period: usize) -> Vec<f64> {
    let gains: Vec<f64> = change.iter().map(|c| c.max(0.0)).collect();
    let losses: Vec<f64> = change.iter().map(|c| (-c).max(0.0)).collect();

    let avg_gain = rolling_mean(&gains, period);
    let avg_loss = rolling_mean(&losses, period);

    avg_gain
        .into_iter()
        .zip(avg_loss)
        .map(|(g, l)| {
            if l == 0.0 {
                if g == 0.0 { 50.0 } else { 100.0 }
            } else {
                100.0 - (100.0 / (1.0 + g / l))
            }
        })
        .collect()
}

//! Bollinger middle band and volume liquidity spikes.

use super::{rolling_mean, rolling_stddev};

pub fn bollinger_middle(close: &[f64], period: usize) -> Vec<f64> {
    rolling_mean(close, period)
}

/// 1.0 where volume sits more than `z_threshold` standard deviations above
/// its trailing mean, else 0.0. The trailing statistics exclude the row
/// being scored and need at least two prior rows.
pub fn liquidity_spikes(volume: &[f64], window: usize, z_threshold: f64) -> Vec<f64> {
    let means = rolling_mean(volume, window);
    let stddevs = rolling_stddev(volume, window);

    (0..volume.len())
        .map(|i| {
            if i < 2 {
                return 0.0;
            }
            let (mean, sd) = (means[i - 1], stddevs[i - 1]);
            if sd == 0.0 {
                if volume[i] > mean && mean > 0.0 { 1.0 } else { 0.0 }
            } else if (volume[i] - mean) / sd > z_threshold {
                1.0
            } else {
                0.0
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn middle_band_is_rolling_mean() {
        let out = bollinger_middle(&[1.0, 3.0, 5.0], 2);
        assert_eq!(out, vec![1.0, 2.0, 4.0]);
    }

    #[test]
    fn spike_detected_on_volume_burst() {
        let mut volume: Vec<f64> = (0..25).map(|i| 1000.0 + (i % 3) as f64 * 10.0).collect();
        volume.push(50_000.0);
        let out = liquidity_spikes(&volume, 20, 3.0);
        assert_eq!(out[25], 1.0);
        assert!(out[..25].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn flat_volume_has_no_spikes() {
        let out = liquidity_spikes(&[500.0; 10], 5, 3.0);
        assert!(out.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn jump_from_flat_counts_as_spike() {
        let out = liquidity_spikes(&[500.0, 500.0, 500.0, 900.0], 5, 3.0);
        assert_eq!(out, vec![0.0, 0.0, 0.0, 1.0]);
    }
}

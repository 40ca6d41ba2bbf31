//! Exponential moving average and crossover flips.
//!
//! k = 2/(span+1), EMA[0] = C[0], EMA[i] = C[i]*k + EMA[i-1]*(1-k).
//! No warmup: the first value is the first observation.

pub fn calculate_ema(values: &[f64], span: usize) -> Vec<f64> {
    if values.is_empty() || span == 0 {
        return vec![0.0; values.len()];
    }

    let k = 2.0 / (span as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut ema = values[0];
    out.push(ema);

    for &v in &values[1..] {
        ema = v * k + ema * (1.0 - k);
        out.push(ema);
    }

    out
}

/// +1 where `fast` crosses above `slow`, -1 where it crosses below, else 0.
pub fn crossover_flips(fast: &[f64], slow: &[f64]) -> Vec<f64> {
    let n = fast.len().min(slow.len());
    let mut out = vec![0.0; n];
    for i in 1..n {
        let prev = fast[i - 1] - slow[i - 1];
        let curr = fast[i] - slow[i];
        if prev <= 0.0 && curr > 0.0 {
            out[i] = 1.0;
        } else if prev >= 0.0 && curr < 0.0 {
            out[i] = -1.0;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ema_first_value_is_seed() {
        let out = calculate_ema(&[10.0, 20.0, 30.0], 3);
        assert!((out[0] - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn ema_recursive_calculation() {
        let out = calculate_ema(&[10.0, 20.0, 30.0], 3);
        let k = 2.0 / 4.0;
        let e1 = 20.0 * k + 10.0 * (1.0 - k);
        let e2 = 30.0 * k + e1 * (1.0 - k);
        assert!((out[1] - e1).abs() < 1e-12);
        assert!((out[2] - e2).abs() < 1e-12);
    }

    #[test]
    fn ema_span_1_tracks_input() {
        let out = calculate_ema(&[3.0, 7.0, 1.0], 1);
        assert_eq!(out, vec![3.0, 7.0, 1.0]);
    }

    #[test]
    fn ema_equal_prices() {
        let out = calculate_ema(&[100.0; 5], 12);
        assert!(out.iter().all(|v| (v - 100.0).abs() < 1e-12));
    }

    #[test]
    fn ema_empty() {
        assert!(calculate_ema(&[], 12).is_empty());
    }

    #[test]
    fn flips_mark_crossings() {
        let fast = [1.0, 2.0, 3.0, 2.0, 1.0];
        let slow = [2.0, 2.0, 2.0, 2.0, 2.0];
        // diff: -1, 0, 1, 0, -1
        let out = crossover_flips(&fast, &slow);
        assert_eq!(out, vec![0.0, 0.0, 1.0, 0.0, -1.0]);
    }

    #[test]
    fn flips_none_when_parallel() {
        let out = crossover_flips(&[5.0, 6.0, 7.0], &[1.0, 2.0, 3.0]);
        assert_eq!(out, vec![0.0, 0.0, 0.0]);
    }
}

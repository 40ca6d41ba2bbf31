//! Daily bar and earnings event records returned by the data provider.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OhlcvBar {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

/// One reported earnings result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarningsEvent {
    pub date: NaiveDate,
    pub estimated: f64,
    pub actual: f64,
}

impl EarningsEvent {
    /// actual - estimated
    pub fn surprise(&self) -> f64 {
        self.actual - self.estimated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surprise_is_actual_minus_estimate() {
        let event = EarningsEvent {
            date: NaiveDate::from_ymd_opt(2024, 1, 25).unwrap(),
            estimated: 2.10,
            actual: 2.18,
        };
        assert!((event.surprise() - 0.08).abs() < 1e-12);
    }

    #[test]
    fn negative_surprise() {
        let event = EarningsEvent {
            date: NaiveDate::from_ymd_opt(2024, 4, 25).unwrap(),
            estimated: 1.50,
            actual: 1.20,
        };
        assert!(event.surprise() < 0.0);
    }
}

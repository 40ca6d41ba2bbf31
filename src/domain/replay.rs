//! Day-by-day replay of a historical range.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::info;

use crate::domain::cycle::{DailyCycle, is_trading_day};
use crate::domain::decision::{Action, DecisionRecord};
use crate::domain::error::StockbotError;
use crate::domain::resource_manager::ResourceManager;

#[derive(Debug, Clone, PartialEq)]
pub struct ReplaySummary {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub trading_days: usize,
    pub buys: usize,
    pub sells: usize,
    pub final_total: Decimal,
    pub final_available: Decimal,
    pub open_positions: usize,
    pub hit_rate: HitRate,
    pub records: Vec<DecisionRecord>,
}

/// How often the aggregate's direction matched the next close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HitRate {
    pub hits: usize,
    pub scored: usize,
}

impl HitRate {
    pub fn ratio(&self) -> Option<f64> {
        if self.scored == 0 {
            None
        } else {
            Some(self.hits as f64 / self.scored as f64)
        }
    }
}

/// Run `cycle` sequentially over every trading day in `[start, end]`.
/// Each day completes before the next begins.
pub fn replay(
    cycle: &DailyCycle<'_>,
    resources: &mut ResourceManager,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<ReplaySummary, StockbotError> {
    let mut records = Vec::new();
    let mut trading_days = 0;

    for date in start.iter_days().take_while(|d| *d <= end) {
        if !is_trading_day(date) {
            continue;
        }
        trading_days += 1;
        records.extend(cycle.run_once(date, resources)?);
    }

    let count = |action: Action| records.iter().filter(|r| r.action == action).count();
    let summary = ReplaySummary {
        start,
        end,
        trading_days,
        buys: count(Action::Buy),
        sells: count(Action::Sell),
        final_total: resources.total(),
        final_available: resources.available(),
        open_positions: resources.position_count(),
        hit_rate: directional_hit_rate(&records),
        records,
    };
    info!(
        %start,
        %end,
        days = summary.trading_days,
        buys = summary.buys,
        sells = summary.sells,
        total = %summary.final_total,
        "replay finished"
    );
    Ok(summary)
}

/// Score each record's aggregate against the symbol's next recorded price:
/// above 1 predicts a rise, below 1 a fall. Flat predictions and flat
/// moves are not scored.
pub fn directional_hit_rate(records: &[DecisionRecord]) -> HitRate {
    let mut by_symbol: BTreeMap<&str, Vec<&DecisionRecord>> = BTreeMap::new();
    for record in records {
        by_symbol.entry(record.symbol.as_str()).or_default().push(record);
    }

    let mut rate = HitRate::default();
    for history in by_symbol.values_mut() {
        history.sort_by_key(|r| r.date);
        for pair in history.windows(2) {
            let (today, next) = (pair[0], pair[1]);
            let (Some(aggregate), Some(price), Some(next_price)) =
                (today.aggregate, today.price, next.price)
            else {
                continue;
            };
            if aggregate == 1.0 || next_price == price {
                continue;
            }
            rate.scored += 1;
            if (aggregate > 1.0) == (next_price > price) {
                rate.hits += 1;
            }
        }
    }
    rate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::decision::{Rationale, SymbolState};

    fn rec(symbol: &str, day: u32, aggregate: Option<f64>, price: f64) -> DecisionRecord {
        DecisionRecord {
            date: NaiveDate::from_ymd_opt(2024, 5, day).unwrap(),
            symbol: symbol.to_string(),
            action: Action::Watch,
            state: SymbolState::Watching,
            rationale: Rationale::PriceUnavailable,
            aggregate,
            ratios: BTreeMap::new(),
            price: Some(price),
        }
    }

    #[test]
    fn hit_rate_scores_direction() {
        let records = vec![
            rec("A", 1, Some(1.05), 10.0),
            rec("B", 1, Some(0.95), 20.0),
            rec("A", 2, Some(0.97), 11.0), // A up: hit
            rec("B", 2, Some(1.10), 21.0), // B up: miss
            rec("A", 3, None, 10.0),       // A down: hit
        ];
        let rate = directional_hit_rate(&records);
        assert_eq!(rate, HitRate { hits: 2, scored: 3 });
        assert!((rate.ratio().unwrap() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn flat_moves_are_not_scored() {
        let records = vec![rec("A", 1, Some(1.05), 10.0), rec("A", 2, Some(1.0), 10.0)];
        assert_eq!(directional_hit_rate(&records).scored, 0);
        assert_eq!(directional_hit_rate(&records).ratio(), None);
    }
}

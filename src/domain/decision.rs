//! Daily buy/hold/sell decisions.
//!
//! Per symbol state machine:
//!
//! ```text
//! WATCHING --buy--> BOUGHT_TODAY --tick--> HELD --exit--> SOLD --> WATCHING
//!                                          HELD --stay--> HELD
//! ```
//!
//! The engine first reviews every open position for exit, then screens the
//! remaining symbols, ranks qualifying candidates by aggregate ratio
//! (descending, ties by symbol) and funds them greedily. Capital is only
//! touched from this single pass.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

use crate::domain::ensemble::{EnsembleOutcome, QuorumPolicy};
use crate::domain::error::StockbotError;
use crate::domain::position::MONEY_DP;
use crate::domain::resource_manager::ResourceManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SymbolState {
    Watching,
    BoughtToday,
    Held,
    Sold,
}

impl fmt::Display for SymbolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SymbolState::Watching => "WATCHING",
            SymbolState::BoughtToday => "BOUGHT_TODAY",
            SymbolState::Held => "HELD",
            SymbolState::Sold => "SOLD",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Buy,
    Hold,
    Sell,
    Watch,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Buy => "buy",
            Action::Hold => "hold",
            Action::Sell => "sell",
            Action::Watch => "watch",
        })
    }
}

/// Which rule decided a symbol's day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Rationale {
    BuySignal { aggregate: f64 },
    BelowPredictionThreshold { model: String, ratio: f64 },
    BelowRiskReward { aggregate: f64 },
    QuorumNotMet { available: usize, required: usize },
    InsufficientFunds { requested: Decimal, available: Decimal },
    AllocationTooSmall { amount: Decimal },
    MaxPositions { limit: usize },
    Holding { days_held: u32, aggregate: Option<f64> },
    MaxHoldReached { days_held: u32 },
    PerformanceFailed { aggregate: f64 },
    StopLoss { price: f64, entry_price: f64 },
    PriceUnavailable,
    DataUnavailable { reason: String },
    ShapeMismatch { reason: String },
    PredictorFailure { reason: String },
}

impl Rationale {
    pub fn code(&self) -> &'static str {
        match self {
            Rationale::BuySignal { .. } => "buy_signal",
            Rationale::BelowPredictionThreshold { .. } => "below_prediction_threshold",
            Rationale::BelowRiskReward { .. } => "below_risk_reward",
            Rationale::QuorumNotMet { .. } => "quorum_not_met",
            Rationale::InsufficientFunds { .. } => "insufficient_funds",
            Rationale::AllocationTooSmall { .. } => "allocation_too_small",
            Rationale::MaxPositions { .. } => "max_positions",
            Rationale::Holding { .. } => "holding",
            Rationale::MaxHoldReached { .. } => "max_hold_reached",
            Rationale::PerformanceFailed { .. } => "performance_failed",
            Rationale::StopLoss { .. } => "stop_loss",
            Rationale::PriceUnavailable => "price_unavailable",
            Rationale::DataUnavailable { .. } => "data_unavailable",
            Rationale::ShapeMismatch { .. } => "shape_mismatch",
            Rationale::PredictorFailure { .. } => "predictor_failure",
        }
    }

    /// Per-symbol error recorded instead of aborting the cycle.
    pub fn from_error(err: &StockbotError) -> Self {
        match err {
            StockbotError::ShapeMismatch { .. } => Rationale::ShapeMismatch {
                reason: err.to_string(),
            },
            StockbotError::PredictorFailure { .. } => Rationale::PredictorFailure {
                reason: err.to_string(),
            },
            StockbotError::InsufficientFunds {
                requested,
                available,
                ..
            } => Rationale::InsufficientFunds {
                requested: *requested,
                available: *available,
            },
            _ => Rationale::DataUnavailable {
                reason: err.to_string(),
            },
        }
    }
}

impl fmt::Display for Rationale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rationale::BuySignal { aggregate } => write!(f, "buy_signal aggregate={aggregate:.4}"),
            Rationale::BelowPredictionThreshold { model, ratio } => {
                write!(f, "below_prediction_threshold {model}={ratio:.4}")
            }
            Rationale::BelowRiskReward { aggregate } => {
                write!(f, "below_risk_reward aggregate={aggregate:.4}")
            }
            Rationale::QuorumNotMet {
                available,
                required,
            } => write!(f, "quorum_not_met {available}/{required}"),
            Rationale::InsufficientFunds {
                requested,
                available,
            } => write!(f, "insufficient_funds requested={requested} available={available}"),
            Rationale::AllocationTooSmall { amount } => {
                write!(f, "allocation_too_small amount={amount}")
            }
            Rationale::MaxPositions { limit } => write!(f, "max_positions limit={limit}"),
            Rationale::Holding {
                days_held,
                aggregate: Some(aggregate),
            } => write!(f, "holding day={days_held} aggregate={aggregate:.4}"),
            Rationale::Holding { days_held, .. } => write!(f, "holding day={days_held}"),
            Rationale::MaxHoldReached { days_held } => write!(f, "max_hold_reached day={days_held}"),
            Rationale::PerformanceFailed { aggregate } => {
                write!(f, "performance_failed aggregate={aggregate:.4}")
            }
            Rationale::StopLoss { price, entry_price } => {
                write!(f, "stop_loss price={price} entry={entry_price}")
            }
            Rationale::DataUnavailable { reason }
            | Rationale::ShapeMismatch { reason }
            | Rationale::PredictorFailure { reason } => write!(f, "{}: {reason}", self.code()),
            Rationale::PriceUnavailable => f.write_str(self.code()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub date: NaiveDate,
    pub symbol: String,
    pub action: Action,
    /// State after the decision.
    pub state: SymbolState,
    pub rationale: Rationale,
    pub aggregate: Option<f64>,
    pub ratios: BTreeMap<String, f64>,
    pub price: Option<f64>,
}

/// Everything gathered for one symbol before the decision pass.
#[derive(Debug)]
pub struct SymbolSnapshot {
    pub symbol: String,
    /// Latest close on or before the cycle date.
    pub price: Option<f64>,
    pub outcome: Result<EnsembleOutcome, StockbotError>,
}

impl SymbolSnapshot {
    fn ratios(&self) -> BTreeMap<String, f64> {
        self.outcome
            .as_ref()
            .map(EnsembleOutcome::ratios)
            .unwrap_or_default()
    }

    fn aggregate(&self) -> Option<f64> {
        self.outcome.as_ref().ok().and_then(EnsembleOutcome::aggregate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationRule {
    /// Same amount for every buy.
    Fixed(Decimal),
    /// Fraction of total capital as of the start of the cycle.
    FractionOfTotal(f64),
}

impl AllocationRule {
    pub fn amount(&self, total: Decimal) -> Decimal {
        match self {
            AllocationRule::Fixed(amount) => *amount,
            AllocationRule::FractionOfTotal(fraction) => Decimal::from_f64(*fraction)
                .map(|f| (total * f).round_dp(MONEY_DP))
                .unwrap_or(Decimal::ZERO),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineParams {
    /// Every member ratio must exceed this to buy.
    pub prediction_threshold: f64,
    /// The aggregate ratio must exceed this to buy.
    pub risk_reward_ratio: f64,
    /// Days held at which a position is sold regardless of outlook.
    pub max_hold_index: u32,
    /// A held position is sold once its aggregate falls below this.
    pub hold_threshold: f64,
    /// Percent drop from entry that forces a sale; 0 disables.
    pub stop_loss_pct: f64,
    pub allocation: AllocationRule,
    pub max_positions: usize,
    pub quorum: QuorumPolicy,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            prediction_threshold: 1.02,
            risk_reward_ratio: 1.01,
            max_hold_index: 5,
            hold_threshold: 1.0,
            stop_loss_pct: 0.0,
            allocation: AllocationRule::FractionOfTotal(0.1),
            max_positions: 10,
            quorum: QuorumPolicy::Majority,
        }
    }
}

struct Candidate<'a> {
    snapshot: &'a SymbolSnapshot,
    aggregate: f64,
    price: f64,
}

pub struct DecisionEngine {
    params: EngineParams,
}

impl DecisionEngine {
    pub fn new(params: EngineParams) -> Self {
        Self { params }
    }

    /// Run one day's state machine over `snapshots`.
    ///
    /// Ages open positions, reviews them for exit, then ranks and funds new
    /// candidates. Per-symbol problems become rationales; only a broken
    /// capital ledger returns an error.
    pub fn decide(
        &self,
        date: NaiveDate,
        snapshots: &[SymbolSnapshot],
        resources: &mut ResourceManager,
    ) -> Result<Vec<DecisionRecord>, StockbotError> {
        let total_at_start = resources.total();
        resources.tick();

        let by_symbol: BTreeMap<&str, &SymbolSnapshot> =
            snapshots.iter().map(|s| (s.symbol.as_str(), s)).collect();
        let mut records = Vec::with_capacity(snapshots.len());

        let held: Vec<String> = resources.positions().map(|p| p.symbol.clone()).collect();
        for symbol in &held {
            let snapshot = by_symbol.get(symbol.as_str()).copied();
            records.push(self.review_holding(date, symbol, snapshot, resources)?);
        }

        let mut candidates = Vec::new();
        for snapshot in by_symbol.values().filter(|s| !held.contains(&s.symbol)) {
            match self.screen(snapshot) {
                Ok(candidate) => candidates.push(candidate),
                Err(rationale) => {
                    debug!(symbol = %snapshot.symbol, rule = rationale.code(), "not a candidate");
                    records.push(record(
                        date,
                        &snapshot.symbol,
                        Action::Watch,
                        SymbolState::Watching,
                        rationale,
                        Some(snapshot),
                    ));
                }
            }
        }

        candidates.sort_by(|a, b| {
            b.aggregate
                .total_cmp(&a.aggregate)
                .then_with(|| a.snapshot.symbol.cmp(&b.snapshot.symbol))
        });

        let amount = self.params.allocation.amount(total_at_start);
        for candidate in candidates {
            records.push(self.fund(date, &candidate, amount, resources)?);
        }

        records.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(records)
    }

    fn review_holding(
        &self,
        date: NaiveDate,
        symbol: &str,
        snapshot: Option<&SymbolSnapshot>,
        resources: &mut ResourceManager,
    ) -> Result<DecisionRecord, StockbotError> {
        let Some(position) = resources.position(symbol).cloned() else {
            return Err(StockbotError::ResourceInvariantViolation {
                detail: format!("position {symbol} vanished during review"),
            });
        };
        let hold = |rationale| {
            record(date, symbol, Action::Hold, SymbolState::Held, rationale, snapshot)
        };

        let Some(price) = snapshot.and_then(|s| s.price) else {
            return Ok(hold(Rationale::PriceUnavailable));
        };

        let aggregate = snapshot
            .and_then(|s| s.outcome.as_ref().ok())
            .filter(|o| o.meets(&self.params.quorum))
            .and_then(EnsembleOutcome::aggregate);

        let exit = if position.days_held >= self.params.max_hold_index {
            Some(Rationale::MaxHoldReached {
                days_held: position.days_held,
            })
        } else if position.should_stop_loss(price, self.params.stop_loss_pct) {
            Some(Rationale::StopLoss {
                price,
                entry_price: position.entry_price,
            })
        } else {
            aggregate
                .filter(|a| *a < self.params.hold_threshold)
                .map(|aggregate| Rationale::PerformanceFailed { aggregate })
        };

        let Some(rationale) = exit else {
            let rationale = match snapshot.map(|s| &s.outcome) {
                Some(Err(e)) => Rationale::from_error(e),
                _ => Rationale::Holding {
                    days_held: position.days_held,
                    aggregate,
                },
            };
            return Ok(hold(rationale));
        };

        match resources.release(symbol, price, date) {
            Ok(trade) => {
                info!(symbol, rule = rationale.code(), pnl = %trade.pnl(), "sell");
                Ok(record(
                    date,
                    symbol,
                    Action::Sell,
                    SymbolState::Sold,
                    rationale,
                    snapshot,
                ))
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => Ok(hold(Rationale::from_error(&e))),
        }
    }

    fn screen<'a>(&self, snapshot: &'a SymbolSnapshot) -> Result<Candidate<'a>, Rationale> {
        let outcome = snapshot.outcome.as_ref().map_err(Rationale::from_error)?;

        if !outcome.meets(&self.params.quorum) {
            return Err(Rationale::QuorumNotMet {
                available: outcome.available(),
                required: self.params.quorum.required(outcome.members),
            });
        }
        if let Some(weak) = outcome.first_at_or_below(self.params.prediction_threshold) {
            return Err(Rationale::BelowPredictionThreshold {
                model: weak.model.clone(),
                ratio: weak.ratio,
            });
        }
        let Some(aggregate) = outcome.aggregate() else {
            return Err(Rationale::QuorumNotMet {
                available: 0,
                required: self.params.quorum.required(outcome.members),
            });
        };
        if aggregate <= self.params.risk_reward_ratio {
            return Err(Rationale::BelowRiskReward { aggregate });
        }
        let price = snapshot.price.ok_or(Rationale::PriceUnavailable)?;

        Ok(Candidate {
            snapshot,
            aggregate,
            price,
        })
    }

    fn fund(
        &self,
        date: NaiveDate,
        candidate: &Candidate<'_>,
        amount: Decimal,
        resources: &mut ResourceManager,
    ) -> Result<DecisionRecord, StockbotError> {
        let symbol = candidate.snapshot.symbol.as_str();
        let watch = |rationale| {
            record(
                date,
                symbol,
                Action::Watch,
                SymbolState::Watching,
                rationale,
                Some(candidate.snapshot),
            )
        };

        if resources.position_count() >= self.params.max_positions {
            return Ok(watch(Rationale::MaxPositions {
                limit: self.params.max_positions,
            }));
        }

        if amount <= Decimal::ZERO {
            return Ok(watch(Rationale::AllocationTooSmall { amount }));
        }

        match resources.allocate(symbol, amount, candidate.price, date) {
            Ok(()) => {
                info!(symbol, aggregate = candidate.aggregate, %amount, "buy");
                Ok(record(
                    date,
                    symbol,
                    Action::Buy,
                    SymbolState::BoughtToday,
                    Rationale::BuySignal {
                        aggregate: candidate.aggregate,
                    },
                    Some(candidate.snapshot),
                ))
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                debug!(symbol, error = %e, "candidate not funded");
                Ok(watch(Rationale::from_error(&e)))
            }
        }
    }
}

fn record(
    date: NaiveDate,
    symbol: &str,
    action: Action,
    state: SymbolState,
    rationale: Rationale,
    snapshot: Option<&SymbolSnapshot>,
) -> DecisionRecord {
    DecisionRecord {
        date,
        symbol: symbol.to_string(),
        action,
        state,
        rationale,
        aggregate: snapshot.and_then(SymbolSnapshot::aggregate),
        ratios: snapshot.map(SymbolSnapshot::ratios).unwrap_or_default(),
        price: snapshot.and_then(|s| s.price),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ensemble::PredictionResult;
    use rust_decimal_macros::dec;

    fn day(n: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, n).unwrap()
    }

    fn snapshot(symbol: &str, ratios: &[f64], price: f64) -> SymbolSnapshot {
        SymbolSnapshot {
            symbol: symbol.to_string(),
            price: Some(price),
            outcome: Ok(EnsembleOutcome {
                symbol: symbol.to_string(),
                members: ratios.len(),
                predictions: ratios
                    .iter()
                    .enumerate()
                    .map(|(i, r)| PredictionResult {
                        symbol: symbol.to_string(),
                        model: format!("m{i}"),
                        ratio: *r,
                    })
                    .collect(),
                failures: vec![],
            }),
        }
    }

    fn fixed(amount: Decimal) -> EngineParams {
        EngineParams {
            allocation: AllocationRule::Fixed(amount),
            ..EngineParams::default()
        }
    }

    fn find<'a>(records: &'a [DecisionRecord], symbol: &str) -> &'a DecisionRecord {
        records.iter().find(|r| r.symbol == symbol).unwrap()
    }

    #[test]
    fn buys_only_when_every_member_clears_threshold() {
        let engine = DecisionEngine::new(fixed(dec!(100)));
        let mut rm = ResourceManager::new(dec!(10000)).unwrap();
        let snaps = vec![
            snapshot("A", &[1.03, 1.05], 10.0),
            snapshot("B", &[1.00, 1.06], 10.0),
        ];
        let records = engine.decide(day(1), &snaps, &mut rm).unwrap();

        assert_eq!(find(&records, "A").state, SymbolState::BoughtToday);
        let b = find(&records, "B");
        assert_eq!(b.state, SymbolState::Watching);
        assert!(matches!(
            b.rationale,
            Rationale::BelowPredictionThreshold { ref model, .. } if model == "m0"
        ));
    }

    #[test]
    fn aggregate_must_exceed_risk_reward() {
        let params = EngineParams {
            prediction_threshold: 1.0,
            risk_reward_ratio: 1.05,
            ..fixed(dec!(100))
        };
        let engine = DecisionEngine::new(params);
        let mut rm = ResourceManager::new(dec!(10000)).unwrap();
        let records = engine
            .decide(day(1), &[snapshot("A", &[1.03, 1.05], 10.0)], &mut rm)
            .unwrap();
        assert!(matches!(records[0].rationale, Rationale::BelowRiskReward { .. }));
    }

    #[test]
    fn contention_funds_highest_aggregate() {
        let engine = DecisionEngine::new(fixed(dec!(700)));
        let mut rm = ResourceManager::new(dec!(1000)).unwrap();
        let snaps = vec![
            snapshot("A", &[1.04, 1.04], 10.0),
            snapshot("B", &[1.08, 1.08], 10.0),
        ];
        let records = engine.decide(day(1), &snaps, &mut rm).unwrap();
        assert_eq!(find(&records, "B").action, Action::Buy);
        let a = find(&records, "A");
        assert_eq!(a.state, SymbolState::Watching);
        assert!(matches!(a.rationale, Rationale::InsufficientFunds { .. }));
        assert_eq!(rm.available(), dec!(300));
    }

    #[test]
    fn ties_break_by_symbol() {
        let engine = DecisionEngine::new(fixed(dec!(700)));
        let mut rm = ResourceManager::new(dec!(1000)).unwrap();
        let snaps = vec![
            snapshot("ZED", &[1.05, 1.05], 10.0),
            snapshot("ABC", &[1.05, 1.05], 10.0),
        ];
        let records = engine.decide(day(1), &snaps, &mut rm).unwrap();
        assert_eq!(find(&records, "ABC").action, Action::Buy);
        assert_eq!(find(&records, "ZED").action, Action::Watch);
    }

    #[test]
    fn max_positions_caps_buys() {
        let params = EngineParams {
            max_positions: 1,
            ..fixed(dec!(100))
        };
        let engine = DecisionEngine::new(params);
        let mut rm = ResourceManager::new(dec!(10000)).unwrap();
        let snaps = vec![
            snapshot("A", &[1.05, 1.05], 10.0),
            snapshot("B", &[1.06, 1.06], 10.0),
        ];
        let records = engine.decide(day(1), &snaps, &mut rm).unwrap();
        assert_eq!(find(&records, "B").action, Action::Buy);
        assert!(matches!(
            find(&records, "A").rationale,
            Rationale::MaxPositions { limit: 1 }
        ));
    }

    #[test]
    fn bought_today_becomes_held_then_sold_at_max_hold() {
        let params = EngineParams {
            max_hold_index: 2,
            ..fixed(dec!(100))
        };
        let engine = DecisionEngine::new(params);
        let mut rm = ResourceManager::new(dec!(1000)).unwrap();
        let strong = |p| vec![snapshot("A", &[1.05, 1.05], p)];

        let r1 = engine.decide(day(1), &strong(10.0), &mut rm).unwrap();
        assert_eq!(r1[0].state, SymbolState::BoughtToday);

        let r2 = engine.decide(day(2), &strong(10.0), &mut rm).unwrap();
        assert_eq!(r2[0].state, SymbolState::Held);
        assert!(matches!(r2[0].rationale, Rationale::Holding { days_held: 1, .. }));

        let r3 = engine.decide(day(3), &strong(11.0), &mut rm).unwrap();
        assert_eq!(r3[0].action, Action::Sell);
        assert!(matches!(r3[0].rationale, Rationale::MaxHoldReached { days_held: 2 }));
        assert_eq!(rm.total(), dec!(1010));

        // sold today: not re-bought in the same cycle
        assert_eq!(r3.len(), 1);
        assert!(!rm.has_position("A"));

        let r4 = engine.decide(day(4), &strong(11.0), &mut rm).unwrap();
        assert_eq!(r4[0].state, SymbolState::BoughtToday);
    }

    #[test]
    fn weak_outlook_sells_held_position() {
        let engine = DecisionEngine::new(fixed(dec!(100)));
        let mut rm = ResourceManager::new(dec!(1000)).unwrap();
        engine
            .decide(day(1), &[snapshot("A", &[1.05, 1.05], 10.0)], &mut rm)
            .unwrap();
        let records = engine
            .decide(day(2), &[snapshot("A", &[0.97, 0.99], 9.0)], &mut rm)
            .unwrap();
        assert_eq!(records[0].action, Action::Sell);
        assert!(matches!(records[0].rationale, Rationale::PerformanceFailed { .. }));
        assert_eq!(rm.total(), dec!(990));
    }

    #[test]
    fn stop_loss_sells_held_position() {
        let params = EngineParams {
            stop_loss_pct: 5.0,
            ..fixed(dec!(100))
        };
        let engine = DecisionEngine::new(params);
        let mut rm = ResourceManager::new(dec!(1000)).unwrap();
        engine
            .decide(day(1), &[snapshot("A", &[1.05, 1.05], 10.0)], &mut rm)
            .unwrap();
        let records = engine
            .decide(day(2), &[snapshot("A", &[1.05, 1.05], 9.0)], &mut rm)
            .unwrap();
        assert!(matches!(records[0].rationale, Rationale::StopLoss { .. }));
    }

    #[test]
    fn missing_price_keeps_position_held() {
        let params = EngineParams {
            max_hold_index: 1,
            ..fixed(dec!(100))
        };
        let engine = DecisionEngine::new(params);
        let mut rm = ResourceManager::new(dec!(1000)).unwrap();
        engine
            .decide(day(1), &[snapshot("A", &[1.05, 1.05], 10.0)], &mut rm)
            .unwrap();
        let records = engine.decide(day(2), &[], &mut rm).unwrap();
        assert_eq!(records[0].action, Action::Hold);
        assert_eq!(records[0].rationale, Rationale::PriceUnavailable);
        assert!(rm.has_position("A"));
    }

    #[test]
    fn symbol_error_becomes_rationale() {
        let engine = DecisionEngine::new(fixed(dec!(100)));
        let mut rm = ResourceManager::new(dec!(1000)).unwrap();
        let snaps = vec![
            SymbolSnapshot {
                symbol: "BAD".into(),
                price: None,
                outcome: Err(StockbotError::ShapeMismatch {
                    symbol: "BAD".into(),
                    key: "rsi".into(),
                    expected: 60,
                    actual: 12,
                }),
            },
            snapshot("A", &[1.05, 1.05], 10.0),
        ];
        let records = engine.decide(day(1), &snaps, &mut rm).unwrap();
        assert!(matches!(
            find(&records, "BAD").rationale,
            Rationale::ShapeMismatch { .. }
        ));
        assert_eq!(find(&records, "A").action, Action::Buy);
    }

    #[test]
    fn quorum_not_met_blocks_buy() {
        let params = EngineParams {
            quorum: QuorumPolicy::Unanimous,
            ..fixed(dec!(100))
        };
        let engine = DecisionEngine::new(params);
        let mut rm = ResourceManager::new(dec!(1000)).unwrap();
        let mut snap = snapshot("A", &[1.05, 1.05], 10.0);
        if let Ok(outcome) = snap.outcome.as_mut() {
            outcome.members = 3;
        }
        let records = engine.decide(day(1), &[snap], &mut rm).unwrap();
        assert_eq!(
            records[0].rationale,
            Rationale::QuorumNotMet {
                available: 2,
                required: 3
            }
        );
    }

    #[test]
    fn fraction_allocation_uses_total_at_cycle_start() {
        let params = EngineParams {
            allocation: AllocationRule::FractionOfTotal(0.25),
            ..EngineParams::default()
        };
        let engine = DecisionEngine::new(params);
        let mut rm = ResourceManager::new(dec!(1000)).unwrap();
        let snaps = vec![
            snapshot("A", &[1.05, 1.05], 10.0),
            snapshot("B", &[1.06, 1.06], 10.0),
        ];
        engine.decide(day(1), &snaps, &mut rm).unwrap();
        assert_eq!(rm.position("A").unwrap().allocated, dec!(250));
        assert_eq!(rm.position("B").unwrap().allocated, dec!(250));
    }

    #[test]
    fn fraction_rounding_to_zero_is_too_small() {
        let params = EngineParams {
            allocation: AllocationRule::FractionOfTotal(0.001),
            ..EngineParams::default()
        };
        let engine = DecisionEngine::new(params);
        let mut rm = ResourceManager::new(dec!(4)).unwrap();
        let records = engine
            .decide(day(1), &[snapshot("A", &[1.05, 1.05], 10.0)], &mut rm)
            .unwrap();
        assert_eq!(records[0].action, Action::Watch);
        assert_eq!(
            records[0].rationale,
            Rationale::AllocationTooSmall { amount: dec!(0) }
        );
        assert_eq!(records[0].rationale.code(), "allocation_too_small");
        assert_eq!(rm.available(), dec!(4));
    }

    #[test]
    fn rationale_serializes_with_rule_tag() {
        let json = serde_json::to_string(&Rationale::MaxPositions { limit: 3 }).unwrap();
        assert_eq!(json, r#"{"rule":"max_positions","limit":3}"#);
    }
}

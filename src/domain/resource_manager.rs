//! Capital ledger: total and available capital plus open positions.
//!
//! Conservation law: available + sum(allocated) == total, checked exactly
//! before and after every mutation. Once broken the manager halts and
//! every further call fails.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{error, info};

use crate::domain::error::StockbotError;
use crate::domain::position::{ClosedTrade, Position};

/// Closed trades kept in the saved state; older ones live on only in the
/// running totals and the decision log.
pub const MAX_CLOSED_TRADES: usize = 250;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceManagerState {
    pub total_capital: Decimal,
    pub available_capital: Decimal,
    pub positions: BTreeMap<String, Position>,
    /// Most recent closed trades, oldest first.
    #[serde(default)]
    pub closed_trades: Vec<ClosedTrade>,
    #[serde(default)]
    pub trades_closed: u64,
    #[serde(default)]
    pub trades_won: u64,
    /// Last date a daily cycle completed against this state.
    #[serde(default)]
    pub last_run: Option<NaiveDate>,
}

impl ResourceManagerState {
    pub fn new(initial_capital: Decimal) -> Self {
        Self {
            total_capital: initial_capital,
            available_capital: initial_capital,
            positions: BTreeMap::new(),
            closed_trades: Vec::new(),
            trades_closed: 0,
            trades_won: 0,
            last_run: None,
        }
    }

    pub fn allocated(&self) -> Decimal {
        self.positions.values().map(|p| p.allocated).sum()
    }

    pub fn check_conservation(&self) -> Result<(), StockbotError> {
        let allocated = self.allocated();
        if self.available_capital + allocated != self.total_capital {
            return Err(StockbotError::ResourceInvariantViolation {
                detail: format!(
                    "available {} + allocated {} != total {}",
                    self.available_capital, allocated, self.total_capital
                ),
            });
        }
        if self.available_capital < Decimal::ZERO {
            return Err(StockbotError::ResourceInvariantViolation {
                detail: format!("available capital {} is negative", self.available_capital),
            });
        }
        if let Some(p) = self.positions.values().find(|p| p.allocated <= Decimal::ZERO) {
            return Err(StockbotError::ResourceInvariantViolation {
                detail: format!("position {} holds {}", p.symbol, p.allocated),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ResourceManager {
    state: ResourceManagerState,
    halted: bool,
}

impl ResourceManager {
    pub fn new(initial_capital: Decimal) -> Result<Self, StockbotError> {
        if initial_capital <= Decimal::ZERO {
            return Err(StockbotError::ConfigInvalid {
                section: "capital".into(),
                key: "initial_capital".into(),
                reason: "initial_capital must be positive".into(),
            });
        }
        Self::from_state(ResourceManagerState::new(initial_capital))
    }

    /// Resume from persisted state; a state that already violates
    /// conservation is refused.
    pub fn from_state(state: ResourceManagerState) -> Result<Self, StockbotError> {
        state.check_conservation()?;
        Ok(Self {
            state,
            halted: false,
        })
    }

    pub fn state(&self) -> &ResourceManagerState {
        &self.state
    }

    pub fn into_state(self) -> ResourceManagerState {
        self.state
    }

    pub fn total(&self) -> Decimal {
        self.state.total_capital
    }

    pub fn available(&self) -> Decimal {
        self.state.available_capital
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.state.positions.get(symbol)
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.state.positions.contains_key(symbol)
    }

    pub fn position_count(&self) -> usize {
        self.state.positions.len()
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.state.positions.values()
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn mark_run(&mut self, date: NaiveDate) {
        self.state.last_run = Some(date);
    }

    /// Commit `amount` to `symbol` at `entry_price`.
    pub fn allocate(
        &mut self,
        symbol: &str,
        amount: Decimal,
        entry_price: f64,
        date: NaiveDate,
    ) -> Result<(), StockbotError> {
        self.ensure_conserved()?;

        if amount <= Decimal::ZERO {
            return Err(StockbotError::ConfigInvalid {
                section: "engine".into(),
                key: "allocation_amount".into(),
                reason: format!("allocation for {symbol} must be positive, got {amount}"),
            });
        }
        if !entry_price.is_finite() || entry_price <= 0.0 {
            return Err(StockbotError::data_unavailable(
                symbol,
                "close",
                format!("unusable entry price {entry_price}"),
            ));
        }
        if amount > self.state.available_capital {
            return Err(StockbotError::InsufficientFunds {
                symbol: symbol.to_string(),
                requested: amount,
                available: self.state.available_capital,
            });
        }

        self.state.available_capital -= amount;
        match self.state.positions.get_mut(symbol) {
            Some(existing) => existing.add(amount, entry_price),
            None => {
                self.state.positions.insert(
                    symbol.to_string(),
                    Position {
                        symbol: symbol.to_string(),
                        allocated: amount,
                        entry_price,
                        entry_date: date,
                        days_held: 0,
                    },
                );
            }
        }
        info!(symbol, %amount, price = entry_price, "allocated");

        self.ensure_conserved()
    }

    /// Close `symbol` at `exit_price`, returning the realised capital to
    /// the pool. Total capital absorbs the gain or loss.
    pub fn release(
        &mut self,
        symbol: &str,
        exit_price: f64,
        date: NaiveDate,
    ) -> Result<ClosedTrade, StockbotError> {
        self.ensure_conserved()?;

        let position = self
            .state
            .positions
            .get(symbol)
            .ok_or_else(|| StockbotError::data_unavailable(symbol, "position", "no open position"))?;
        if !exit_price.is_finite() || exit_price <= 0.0 {
            return Err(StockbotError::data_unavailable(
                symbol,
                "close",
                format!("unusable exit price {exit_price}"),
            ));
        }
        let realized = position.value_at(exit_price)?;
        let overflow = || StockbotError::data_unavailable(symbol, "close", "capital overflows");
        let total = self
            .state
            .total_capital
            .checked_add(realized - position.allocated)
            .ok_or_else(overflow)?;
        let available = self
            .state
            .available_capital
            .checked_add(realized)
            .ok_or_else(overflow)?;

        let Some(position) = self.state.positions.remove(symbol) else {
            return Err(StockbotError::data_unavailable(symbol, "position", "no open position"));
        };
        self.state.total_capital = total;
        self.state.available_capital = available;

        let trade = ClosedTrade {
            symbol: position.symbol,
            allocated: position.allocated,
            realized,
            entry_price: position.entry_price,
            exit_price,
            entry_date: position.entry_date,
            exit_date: date,
            days_held: position.days_held,
        };
        info!(symbol, %realized, pnl = %trade.pnl(), "released");
        self.record_closed(trade.clone());

        self.ensure_conserved()?;
        Ok(trade)
    }

    fn record_closed(&mut self, trade: ClosedTrade) {
        self.state.trades_closed += 1;
        if trade.is_win() {
            self.state.trades_won += 1;
        }
        self.state.closed_trades.push(trade);
        let excess = self
            .state
            .closed_trades
            .len()
            .saturating_sub(MAX_CLOSED_TRADES);
        self.state.closed_trades.drain(..excess);
    }

    /// Advance every open position by one trading day.
    pub fn tick(&mut self) {
        for position in self.state.positions.values_mut() {
            position.days_held += 1;
        }
    }

    fn ensure_conserved(&mut self) -> Result<(), StockbotError> {
        if self.halted {
            return Err(StockbotError::ResourceInvariantViolation {
                detail: "capital ledger halted after an earlier violation".into(),
            });
        }
        if let Err(e) = self.state.check_conservation() {
            self.halted = true;
            error!(error = %e, "capital ledger halted");
            return Err(e);
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn state_mut(&mut self) -> &mut ResourceManagerState {
        &mut self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn day(n: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, n).unwrap()
    }

    #[test]
    fn new_manager_is_all_available() {
        let rm = ResourceManager::new(dec!(1000)).unwrap();
        assert_eq!(rm.total(), dec!(1000));
        assert_eq!(rm.available(), dec!(1000));
        assert_eq!(rm.position_count(), 0);
    }

    #[test]
    fn non_positive_capital_rejected() {
        assert!(ResourceManager::new(dec!(0)).is_err());
        assert!(ResourceManager::new(dec!(-5)).is_err());
    }

    #[test]
    fn allocate_moves_capital_into_position() {
        let mut rm = ResourceManager::new(dec!(1000)).unwrap();
        rm.allocate("A", dec!(700), 10.0, day(1)).unwrap();
        assert_eq!(rm.available(), dec!(300));
        assert_eq!(rm.position("A").unwrap().allocated, dec!(700));
        assert!(rm.position("A").unwrap().is_new());
        assert!(rm.state().check_conservation().is_ok());
    }

    #[test]
    fn allocate_beyond_available_fails_without_side_effects() {
        let mut rm = ResourceManager::new(dec!(1000)).unwrap();
        rm.allocate("A", dec!(700), 10.0, day(1)).unwrap();
        let before = rm.state().clone();
        let err = rm.allocate("B", dec!(700), 10.0, day(1)).unwrap_err();
        assert!(matches!(err, StockbotError::InsufficientFunds { .. }));
        assert_eq!(rm.state(), &before);
    }

    #[test]
    fn allocate_exact_available_is_allowed() {
        let mut rm = ResourceManager::new(dec!(1000)).unwrap();
        rm.allocate("A", dec!(1000), 10.0, day(1)).unwrap();
        assert_eq!(rm.available(), dec!(0));
    }

    #[test]
    fn allocate_twice_tops_up_position() {
        let mut rm = ResourceManager::new(dec!(1000)).unwrap();
        rm.allocate("A", dec!(400), 10.0, day(1)).unwrap();
        rm.allocate("A", dec!(400), 10.0, day(2)).unwrap();
        assert_eq!(rm.position_count(), 1);
        assert_eq!(rm.position("A").unwrap().allocated, dec!(800));
        assert_eq!(rm.available(), dec!(200));
    }

    #[test]
    fn release_realizes_gain() {
        let mut rm = ResourceManager::new(dec!(1000)).unwrap();
        rm.allocate("A", dec!(700), 10.0, day(1)).unwrap();
        let trade = rm.release("A", 11.0, day(5)).unwrap();
        assert_eq!(trade.realized, dec!(770));
        assert_eq!(rm.total(), dec!(1070));
        assert_eq!(rm.available(), dec!(1070));
        assert!(!rm.has_position("A"));
        assert_eq!(rm.state().closed_trades.len(), 1);
    }

    #[test]
    fn release_realizes_loss() {
        let mut rm = ResourceManager::new(dec!(1000)).unwrap();
        rm.allocate("A", dec!(500), 20.0, day(1)).unwrap();
        rm.release("A", 15.0, day(3)).unwrap();
        assert_eq!(rm.total(), dec!(875));
        assert_eq!(rm.available(), dec!(875));
    }

    #[test]
    fn release_at_unrepresentable_price_keeps_position() {
        let mut rm = ResourceManager::new(Decimal::new(10_000_000_000, 0)).unwrap();
        rm.allocate("A", Decimal::new(10_000_000_000, 0), 1.0, day(1)).unwrap();
        let before = rm.state().clone();

        let err = rm.release("A", 1e20, day(2)).unwrap_err();
        assert!(matches!(err, StockbotError::DataUnavailable { .. }));
        assert!(!err.is_fatal());
        assert!(!rm.is_halted());
        assert_eq!(rm.state(), &before);
    }

    #[test]
    fn capital_overflow_on_release_keeps_position() {
        let half = Decimal::from_i128_with_scale(30_000_000_000_000_000_000_000_000_000, 0);
        let mut rm = ResourceManager::new(half + half).unwrap();
        rm.allocate("A", half, 1.0, day(1)).unwrap();
        let before = rm.state().clone();

        let err = rm.release("A", 1.9, day(2)).unwrap_err();
        assert!(matches!(err, StockbotError::DataUnavailable { .. }));
        assert_eq!(rm.state(), &before);
    }

    #[test]
    fn closed_trade_history_is_capped() {
        let mut rm = ResourceManager::new(dec!(1000)).unwrap();
        let trades = MAX_CLOSED_TRADES + 20;
        for i in 0..trades {
            rm.allocate("A", dec!(10), 10.0, day(1)).unwrap();
            let exit = if i % 2 == 0 { 11.0 } else { 9.0 };
            rm.release("A", exit, day(2)).unwrap();
        }
        let state = rm.state();
        assert_eq!(state.closed_trades.len(), MAX_CLOSED_TRADES);
        assert_eq!(state.trades_closed, trades as u64);
        assert_eq!(state.trades_won, (trades as u64 + 1) / 2);
        assert!(state.check_conservation().is_ok());
    }

    #[test]
    fn release_unknown_symbol_fails() {
        let mut rm = ResourceManager::new(dec!(1000)).unwrap();
        assert!(rm.release("ZZZ", 10.0, day(1)).is_err());
        assert!(!rm.is_halted());
    }

    #[test]
    fn tick_ages_positions() {
        let mut rm = ResourceManager::new(dec!(1000)).unwrap();
        rm.allocate("A", dec!(100), 10.0, day(1)).unwrap();
        rm.tick();
        rm.tick();
        assert_eq!(rm.position("A").unwrap().days_held, 2);
    }

    #[test]
    fn broken_ledger_halts_manager() {
        let mut rm = ResourceManager::new(dec!(1000)).unwrap();
        rm.state_mut().available_capital = dec!(999);
        let err = rm.allocate("A", dec!(100), 10.0, day(1)).unwrap_err();
        assert!(err.is_fatal());
        assert!(rm.is_halted());

        rm.state_mut().available_capital = dec!(1000);
        assert!(rm.allocate("A", dec!(100), 10.0, day(1)).unwrap_err().is_fatal());
    }

    #[test]
    fn from_state_refuses_inconsistent_ledger() {
        let mut state = ResourceManagerState::new(dec!(1000));
        state.available_capital = dec!(10);
        assert!(ResourceManager::from_state(state).is_err());
    }

    #[test]
    fn state_round_trips_through_json() {
        let mut rm = ResourceManager::new(dec!(1000)).unwrap();
        rm.allocate("A", dec!(250.50), 10.0, day(1)).unwrap();
        rm.mark_run(day(1));
        let json = serde_json::to_string(rm.state()).unwrap();
        let back: ResourceManagerState = serde_json::from_str(&json).unwrap();
        assert_eq!(&back, rm.state());
    }
}

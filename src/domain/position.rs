//! Open positions and closed trades.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

use crate::domain::error::StockbotError;

/// Decimal places money amounts are rounded to.
pub const MONEY_DP: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub allocated: Decimal,
    pub entry_price: f64,
    pub entry_date: NaiveDate,
    /// Trading days since entry; 0 on the day of purchase.
    pub days_held: u32,
}

impl Position {
    /// price / entry_price
    pub fn return_ratio(&self, price: f64) -> f64 {
        if self.entry_price <= 0.0 {
            return 1.0;
        }
        price / self.entry_price
    }

    /// Allocated capital scaled by the price move, in whole cents.
    ///
    /// A move that cannot be represented is `DataUnavailable` for this
    /// symbol rather than a panic.
    pub fn value_at(&self, price: f64) -> Result<Decimal, StockbotError> {
        let ratio = Decimal::from_f64(self.return_ratio(price)).ok_or_else(|| {
            StockbotError::data_unavailable(
                &self.symbol,
                "close",
                format!("return ratio at {price} out of range"),
            )
        })?;
        self.allocated
            .checked_mul(ratio)
            .map(|v| v.round_dp(MONEY_DP))
            .ok_or_else(|| {
                StockbotError::data_unavailable(
                    &self.symbol,
                    "close",
                    format!("value of {} at {price} overflows", self.allocated),
                )
            })
    }

    /// True once price falls `stop_loss_pct` percent below entry.
    /// A zero percentage disables the check.
    pub fn should_stop_loss(&self, price: f64, stop_loss_pct: f64) -> bool {
        if stop_loss_pct <= 0.0 {
            return false;
        }
        price <= self.entry_price * (1.0 - stop_loss_pct / 100.0)
    }

    pub fn is_new(&self) -> bool {
        self.days_held == 0
    }

    /// Fold another buy into this position at a unit-weighted entry price.
    pub fn add(&mut self, amount: Decimal, price: f64) {
        let old = self.allocated.to_f64().unwrap_or(0.0);
        let extra = amount.to_f64().unwrap_or(0.0);
        let units = old / self.entry_price + extra / price;
        self.allocated += amount;
        if units > 0.0 {
            self.entry_price = (old + extra) / units;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub symbol: String,
    pub allocated: Decimal,
    pub realized: Decimal,
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_date: NaiveDate,
    pub exit_date: NaiveDate,
    pub days_held: u32,
}

impl ClosedTrade {
    pub fn pnl(&self) -> Decimal {
        self.realized - self.allocated
    }

    pub fn is_win(&self) -> bool {
        self.realized > self.allocated
    }
}

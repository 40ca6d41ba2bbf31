//! Market data and earnings event ports.
//!
//! Both are external collaborators: the engine never knows where bars or
//! earnings come from, and treats any failure as missing data.

use crate::domain::error::StockbotError;
use crate::domain::ohlcv::{EarningsEvent, OhlcvBar};
use chrono::NaiveDate;

pub trait MarketDataPort {
    /// Daily bars for `symbol` with `start <= date <= end`, ascending.
    fn fetch_daily(
        &self,
        symbol: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<OhlcvBar>, StockbotError>;

    fn list_symbols(&self) -> Result<Vec<String>, StockbotError>;
}

pub trait EarningsPort {
    fn fetch_earnings(&self, symbol: &str) -> Result<Vec<EarningsEvent>, StockbotError>;
}

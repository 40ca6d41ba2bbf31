//! Persistence ports for cached series and capital state.

use crate::domain::cache::{CacheMode, CachedSeries};
use crate::domain::error::StockbotError;
use crate::domain::resource_manager::ResourceManagerState;
use chrono::NaiveDate;

/// Summary row for one persisted series.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntryInfo {
    pub symbol: String,
    pub mode: CacheMode,
    pub rows: usize,
    pub last_date: Option<NaiveDate>,
}

/// One record per (symbol, mode).
///
/// `load_series` returns `CacheCorruption` for a record that exists but
/// cannot be trusted; callers fall back to a full refetch.
pub trait CacheStore {
    fn load_series(
        &self,
        symbol: &str,
        mode: CacheMode,
    ) -> Result<Option<CachedSeries>, StockbotError>;

    fn save_series(&self, series: &CachedSeries) -> Result<(), StockbotError>;

    fn list_series(&self) -> Result<Vec<CacheEntryInfo>, StockbotError>;
}

/// Durable home of the capital ledger between invocations.
pub trait StatePort {
    fn load_state(&self) -> Result<Option<ResourceManagerState>, StockbotError>;

    fn save_state(&self, state: &ResourceManagerState) -> Result<(), StockbotError>;
}

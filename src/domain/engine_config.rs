//! Resolved engine configuration.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::domain::aligner::SameDayPolicy;
use crate::domain::cache::{CacheMode, DEFAULT_CACHE_LEN};
use crate::domain::decision::EngineParams;
use crate::domain::model::ModelKind;

pub const DEFAULT_WINDOW_LEN: usize = 60;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub symbols: Vec<String>,
    pub mode: CacheMode,
    pub window_len: usize,
    pub cache_len: usize,
    pub params: EngineParams,
    pub same_day_policy: SameDayPolicy,
    pub parallel: bool,
    pub initial_capital: Decimal,
    pub model_kinds: Vec<ModelKind>,
    pub history_start: NaiveDate,
    pub history_end: Option<NaiveDate>,
    pub replay_range: Option<(NaiveDate, NaiveDate)>,
}

impl EngineConfig {
    /// Defaults for everything except the universe and capital.
    pub fn new(symbols: Vec<String>, initial_capital: Decimal, model_kinds: Vec<ModelKind>) -> Self {
        Self {
            symbols,
            mode: CacheMode::Online,
            window_len: DEFAULT_WINDOW_LEN,
            cache_len: DEFAULT_CACHE_LEN,
            params: EngineParams::default(),
            same_day_policy: SameDayPolicy::default(),
            parallel: true,
            initial_capital,
            model_kinds,
            history_start: default_history_start(),
            history_end: None,
            replay_range: None,
        }
    }
}

pub fn default_history_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or_default()
}

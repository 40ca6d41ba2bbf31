//! One trading day: gather every symbol's votes, then decide.
//!
//! The gather phase runs per symbol in parallel and is read-only with
//! respect to capital. Collecting its results is the barrier; the decision
//! pass that follows is the only writer to the `ResourceManager`.

use chrono::{Datelike, NaiveDate, Weekday};
use rayon::prelude::*;
use std::collections::BTreeSet;
use tracing::{info, warn};

use crate::domain::cache::{CacheMode, DataCache};
use crate::domain::decision::{Action, DecisionEngine, DecisionRecord, SymbolSnapshot};
use crate::domain::ensemble::PredictorEnsemble;
use crate::domain::error::StockbotError;
use crate::domain::features::FeatureWindowBuilder;
use crate::domain::indicator::IndicatorKey;
use crate::domain::resource_manager::ResourceManager;
use crate::ports::data_port::EarningsPort;

/// Weekends are closed; exchange holidays surface as missing bars.
pub fn is_trading_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleSettings {
    pub symbols: Vec<String>,
    pub mode: CacheMode,
    /// Gather symbols on the rayon pool instead of sequentially.
    pub parallel: bool,
}

pub struct DailyCycle<'a> {
    cache: &'a DataCache<'a>,
    earnings: &'a (dyn EarningsPort + Sync),
    ensemble: &'a PredictorEnsemble,
    windows: FeatureWindowBuilder,
    engine: DecisionEngine,
    settings: CycleSettings,
}

impl<'a> DailyCycle<'a> {
    pub fn new(
        cache: &'a DataCache<'a>,
        earnings: &'a (dyn EarningsPort + Sync),
        ensemble: &'a PredictorEnsemble,
        windows: FeatureWindowBuilder,
        engine: DecisionEngine,
        settings: CycleSettings,
    ) -> Self {
        Self {
            cache,
            earnings,
            ensemble,
            windows,
            engine,
            settings,
        }
    }

    /// Run the full cycle for `date` against `resources`.
    ///
    /// Non-trading days and dates at or before the ledger's last run are
    /// no-ops. Only a capital invariant violation is returned as an error.
    pub fn run_once(
        &self,
        date: NaiveDate,
        resources: &mut ResourceManager,
    ) -> Result<Vec<DecisionRecord>, StockbotError> {
        if !is_trading_day(date) {
            info!(%date, "not a trading day, skipping");
            return Ok(Vec::new());
        }
        if let Some(last) = resources.state().last_run {
            if last >= date {
                warn!(%date, %last, "cycle already ran for this date, skipping");
                return Ok(Vec::new());
            }
        }

        let universe = self.universe(resources);
        info!(%date, symbols = universe.len(), mode = %self.settings.mode, "cycle start");

        let snapshots = self.gather(&universe, date);
        let records = self.engine.decide(date, &snapshots, resources)?;
        resources.mark_run(date);

        let count = |action: Action| records.iter().filter(|r| r.action == action).count();
        info!(
            %date,
            buys = count(Action::Buy),
            sells = count(Action::Sell),
            available = %resources.available(),
            total = %resources.total(),
            "cycle finished"
        );
        Ok(records)
    }

    /// Configured symbols plus anything still held.
    fn universe(&self, resources: &ResourceManager) -> Vec<String> {
        let mut all: BTreeSet<String> = self.settings.symbols.iter().cloned().collect();
        all.extend(resources.positions().map(|p| p.symbol.clone()));
        all.into_iter().collect()
    }

    fn gather(&self, symbols: &[String], date: NaiveDate) -> Vec<SymbolSnapshot> {
        if self.settings.parallel {
            symbols
                .par_iter()
                .map(|symbol| self.snapshot(symbol, date))
                .collect()
        } else {
            symbols
                .iter()
                .map(|symbol| self.snapshot(symbol, date))
                .collect()
        }
    }

    fn snapshot(&self, symbol: &str, date: NaiveDate) -> SymbolSnapshot {
        let series = match self
            .cache
            .get_or_fetch(symbol, IndicatorKey::Close, self.settings.mode, date)
        {
            Ok(series) => series,
            Err(e) => {
                warn!(symbol, error = %e, "symbol skipped");
                return SymbolSnapshot {
                    symbol: symbol.to_string(),
                    price: None,
                    outcome: Err(e),
                };
            }
        };

        let events = if self.needs_events() {
            match self.earnings.fetch_earnings(symbol) {
                Ok(events) => Some(events),
                Err(e) => {
                    warn!(symbol, error = %e, "earnings unavailable");
                    None
                }
            }
        } else {
            None
        };

        let outcome = self
            .ensemble
            .evaluate(&series, events.as_deref(), &self.windows, date);
        if let Err(e) = &outcome {
            warn!(symbol, error = %e, "symbol skipped");
        }

        SymbolSnapshot {
            symbol: symbol.to_string(),
            price: series.close_on_or_before(date).map(|(_, close)| close),
            outcome,
        }
    }

    fn needs_events(&self) -> bool {
        self.ensemble
            .members()
            .iter()
            .any(|m| m.required_keys().iter().any(|k| k.is_event_aligned()))
    }
}

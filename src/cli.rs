//! CLI definition and dispatch.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::csv_report_adapter::CsvReportAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::json_store::JsonStore;
use crate::adapters::linear_predictor::{linear_builder, model_path};
use crate::domain::cache::{CacheMode, CacheSettings, CachedSeries, DataCache};
use crate::domain::config_validation::{
    parse_date, validate_engine_config, validate_storage_config,
};
use crate::domain::cycle::{CycleSettings, DailyCycle};
use crate::domain::decision::{AllocationRule, DecisionEngine, DecisionRecord, EngineParams};
use crate::domain::engine_config::{DEFAULT_WINDOW_LEN, EngineConfig, default_history_start};
use crate::domain::ensemble::PredictorEnsemble;
use crate::domain::error::StockbotError;
use crate::domain::features::FeatureWindowBuilder;
use crate::domain::indicator::IndicatorKey;
use crate::domain::model::parse_kinds;
use crate::domain::ohlcv::EarningsEvent;
use crate::domain::position::Position;
use crate::domain::replay::replay;
use crate::domain::resource_manager::ResourceManager;
use crate::domain::training::train_predictor;
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::{EarningsPort, MarketDataPort};
use crate::ports::report_port::ReportPort;
use crate::ports::store_port::{CacheStore, StatePort};

#[derive(Parser, Debug)]
#[command(name = "stockbot", about = "Daily ensemble-driven trading engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one daily cycle
    Run {
        #[arg(short, long)]
        config: PathBuf,
        /// Trading date (YYYY-MM-DD)
        #[arg(short, long)]
        date: NaiveDate,
    },
    /// Replay a historical range day by day in offline mode
    Replay {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
    },
    /// Train every configured model on offline history
    Train {
        #[arg(short, long)]
        config: PathBuf,
        /// Last date of training history (YYYY-MM-DD)
        #[arg(long)]
        until: NaiveDate,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show capital, positions and cached series
    Status {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    let result = match cli.command {
        Command::Run { config, date } => run_daily(&config, date),
        Command::Replay { config, start, end } => run_replay(&config, start, end),
        Command::Train { config, until } => run_train(&config, until),
        Command::Validate { config } => run_validate(&config),
        Command::Status { config } => run_status(&config),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, StockbotError> {
    FileConfigAdapter::from_file(path)
}

/// Load, validate and resolve a configuration file.
pub fn load_engine(path: &Path) -> Result<(FileConfigAdapter, EngineConfig), StockbotError> {
    eprintln!("Loading config from {}", path.display());
    let adapter = load_config(path)?;
    validate_engine_config(&adapter)?;
    validate_storage_config(&adapter)?;
    let engine = build_engine_config(&adapter)?;
    Ok((adapter, engine))
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> StockbotError {
    StockbotError::ConfigInvalid {
        section: section.into(),
        key: key.into(),
        reason: reason.into(),
    }
}

fn parse_setting<T>(config: &dyn ConfigPort, section: &str, key: &str) -> Result<Option<T>, StockbotError>
where
    T: FromStr<Err = String>,
{
    config
        .get_string(section, key)
        .map(|raw| raw.parse::<T>().map_err(|e| invalid(section, key, e)))
        .transpose()
}

fn positive_usize(config: &dyn ConfigPort, key: &str, default: usize) -> Result<usize, StockbotError> {
    let value = config.get_int("engine", key, default as i64);
    usize::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| invalid("engine", key, format!("{key} must be at least 1")))
}

fn decimal_setting(config: &dyn ConfigPort, section: &str, key: &str) -> Result<Option<Decimal>, StockbotError> {
    config
        .get_string(section, key)
        .map(|raw| {
            Decimal::from_str(&raw)
                .map_err(|e| invalid(section, key, format!("invalid amount '{raw}': {e}")))
        })
        .transpose()
}

pub fn build_engine_config(config: &dyn ConfigPort) -> Result<EngineConfig, StockbotError> {
    let symbols: Vec<String> = config
        .get_list("engine", "symbols")
        .into_iter()
        .map(|s| s.to_uppercase())
        .collect();
    if symbols.is_empty() {
        return Err(StockbotError::ConfigMissing {
            section: "engine".into(),
            key: "symbols".into(),
        });
    }

    let initial_capital = decimal_setting(config, "capital", "initial_capital")?.ok_or_else(|| {
        StockbotError::ConfigMissing {
            section: "capital".into(),
            key: "initial_capital".into(),
        }
    })?;

    let kinds_raw = config
        .get_string("models", "kinds")
        .ok_or_else(|| StockbotError::ConfigMissing {
            section: "models".into(),
            key: "kinds".into(),
        })?;
    let model_kinds = parse_kinds(&kinds_raw).map_err(|e| invalid("models", "kinds", e))?;

    let mut engine = EngineConfig::new(symbols, initial_capital, model_kinds);

    if let Some(mode) = parse_setting::<CacheMode>(config, "engine", "mode")? {
        engine.mode = mode;
    }
    engine.window_len = positive_usize(config, "window_len", DEFAULT_WINDOW_LEN)?;
    engine.cache_len = positive_usize(config, "cache_len", engine.cache_len)?;
    if engine.window_len > engine.cache_len {
        return Err(invalid(
            "engine",
            "cache_len",
            "cache_len must be at least window_len",
        ));
    }
    if let Some(policy) = parse_setting(config, "engine", "same_day_earnings")? {
        engine.same_day_policy = policy;
    }
    engine.parallel = config.get_bool("engine", "parallel", true);

    let defaults = EngineParams::default();
    let allocation = match decimal_setting(config, "engine", "allocation_amount")? {
        Some(amount) => AllocationRule::Fixed(amount),
        None => AllocationRule::FractionOfTotal(config.get_double("engine", "position_size", 0.1)),
    };
    engine.params = EngineParams {
        prediction_threshold: config.get_double(
            "engine",
            "prediction_threshold",
            defaults.prediction_threshold,
        ),
        risk_reward_ratio: config.get_double("engine", "risk_reward_ratio", defaults.risk_reward_ratio),
        max_hold_index: positive_usize(config, "max_hold_index", defaults.max_hold_index as usize)?
            as u32,
        hold_threshold: config.get_double("engine", "hold_threshold", defaults.hold_threshold),
        stop_loss_pct: config.get_double("engine", "stop_loss_pct", defaults.stop_loss_pct),
        allocation,
        max_positions: positive_usize(config, "max_positions", defaults.max_positions)?,
        quorum: parse_setting(config, "engine", "quorum")?.unwrap_or(defaults.quorum),
    };

    engine.history_start = match config.get_string("data", "history_start") {
        Some(raw) => parse_date(Some(&raw), "data", "history_start")?,
        None => default_history_start(),
    };
    engine.history_end = config
        .get_string("data", "history_end")
        .map(|raw| parse_date(Some(&raw), "data", "history_end"))
        .transpose()?;

    let replay_start = config.get_string("replay", "start_date");
    let replay_end = config.get_string("replay", "end_date");
    if replay_start.is_some() || replay_end.is_some() {
        engine.replay_range = Some((
            parse_date(replay_start.as_deref(), "replay", "start_date")?,
            parse_date(replay_end.as_deref(), "replay", "end_date")?,
        ));
    }

    Ok(engine)
}

/// Market data, earnings and persistence selected by configuration.
pub struct Backends {
    pub market: Box<dyn MarketDataPort + Sync>,
    pub earnings: Box<dyn EarningsPort + Sync>,
    pub cache: Box<dyn CacheStore + Sync>,
    pub state: Box<dyn StatePort>,
}

pub fn build_backends(config: &dyn ConfigPort) -> Result<Backends, StockbotError> {
    let csv_dir = PathBuf::from(
        config
            .get_string("data", "csv_dir")
            .unwrap_or_else(|| "data".to_string()),
    );
    let backends = Backends {
        market: Box::new(CsvAdapter::new(csv_dir.clone())),
        earnings: Box::new(CsvAdapter::new(csv_dir)),
        cache: Box::new(JsonStore::from_config(config)),
        state: Box::new(JsonStore::from_config(config)),
    };
    with_sqlite(config, backends)
}

#[cfg(feature = "sqlite")]
fn with_sqlite(config: &dyn ConfigPort, mut backends: Backends) -> Result<Backends, StockbotError> {
    use crate::adapters::sqlite_adapter::SqliteAdapter;

    let is_sqlite = |section: &str, key: &str| {
        config
            .get_string(section, key)
            .is_some_and(|v| v.eq_ignore_ascii_case("sqlite"))
    };
    let data_in_db = is_sqlite("data", "source");
    let storage_in_db = is_sqlite("storage", "backend");
    if data_in_db || storage_in_db {
        let db = SqliteAdapter::from_config(config)?;
        if data_in_db {
            backends.market = Box::new(db.clone());
            backends.earnings = Box::new(db.clone());
        }
        if storage_in_db {
            backends.cache = Box::new(db.clone());
            backends.state = Box::new(db);
        }
    }
    Ok(backends)
}

#[cfg(not(feature = "sqlite"))]
fn with_sqlite(_config: &dyn ConfigPort, backends: Backends) -> Result<Backends, StockbotError> {
    Ok(backends)
}

fn models_dir(config: &dyn ConfigPort) -> PathBuf {
    PathBuf::from(
        config
            .get_string("models", "dir")
            .unwrap_or_else(|| "models".to_string()),
    )
}

/// One member per configured kind, restored from `dir` where a trained
/// model exists.
pub fn load_ensemble(engine: &EngineConfig, dir: &Path) -> Result<PredictorEnsemble, StockbotError> {
    let mut ensemble =
        PredictorEnsemble::from_builder(&engine.model_kinds, engine.window_len, &linear_builder)?;
    for member in ensemble.members_mut() {
        let path = model_path(dir, member.kind());
        if path.exists() {
            member.load(&path)?;
            info!(model = member.id(), path = %path.display(), "model loaded");
        } else {
            warn!(model = member.id(), path = %path.display(), "no trained model, votes are neutral");
        }
    }
    Ok(ensemble)
}

fn load_resources(
    state: &dyn StatePort,
    initial_capital: Decimal,
) -> Result<ResourceManager, StockbotError> {
    match state.load_state()? {
        Some(saved) => ResourceManager::from_state(saved),
        None => {
            info!(%initial_capital, "no saved state, starting fresh");
            ResourceManager::new(initial_capital)
        }
    }
}

fn cycle_settings(engine: &EngineConfig, mode: CacheMode) -> CycleSettings {
    CycleSettings {
        symbols: engine.symbols.clone(),
        mode,
        parallel: engine.parallel,
    }
}

fn print_records(records: &[DecisionRecord]) {
    for r in records {
        let aggregate = r
            .aggregate
            .map(|a| format!("{a:.4}"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:<8} {:<5} {:<12} {:>8}  {}",
            r.date,
            r.symbol,
            r.action.to_string(),
            r.state.to_string(),
            aggregate,
            r.rationale
        );
    }
}

fn write_report(
    config: &dyn ConfigPort,
    records: &[DecisionRecord],
    resources: &ResourceManager,
) -> Result<(), StockbotError> {
    if let Some(path) = config.get_string("report", "path") {
        CsvReportAdapter::new(&path).write_decisions(records, resources.state())?;
        eprintln!("Decisions written to {path}");
    }
    Ok(())
}

fn run_daily(config_path: &Path, date: NaiveDate) -> Result<(), StockbotError> {
    let (adapter, engine) = load_engine(config_path)?;
    let backends = build_backends(&adapter)?;
    let mut resources = load_resources(backends.state.as_ref(), engine.initial_capital)?;

    let settings = CacheSettings {
        capacity: engine.cache_len,
        offline_start: engine.history_start,
        offline_end: engine.history_end.unwrap_or(date),
    };
    let cache = DataCache::new(backends.market.as_ref(), settings).with_store(backends.cache.as_ref());
    let ensemble = load_ensemble(&engine, &models_dir(&adapter))?;
    let cycle = DailyCycle::new(
        &cache,
        backends.earnings.as_ref(),
        &ensemble,
        FeatureWindowBuilder::new(engine.window_len, engine.same_day_policy),
        DecisionEngine::new(engine.params.clone()),
        cycle_settings(&engine, engine.mode),
    );

    let records = cycle.run_once(date, &mut resources)?;
    backends.state.save_state(resources.state())?;

    print_records(&records);
    println!(
        "available {}  total {}  positions {}",
        resources.available(),
        resources.total(),
        resources.position_count()
    );
    write_report(&adapter, &records, &resources)
}

fn run_replay(
    config_path: &Path,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<(), StockbotError> {
    let (adapter, engine) = load_engine(config_path)?;
    let (start, end) = match (start, end, engine.replay_range) {
        (Some(s), Some(e), _) => (s, e),
        (s, e, Some((cs, ce))) => (s.unwrap_or(cs), e.unwrap_or(ce)),
        _ => {
            return Err(StockbotError::ConfigMissing {
                section: "replay".into(),
                key: "start_date".into(),
            });
        }
    };
    if start > end {
        return Err(invalid("replay", "start_date", "start_date must not be after end_date"));
    }

    let backends = build_backends(&adapter)?;
    let settings = CacheSettings {
        capacity: engine.cache_len,
        offline_start: engine.history_start,
        offline_end: engine.history_end.unwrap_or(end),
    };
    let cache = DataCache::new(backends.market.as_ref(), settings).with_store(backends.cache.as_ref());
    let ensemble = load_ensemble(&engine, &models_dir(&adapter))?;
    let cycle = DailyCycle::new(
        &cache,
        backends.earnings.as_ref(),
        &ensemble,
        FeatureWindowBuilder::new(engine.window_len, engine.same_day_policy),
        DecisionEngine::new(engine.params.clone()),
        cycle_settings(&engine, CacheMode::Offline),
    );

    eprintln!("Replaying {start} to {end}...");
    let mut resources = ResourceManager::new(engine.initial_capital)?;
    let summary = replay(&cycle, &mut resources, start, end)?;

    let pnl = summary.final_total - engine.initial_capital;
    println!("Replay {} to {}", summary.start, summary.end);
    println!("  trading days:   {}", summary.trading_days);
    println!("  buys / sells:   {} / {}", summary.buys, summary.sells);
    println!("  final total:    {}", summary.final_total);
    println!("  final available:{}", summary.final_available);
    println!("  pnl:            {pnl}");
    println!("  open positions: {}", summary.open_positions);
    match summary.hit_rate.ratio() {
        Some(ratio) => println!(
            "  hit rate:       {:.1}% ({}/{})",
            ratio * 100.0,
            summary.hit_rate.hits,
            summary.hit_rate.scored
        ),
        None => println!("  hit rate:       n/a"),
    }
    write_report(&adapter, &summary.records, &resources)
}

fn run_train(config_path: &Path, until: NaiveDate) -> Result<(), StockbotError> {
    let (adapter, engine) = load_engine(config_path)?;
    let backends = build_backends(&adapter)?;
    let settings = CacheSettings {
        capacity: engine.cache_len,
        offline_start: engine.history_start,
        offline_end: until,
    };
    let cache = DataCache::new(backends.market.as_ref(), settings).with_store(backends.cache.as_ref());

    let mut histories: Vec<(Arc<CachedSeries>, Option<Vec<EarningsEvent>>)> = Vec::new();
    for symbol in &engine.symbols {
        let series = match cache.get_or_fetch(symbol, IndicatorKey::Close, CacheMode::Offline, until) {
            Ok(series) => series,
            Err(e) => {
                warn!(symbol = symbol.as_str(), error = %e, "no training history");
                continue;
            }
        };
        let events = match backends.earnings.fetch_earnings(symbol) {
            Ok(events) => Some(events),
            Err(e) => {
                warn!(symbol = symbol.as_str(), error = %e, "earnings unavailable");
                None
            }
        };
        histories.push((series, events));
    }
    let views: Vec<(&CachedSeries, Option<&[EarningsEvent]>)> = histories
        .iter()
        .map(|(series, events)| (series.as_ref(), events.as_deref()))
        .collect();

    let dir = models_dir(&adapter);
    let windows = FeatureWindowBuilder::new(engine.window_len, engine.same_day_policy);
    let mut ensemble =
        PredictorEnsemble::from_builder(&engine.model_kinds, engine.window_len, &linear_builder)?;
    for member in ensemble.members_mut() {
        let examples = train_predictor(member.as_mut(), &views, &windows)?;
        let path = model_path(&dir, member.kind());
        member.save(&path)?;
        println!("{:<14} {examples:>7} examples  -> {}", member.id(), path.display());
    }
    Ok(())
}

/// Configured symbols the market data source holds no bars for.
pub fn symbols_without_data(
    market: &dyn MarketDataPort,
    symbols: &[String],
) -> Result<Vec<String>, StockbotError> {
    let known = market.list_symbols()?;
    Ok(symbols
        .iter()
        .filter(|s| !known.contains(s))
        .cloned()
        .collect())
}

fn run_validate(config_path: &Path) -> Result<(), StockbotError> {
    let (adapter, engine) = load_engine(config_path)?;
    let backends = build_backends(&adapter)?;
    let kinds: Vec<&str> = engine.model_kinds.iter().map(|k| k.as_str()).collect();

    println!("symbols:        {}", engine.symbols.join(", "));
    println!("mode:           {}", engine.mode);
    println!("window / cache: {} / {}", engine.window_len, engine.cache_len);
    println!("models:         {}", kinds.join(", "));
    println!("quorum:         {}", engine.params.quorum);
    println!("capital:        {}", engine.initial_capital);
    match symbols_without_data(backends.market.as_ref(), &engine.symbols) {
        Ok(missing) if missing.is_empty() => {}
        Ok(missing) => {
            warn!(symbols = ?missing, "no market data for configured symbols");
            println!("no data:        {}", missing.join(", "));
        }
        Err(e) => warn!(error = %e, "market data source cannot list symbols"),
    }
    eprintln!("\nConfiguration is valid.");
    Ok(())
}

/// Value of `position` at the latest close held in the persisted cache.
pub fn mark_position(
    cache: &dyn CacheStore,
    mode: CacheMode,
    position: &Position,
) -> Option<(NaiveDate, Decimal)> {
    let series = match cache.load_series(&position.symbol, mode) {
        Ok(series) => series?,
        Err(e) => {
            warn!(symbol = %position.symbol, error = %e, "cached series unreadable");
            return None;
        }
    };
    let (date, close) = series.close_on_or_before(series.last_date()?)?;
    match position.value_at(close) {
        Ok(value) => Some((date, value)),
        Err(e) => {
            warn!(symbol = %position.symbol, error = %e, "position cannot be valued");
            None
        }
    }
}

fn run_status(config_path: &Path) -> Result<(), StockbotError> {
    let (adapter, engine) = load_engine(config_path)?;
    let backends = build_backends(&adapter)?;

    match backends.state.load_state()? {
        Some(state) => {
            let resources = ResourceManager::from_state(state)?;
            let state = resources.state();
            println!("total:      {}", state.total_capital);
            println!("available:  {}", state.available_capital);
            println!("allocated:  {}", state.allocated());
            match state.last_run {
                Some(date) => println!("last run:   {date}"),
                None => println!("last run:   never"),
            }
            println!(
                "closed:     {} trades, {} won",
                state.trades_closed, state.trades_won
            );
            for p in resources.positions() {
                let value = match mark_position(backends.cache.as_ref(), engine.mode, p) {
                    Some((date, value)) => format!("value {value} on {date}"),
                    None => "value -".to_string(),
                };
                println!(
                    "  {:<8} {:>12} entry {:>10.4} on {} day {}  {value}",
                    p.symbol, p.allocated, p.entry_price, p.entry_date, p.days_held
                );
            }
        }
        None => println!("no saved state (initial capital {})", engine.initial_capital),
    }

    let entries = backends.cache.list_series()?;
    println!("cached series: {}", entries.len());
    for entry in entries {
        let last = entry
            .last_date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<8} {:<8} {:>5} rows  last {last}",
            entry.symbol,
            entry.mode.as_str(),
            entry.rows
        );
    }
    Ok(())
}

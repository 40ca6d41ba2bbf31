//! Configuration validation.
//!
//! Checks every engine, capital, model and storage field before a run.

use crate::domain::aligner::SameDayPolicy;
use crate::domain::cache::CacheMode;
use crate::domain::decision::AllocationRule;
use crate::domain::ensemble::QuorumPolicy;
use crate::domain::error::StockbotError;
use crate::domain::model::parse_kinds;
use crate::ports::config_port::ConfigPort;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::str::FromStr;

pub fn validate_engine_config(config: &dyn ConfigPort) -> Result<(), StockbotError> {
    validate_symbols(config)?;
    validate_enum::<CacheMode>(config, "engine", "mode")?;
    validate_lengths(config)?;
    validate_ratios(config)?;
    validate_max_hold(config)?;
    validate_stop_loss(config)?;
    validate_allocation(config)?;
    validate_max_positions(config)?;
    validate_enum::<QuorumPolicy>(config, "engine", "quorum")?;
    validate_enum::<SameDayPolicy>(config, "engine", "same_day_earnings")?;
    validate_initial_capital(config)?;
    validate_models(config)?;
    validate_replay_dates(config)?;
    Ok(())
}

pub fn validate_storage_config(config: &dyn ConfigPort) -> Result<(), StockbotError> {
    validate_backend(config, "storage", "backend", "json")?;
    validate_backend(config, "data", "source", "csv")
}

fn validate_backend(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    file_backend: &str,
) -> Result<(), StockbotError> {
    let value = config.get_string(section, key).map(|s| s.to_lowercase());
    match value.as_deref() {
        None => Ok(()),
        Some(v) if v == file_backend => Ok(()),
        Some("sqlite") if cfg!(feature = "sqlite") => Ok(()),
        Some("sqlite") => Err(invalid(section, key, "sqlite requires the sqlite feature")),
        Some(other) => Err(invalid(
            section,
            key,
            format!("unknown backend '{other}', expected {file_backend} or sqlite"),
        )),
    }
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> StockbotError {
    StockbotError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn validate_symbols(config: &dyn ConfigPort) -> Result<(), StockbotError> {
    let symbols = config.get_list("engine", "symbols");
    if symbols.is_empty() {
        return Err(StockbotError::ConfigMissing {
            section: "engine".to_string(),
            key: "symbols".to_string(),
        });
    }
    let mut seen = HashSet::new();
    for symbol in &symbols {
        let valid = symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
        if !valid {
            return Err(invalid(
                "engine",
                "symbols",
                format!("invalid symbol '{symbol}'"),
            ));
        }
        if !seen.insert(symbol.to_uppercase()) {
            return Err(invalid(
                "engine",
                "symbols",
                format!("symbol '{symbol}' listed twice"),
            ));
        }
    }
    Ok(())
}

fn validate_enum<T>(config: &dyn ConfigPort, section: &str, key: &str) -> Result<(), StockbotError>
where
    T: FromStr<Err = String>,
{
    match config.get_string(section, key) {
        Some(raw) => raw.parse::<T>().map(|_| ()).map_err(|e| invalid(section, key, e)),
        None => Ok(()),
    }
}

fn validate_lengths(config: &dyn ConfigPort) -> Result<(), StockbotError> {
    let window_len = config.get_int("engine", "window_len", 60);
    let cache_len = config.get_int("engine", "cache_len", 280);
    if window_len < 1 {
        return Err(invalid("engine", "window_len", "window_len must be at least 1"));
    }
    if cache_len < window_len {
        return Err(invalid(
            "engine",
            "cache_len",
            "cache_len must be at least window_len",
        ));
    }
    Ok(())
}

fn validate_ratios(config: &dyn ConfigPort) -> Result<(), StockbotError> {
    for (key, default) in [
        ("prediction_threshold", 1.02),
        ("risk_reward_ratio", 1.01),
        ("hold_threshold", 1.0),
    ] {
        let value = config.get_double("engine", key, default);
        if !value.is_finite() || value <= 0.0 {
            return Err(invalid("engine", key, format!("{key} must be positive")));
        }
    }
    Ok(())
}

fn validate_max_hold(config: &dyn ConfigPort) -> Result<(), StockbotError> {
    if config.get_int("engine", "max_hold_index", 5) < 1 {
        return Err(invalid(
            "engine",
            "max_hold_index",
            "max_hold_index must be at least 1",
        ));
    }
    Ok(())
}

fn validate_stop_loss(config: &dyn ConfigPort) -> Result<(), StockbotError> {
    let value = config.get_double("engine", "stop_loss_pct", 0.0);
    if !(0.0..100.0).contains(&value) {
        return Err(invalid(
            "engine",
            "stop_loss_pct",
            "stop_loss_pct must be between 0 and 100",
        ));
    }
    Ok(())
}

fn validate_allocation(config: &dyn ConfigPort) -> Result<(), StockbotError> {
    if let Some(raw) = config.get_string("engine", "allocation_amount") {
        return match Decimal::from_str(raw.trim()) {
            Ok(amount) if amount > Decimal::ZERO => Ok(()),
            _ => Err(invalid(
                "engine",
                "allocation_amount",
                "allocation_amount must be a positive amount",
            )),
        };
    }
    let value = config.get_double("engine", "position_size", 0.1);
    if value <= 0.0 || value > 1.0 {
        return Err(invalid(
            "engine",
            "position_size",
            "position_size must be between 0 and 1",
        ));
    }
    let capital = config
        .get_string("capital", "initial_capital")
        .and_then(|raw| Decimal::from_str(raw.trim()).ok());
    if let Some(capital) = capital {
        if AllocationRule::FractionOfTotal(value).amount(capital) <= Decimal::ZERO {
            return Err(invalid(
                "engine",
                "position_size",
                format!("position_size {value} of initial_capital {capital} rounds to zero"),
            ));
        }
    }
    Ok(())
}

fn validate_max_positions(config: &dyn ConfigPort) -> Result<(), StockbotError> {
    if config.get_int("engine", "max_positions", 10) < 1 {
        return Err(invalid(
            "engine",
            "max_positions",
            "max_positions must be at least 1",
        ));
    }
    Ok(())
}

fn validate_initial_capital(config: &dyn ConfigPort) -> Result<(), StockbotError> {
    let raw = config
        .get_string("capital", "initial_capital")
        .ok_or_else(|| StockbotError::ConfigMissing {
            section: "capital".to_string(),
            key: "initial_capital".to_string(),
        })?;
    match Decimal::from_str(raw.trim()) {
        Ok(value) if value > Decimal::ZERO => Ok(()),
        _ => Err(invalid(
            "capital",
            "initial_capital",
            "initial_capital must be positive",
        )),
    }
}

fn validate_models(config: &dyn ConfigPort) -> Result<(), StockbotError> {
    let raw = config
        .get_string("models", "kinds")
        .ok_or_else(|| StockbotError::ConfigMissing {
            section: "models".to_string(),
            key: "kinds".to_string(),
        })?;
    let kinds = parse_kinds(&raw).map_err(|e| invalid("models", "kinds", e))?;
    if kinds.is_empty() {
        return Err(invalid("models", "kinds", "at least one model kind is required"));
    }
    Ok(())
}

fn validate_replay_dates(config: &dyn ConfigPort) -> Result<(), StockbotError> {
    let start = config.get_string("replay", "start_date");
    let end = config.get_string("replay", "end_date");
    let (start, end) = match (start, end) {
        (None, None) => return Ok(()),
        (start, end) => (
            parse_date(start.as_deref(), "replay", "start_date")?,
            parse_date(end.as_deref(), "replay", "end_date")?,
        ),
    };
    if start > end {
        return Err(invalid(
            "replay",
            "start_date",
            "start_date must not be after end_date",
        ));
    }
    Ok(())
}

pub fn parse_date(value: Option<&str>, section: &str, field: &str) -> Result<NaiveDate, StockbotError> {
    match value {
        None => Err(StockbotError::ConfigMissing {
            section: section.to_string(),
            key: field.to_string(),
        }),
        Some(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| {
            invalid(
                section,
                field,
                format!("invalid {field} format, expected YYYY-MM-DD"),
            )
        }),
    }
}

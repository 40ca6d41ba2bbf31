//! CSV file data adapter.
//!
//! Bars live in `{SYMBOL}.csv` (`date,open,high,low,close,volume`) and
//! earnings in `{SYMBOL}_earnings.csv` (`date,estimated,actual`).

use crate::domain::error::StockbotError;
use crate::domain::ohlcv::{EarningsEvent, OhlcvBar};
use crate::ports::data_port::{EarningsPort, MarketDataPort};
use chrono::NaiveDate;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

const EARNINGS_SUFFIX: &str = "_earnings.csv";

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn bars_path(&self, symbol: &str) -> PathBuf {
        self.base_path.join(format!("{symbol}.csv"))
    }

    fn earnings_path(&self, symbol: &str) -> PathBuf {
        self.base_path.join(format!("{symbol}{EARNINGS_SUFFIX}"))
    }
}

fn column<T>(
    record: &csv::StringRecord,
    index: usize,
    name: &str,
    symbol: &str,
) -> Result<T, StockbotError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = record
        .get(index)
        .ok_or_else(|| StockbotError::data_unavailable(symbol, name, "missing column"))?;
    raw.trim().parse().map_err(|e| {
        StockbotError::data_unavailable(symbol, name, format!("invalid value '{raw}': {e}"))
    })
}

fn date_column(record: &csv::StringRecord, symbol: &str) -> Result<NaiveDate, StockbotError> {
    let raw = record
        .get(0)
        .ok_or_else(|| StockbotError::data_unavailable(symbol, "date", "missing column"))?;
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|e| {
        StockbotError::data_unavailable(symbol, "date", format!("invalid date '{raw}': {e}"))
    })
}

impl MarketDataPort for CsvAdapter {
    fn fetch_daily(
        &self,
        symbol: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<OhlcvBar>, StockbotError> {
        let path = self.bars_path(symbol);
        let content = fs::read_to_string(&path).map_err(|e| {
            StockbotError::data_unavailable(
                symbol,
                "close",
                format!("failed to read {}: {e}", path.display()),
            )
        })?;

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let mut bars = Vec::new();

        for result in rdr.records() {
            let record = result.map_err(|e| {
                StockbotError::data_unavailable(symbol, "close", format!("CSV parse error: {e}"))
            })?;

            let date = date_column(&record, symbol)?;
            if date < start_date || date > end_date {
                continue;
            }

            bars.push(OhlcvBar {
                symbol: symbol.to_string(),
                date,
                open: column(&record, 1, "open", symbol)?,
                high: column(&record, 2, "high", symbol)?,
                low: column(&record, 3, "low", symbol)?,
                close: column(&record, 4, "close", symbol)?,
                volume: column(&record, 5, "volume", symbol)?,
            });
        }

        bars.sort_by_key(|b| b.date);
        Ok(bars)
    }

    fn list_symbols(&self) -> Result<Vec<String>, StockbotError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| StockbotError::Storage {
            reason: format!(
                "failed to read directory {}: {e}",
                self.base_path.display()
            ),
        })?;

        let mut symbols = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.ends_with(EARNINGS_SUFFIX) {
                continue;
            }
            if let Some(symbol) = name.strip_suffix(".csv") {
                symbols.push(symbol.to_string());
            }
        }

        symbols.sort();
        Ok(symbols)
    }
}

impl EarningsPort for CsvAdapter {
    /// A symbol without an earnings file has no events.
    fn fetch_earnings(&self, symbol: &str) -> Result<Vec<EarningsEvent>, StockbotError> {
        let path = self.earnings_path(symbol);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path).map_err(|e| {
            StockbotError::data_unavailable(
                symbol,
                "earnings_diff",
                format!("failed to read {}: {e}", path.display()),
            )
        })?;

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let mut events = Vec::new();
        for result in rdr.records() {
            let record = result.map_err(|e| {
                StockbotError::data_unavailable(
                    symbol,
                    "earnings_diff",
                    format!("CSV parse error: {e}"),
                )
            })?;
            events.push(EarningsEvent {
                date: date_column(&record, symbol)?,
                estimated: column(&record, 1, "estimated", symbol)?,
                actual: column(&record, 2, "actual", symbol)?,
            });
        }

        events.sort_by_key(|e| e.date);
        Ok(events)
    }
}

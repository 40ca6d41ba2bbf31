//! SQLite adapter: market data, earnings, cache records and capital state
//! in one database file.

use crate::domain::cache::{CacheMode, CacheRecord, CachedSeries};
use crate::domain::error::StockbotError;
use crate::domain::ohlcv::{EarningsEvent, OhlcvBar};
use crate::domain::resource_manager::ResourceManagerState;
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::{EarningsPort, MarketDataPort};
use crate::ports::store_port::{CacheEntryInfo, CacheStore, StatePort};
use chrono::NaiveDate;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{OptionalExtension, params};
use tracing::warn;

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Clone)]
pub struct SqliteAdapter {
    pool: Pool<SqliteConnectionManager>,
}

fn pool_err(e: r2d2::Error) -> StockbotError {
    StockbotError::Storage {
        reason: e.to_string(),
    }
}

fn query_err(e: rusqlite::Error) -> StockbotError {
    StockbotError::Storage {
        reason: format!("query failed: {e}"),
    }
}

fn parse_date_column(raw: &str) -> Result<NaiveDate, rusqlite::Error> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            raw.len(),
            rusqlite::types::Type::Text,
            Box::new(e),
        )
    })
}

impl SqliteAdapter {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, StockbotError> {
        let db_path =
            config
                .get_string("storage", "sqlite_path")
                .ok_or_else(|| StockbotError::ConfigMissing {
                    section: "storage".into(),
                    key: "sqlite_path".into(),
                })?;
        let pool_size = config.get_int("storage", "pool_size", 4).max(1) as u32;

        let manager = SqliteConnectionManager::file(&db_path);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(pool_err)?;
        let adapter = Self { pool };
        adapter.initialize_schema()?;
        Ok(adapter)
    }

    pub fn in_memory() -> Result<Self, StockbotError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager).map_err(pool_err)?;
        let adapter = Self { pool };
        adapter.initialize_schema()?;
        Ok(adapter)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StockbotError> {
        self.pool.get().map_err(pool_err)
    }

    pub fn initialize_schema(&self) -> Result<(), StockbotError> {
        let conn = self.conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS ohlcv (
                symbol TEXT NOT NULL,
                date TEXT NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume INTEGER NOT NULL,
                PRIMARY KEY (symbol, date)
            );
            CREATE TABLE IF NOT EXISTS earnings (
                symbol TEXT NOT NULL,
                date TEXT NOT NULL,
                estimated REAL NOT NULL,
                actual REAL NOT NULL,
                PRIMARY KEY (symbol, date)
            );
            CREATE TABLE IF NOT EXISTS cache_records (
                symbol TEXT NOT NULL,
                mode TEXT NOT NULL,
                record TEXT NOT NULL,
                PRIMARY KEY (symbol, mode)
            );
            CREATE TABLE IF NOT EXISTS engine_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                state TEXT NOT NULL
            );",
        )
        .map_err(query_err)?;
        Ok(())
    }

    pub fn insert_bars(&self, bars: &[OhlcvBar]) -> Result<(), StockbotError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;
        for bar in bars {
            tx.execute(
                "INSERT OR REPLACE INTO ohlcv (symbol, date, open, high, low, close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    bar.symbol,
                    bar.date.format(DATE_FORMAT).to_string(),
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume
                ],
            )
            .map_err(query_err)?;
        }
        tx.commit().map_err(query_err)?;
        Ok(())
    }

    pub fn insert_earnings(
        &self,
        symbol: &str,
        events: &[EarningsEvent],
    ) -> Result<(), StockbotError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;
        for event in events {
            tx.execute(
                "INSERT OR REPLACE INTO earnings (symbol, date, estimated, actual)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    symbol,
                    event.date.format(DATE_FORMAT).to_string(),
                    event.estimated,
                    event.actual
                ],
            )
            .map_err(query_err)?;
        }
        tx.commit().map_err(query_err)?;
        Ok(())
    }

    fn delete_record(&self, symbol: &str, mode: CacheMode) {
        let result = self.conn().and_then(|conn| {
            conn.execute(
                "DELETE FROM cache_records WHERE symbol = ?1 AND mode = ?2",
                params![symbol, mode.as_str()],
            )
            .map_err(query_err)
        });
        if let Err(e) = result {
            warn!(symbol, %mode, error = %e, "failed to drop corrupt cache record");
        }
    }
}

impl MarketDataPort for SqliteAdapter {
    fn fetch_daily(
        &self,
        symbol: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<OhlcvBar>, StockbotError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT symbol, date, open, high, low, close, volume
                 FROM ohlcv
                 WHERE symbol = ?1 AND date >= ?2 AND date <= ?3
                 ORDER BY date ASC",
            )
            .map_err(query_err)?;

        let rows = stmt
            .query_map(
                params![
                    symbol,
                    start_date.format(DATE_FORMAT).to_string(),
                    end_date.format(DATE_FORMAT).to_string()
                ],
                |row| {
                    let date: String = row.get(1)?;
                    Ok(OhlcvBar {
                        symbol: row.get(0)?,
                        date: parse_date_column(&date)?,
                        open: row.get(2)?,
                        high: row.get(3)?,
                        low: row.get(4)?,
                        close: row.get(5)?,
                        volume: row.get(6)?,
                    })
                },
            )
            .map_err(query_err)?;

        let mut bars = Vec::new();
        for row in rows {
            bars.push(row.map_err(query_err)?);
        }
        Ok(bars)
    }

    fn list_symbols(&self) -> Result<Vec<String>, StockbotError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT DISTINCT symbol FROM ohlcv ORDER BY symbol")
            .map_err(query_err)?;
        let rows = stmt.query_map([], |row| row.get(0)).map_err(query_err)?;

        let mut symbols = Vec::new();
        for row in rows {
            symbols.push(row.map_err(query_err)?);
        }
        Ok(symbols)
    }
}

impl EarningsPort for SqliteAdapter {
    fn fetch_earnings(&self, symbol: &str) -> Result<Vec<EarningsEvent>, StockbotError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT date, estimated, actual FROM earnings
                 WHERE symbol = ?1 ORDER BY date ASC",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![symbol], |row| {
                let date: String = row.get(0)?;
                Ok(EarningsEvent {
                    date: parse_date_column(&date)?,
                    estimated: row.get(1)?,
                    actual: row.get(2)?,
                })
            })
            .map_err(query_err)?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row.map_err(query_err)?);
        }
        Ok(events)
    }
}

impl CacheStore for SqliteAdapter {
    fn load_series(
        &self,
        symbol: &str,
        mode: CacheMode,
    ) -> Result<Option<CachedSeries>, StockbotError> {
        let conn = self.conn()?;
        let record: Option<String> = conn
            .query_row(
                "SELECT record FROM cache_records WHERE symbol = ?1 AND mode = ?2",
                params![symbol, mode.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(query_err)?;
        drop(conn);

        let Some(record) = record else {
            return Ok(None);
        };
        match CacheRecord::from_json(symbol, record.as_bytes()) {
            Ok(series) => Ok(Some(series)),
            Err(e) => {
                self.delete_record(symbol, mode);
                Err(e)
            }
        }
    }

    fn save_series(&self, series: &CachedSeries) -> Result<(), StockbotError> {
        let bytes = CacheRecord::seal(series)?.to_json()?;
        let record = String::from_utf8(bytes).map_err(|e| StockbotError::Storage {
            reason: e.to_string(),
        })?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO cache_records (symbol, mode, record) VALUES (?1, ?2, ?3)",
            params![series.symbol, series.mode.as_str(), record],
        )
        .map_err(query_err)?;
        Ok(())
    }

    fn list_series(&self) -> Result<Vec<CacheEntryInfo>, StockbotError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT symbol, mode, record FROM cache_records ORDER BY symbol, mode")
            .map_err(query_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(query_err)?;

        let mut infos = Vec::new();
        for row in rows {
            let (symbol, mode, record) = row.map_err(query_err)?;
            let Ok(mode) = mode.parse::<CacheMode>() else {
                continue;
            };
            match CacheRecord::from_json(&symbol, record.as_bytes()) {
                Ok(series) => infos.push(CacheEntryInfo {
                    symbol,
                    mode,
                    rows: series.len(),
                    last_date: series.last_date(),
                }),
                Err(e) => warn!(symbol, %mode, error = %e, "unreadable cache record"),
            }
        }
        Ok(infos)
    }
}

impl StatePort for SqliteAdapter {
    fn load_state(&self) -> Result<Option<ResourceManagerState>, StockbotError> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row("SELECT state FROM engine_state WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()
            .map_err(query_err)?;
        raw.map(|raw| {
            serde_json::from_str(&raw).map_err(|e| StockbotError::Storage {
                reason: format!("failed to decode engine state: {e}"),
            })
        })
        .transpose()
    }

    fn save_state(&self, state: &ResourceManagerState) -> Result<(), StockbotError> {
        let raw = serde_json::to_string(state).map_err(|e| StockbotError::Storage {
            reason: format!("failed to encode engine state: {e}"),
        })?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO engine_state (id, state) VALUES (1, ?1)",
            params![raw],
        )
        .map_err(query_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    struct EmptyConfig;

    impl ConfigPort for EmptyConfig {
        fn get_string(&self, _section: &str, _key: &str) -> Option<String> {
            None
        }
        fn get_int(&self, _section: &str, _key: &str, default: i64) -> i64 {
            default
        }
        fn get_double(&self, _section: &str, _key: &str, default: f64) -> f64 {
            default
        }
        fn get_bool(&self, _section: &str, _key: &str, default: bool) -> bool {
            default
        }
    }

    fn bar(symbol: &str, day: u32, close: f64) -> OhlcvBar {
        OhlcvBar {
            symbol: symbol.to_string(),
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            open: close - 0.5,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1000 + day as i64,
        }
    }

    #[test]
    fn from_config_missing_path() {
        match SqliteAdapter::from_config(&EmptyConfig) {
            Err(StockbotError::ConfigMissing { section, key }) => {
                assert_eq!(section, "storage");
                assert_eq!(key, "sqlite_path");
            }
            Err(other) => panic!("expected ConfigMissing, got: {other}"),
            Ok(_) => panic!("expected error, got Ok"),
        }
    }

    #[test]
    fn fetch_daily_returns_range() {
        let adapter = SqliteAdapter::in_memory().unwrap();
        adapter
            .insert_bars(&[bar("AAPL", 2, 101.5), bar("AAPL", 1, 100.5), bar("AAPL", 5, 103.0)])
            .unwrap();

        let fetched = adapter
            .fetch_daily(
                "AAPL",
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            )
            .unwrap();

        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[0].symbol, "AAPL");
        assert_eq!(fetched[0].close, 100.5);
        assert_eq!(fetched[1].close, 101.5);
    }

    #[test]
    fn list_symbols_is_distinct_and_sorted() {
        let adapter = SqliteAdapter::in_memory().unwrap();
        adapter
            .insert_bars(&[bar("MSFT", 1, 300.0), bar("AAPL", 1, 100.0), bar("AAPL", 2, 101.0)])
            .unwrap();
        assert_eq!(adapter.list_symbols().unwrap(), vec!["AAPL", "MSFT"]);
    }

    #[test]
    fn earnings_round_trip() {
        let adapter = SqliteAdapter::in_memory().unwrap();
        let events = vec![
            EarningsEvent {
                date: NaiveDate::from_ymd_opt(2024, 1, 25).unwrap(),
                estimated: 2.10,
                actual: 2.18,
            },
            EarningsEvent {
                date: NaiveDate::from_ymd_opt(2023, 10, 26).unwrap(),
                estimated: 1.39,
                actual: 1.46,
            },
        ];
        adapter.insert_earnings("AAPL", &events).unwrap();

        let fetched = adapter.fetch_earnings("AAPL").unwrap();
        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[0], events[1]);
        assert!(adapter.fetch_earnings("MSFT").unwrap().is_empty());
    }

    #[test]
    fn cache_record_round_trip_and_listing() {
        let adapter = SqliteAdapter::in_memory().unwrap();
        let series = CachedSeries::from_bars(
            "AAPL",
            CacheMode::Online,
            &[bar("AAPL", 1, 100.0), bar("AAPL", 2, 101.0), bar("AAPL", 3, 99.0)],
        );
        adapter.save_series(&series).unwrap();

        let loaded = adapter.load_series("AAPL", CacheMode::Online).unwrap().unwrap();
        assert_eq!(loaded, series);
        assert!(adapter.load_series("AAPL", CacheMode::Offline).unwrap().is_none());

        let infos = adapter.list_series().unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].rows, 3);
        assert_eq!(infos[0].last_date, NaiveDate::from_ymd_opt(2024, 1, 3));
    }

    #[test]
    fn corrupt_cache_record_is_dropped() {
        let adapter = SqliteAdapter::in_memory().unwrap();
        adapter
            .conn()
            .unwrap()
            .execute(
                "INSERT INTO cache_records (symbol, mode, record) VALUES ('AAPL', 'online', '{}')",
                [],
            )
            .unwrap();

        let err = adapter.load_series("AAPL", CacheMode::Online).unwrap_err();
        assert!(matches!(err, StockbotError::CacheCorruption { .. }));
        assert!(adapter.load_series("AAPL", CacheMode::Online).unwrap().is_none());
    }

    #[test]
    fn state_round_trip() {
        let adapter = SqliteAdapter::in_memory().unwrap();
        assert!(adapter.load_state().unwrap().is_none());

        let state = ResourceManagerState::new(dec!(5000));
        adapter.save_state(&state).unwrap();
        adapter.save_state(&state).unwrap();
        assert_eq!(adapter.load_state().unwrap(), Some(state));
    }
}

//! JSON file persistence for cache records and capital state.
//!
//! - `{cache_dir}/{SYMBOL}.{mode}.json` holds one checksummed `CacheRecord`
//! - `state_path` holds the `ResourceManagerState`
//!
//! Writes go to a `.tmp` sibling and are renamed into place. A cache file
//! that fails verification is renamed to `.corrupt` and reported as
//! `CacheCorruption`.

use crate::domain::cache::{CacheMode, CacheRecord, CachedSeries};
use crate::domain::error::StockbotError;
use crate::domain::resource_manager::ResourceManagerState;
use crate::ports::config_port::ConfigPort;
use crate::ports::store_port::{CacheEntryInfo, CacheStore, StatePort};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

pub struct JsonStore {
    cache_dir: PathBuf,
    state_path: PathBuf,
}

impl JsonStore {
    pub fn new(cache_dir: impl Into<PathBuf>, state_path: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            state_path: state_path.into(),
        }
    }

    pub fn from_config(config: &dyn ConfigPort) -> Self {
        let cache_dir = config
            .get_string("storage", "cache_dir")
            .unwrap_or_else(|| "cache".to_string());
        let state_path = config
            .get_string("storage", "state_path")
            .unwrap_or_else(|| "state.json".to_string());
        Self::new(cache_dir, state_path)
    }

    fn series_path(&self, symbol: &str, mode: CacheMode) -> PathBuf {
        self.cache_dir.join(format!("{symbol}.{mode}.json"))
    }

    fn quarantine(path: &Path) {
        let target = path.with_extension("json.corrupt");
        if let Err(e) = fs::rename(path, &target) {
            warn!(path = %path.display(), error = %e, "failed to quarantine cache file");
        }
    }
}

fn storage_err(action: &str, path: &Path, e: impl std::fmt::Display) -> StockbotError {
    StockbotError::Storage {
        reason: format!("failed to {action} {}: {e}", path.display()),
    }
}

/// Write `bytes` to `path` through a temporary sibling.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StockbotError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| storage_err("create", parent, e))?;
        }
    }
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, bytes).map_err(|e| storage_err("write", &tmp_path, e))?;
    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        storage_err("rename into", path, e)
    })
}

impl CacheStore for JsonStore {
    fn load_series(
        &self,
        symbol: &str,
        mode: CacheMode,
    ) -> Result<Option<CachedSeries>, StockbotError> {
        let path = self.series_path(symbol, mode);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path).map_err(|e| storage_err("read", &path, e))?;
        match CacheRecord::from_json(symbol, &bytes) {
            Ok(series) if series.symbol == symbol && series.mode == mode => Ok(Some(series)),
            Ok(series) => {
                Self::quarantine(&path);
                Err(StockbotError::CacheCorruption {
                    symbol: symbol.to_string(),
                    reason: format!(
                        "record holds {} ({}) instead",
                        series.symbol, series.mode
                    ),
                })
            }
            Err(e) => {
                Self::quarantine(&path);
                Err(e)
            }
        }
    }

    fn save_series(&self, series: &CachedSeries) -> Result<(), StockbotError> {
        let bytes = CacheRecord::seal(series)?.to_json()?;
        write_atomic(&self.series_path(&series.symbol, series.mode), &bytes)
    }

    fn list_series(&self) -> Result<Vec<CacheEntryInfo>, StockbotError> {
        if !self.cache_dir.exists() {
            return Ok(Vec::new());
        }
        let entries =
            fs::read_dir(&self.cache_dir).map_err(|e| storage_err("read", &self.cache_dir, e))?;

        let mut infos = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            let Some((symbol, mode)) = stem.rsplit_once('.') else {
                continue;
            };
            let Ok(mode) = mode.parse::<CacheMode>() else {
                continue;
            };
            let bytes = fs::read(&path).map_err(|e| storage_err("read", &path, e))?;
            match CacheRecord::from_json(symbol, &bytes) {
                Ok(series) => infos.push(CacheEntryInfo {
                    symbol: series.symbol.clone(),
                    mode,
                    rows: series.len(),
                    last_date: series.last_date(),
                }),
                Err(e) => warn!(symbol, %mode, error = %e, "unreadable cache record"),
            }
        }
        infos.sort_by(|a, b| (&a.symbol, a.mode).cmp(&(&b.symbol, b.mode)));
        Ok(infos)
    }
}

impl StatePort for JsonStore {
    fn load_state(&self) -> Result<Option<ResourceManagerState>, StockbotError> {
        if !self.state_path.exists() {
            return Ok(None);
        }
        let bytes =
            fs::read(&self.state_path).map_err(|e| storage_err("read", &self.state_path, e))?;
        let state = serde_json::from_slice(&bytes)
            .map_err(|e| storage_err("decode", &self.state_path, e))?;
        Ok(Some(state))
    }

    fn save_state(&self, state: &ResourceManagerState) -> Result<(), StockbotError> {
        let bytes = serde_json::to_vec_pretty(state)
            .map_err(|e| storage_err("encode", &self.state_path, e))?;
        write_atomic(&self.state_path, &bytes)
    }
}

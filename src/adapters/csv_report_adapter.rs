//! Append-only CSV decision log.

use crate::domain::decision::DecisionRecord;
use crate::domain::error::StockbotError;
use crate::domain::resource_manager::ResourceManagerState;
use crate::ports::report_port::ReportPort;
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::PathBuf;

pub struct CsvReportAdapter {
    path: PathBuf,
}

/// One flattened output row.
#[derive(Debug, Serialize)]
struct ReportRow<'a> {
    date: String,
    symbol: &'a str,
    action: String,
    state: String,
    rule: &'static str,
    detail: String,
    aggregate: Option<f64>,
    price: Option<f64>,
    ratios: String,
    available: String,
    total: String,
}

impl CsvReportAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

fn format_ratios(record: &DecisionRecord) -> String {
    record
        .ratios
        .iter()
        .map(|(model, ratio)| format!("{model}={ratio:.6}"))
        .collect::<Vec<_>>()
        .join(";")
}

impl ReportPort for CsvReportAdapter {
    fn write_decisions(
        &self,
        records: &[DecisionRecord],
        state: &ResourceManagerState,
    ) -> Result<(), StockbotError> {
        let is_new = !self.path.exists();
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StockbotError::Storage {
                reason: format!("failed to open {}: {e}", self.path.display()),
            })?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(file);
        let available = state.available_capital.to_string();
        let total = state.total_capital.to_string();

        for record in records {
            writer
                .serialize(ReportRow {
                    date: record.date.format("%Y-%m-%d").to_string(),
                    symbol: &record.symbol,
                    action: record.action.to_string(),
                    state: record.state.to_string(),
                    rule: record.rationale.code(),
                    detail: record.rationale.to_string(),
                    aggregate: record.aggregate,
                    price: record.price,
                    ratios: format_ratios(record),
                    available: available.clone(),
                    total: total.clone(),
                })
                .map_err(|e| StockbotError::Storage {
                    reason: format!("failed to write {}: {e}", self.path.display()),
                })?;
        }
        writer.flush()?;
        Ok(())
    }
}

//! Decision output port.

use crate::domain::decision::DecisionRecord;
use crate::domain::error::StockbotError;
use crate::domain::resource_manager::ResourceManagerState;

/// Sink for the records a daily cycle produces.
pub trait ReportPort {
    fn write_decisions(
        &self,
        records: &[DecisionRecord],
        state: &ResourceManagerState,
    ) -> Result<(), StockbotError>;
}

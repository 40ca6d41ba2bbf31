//! Domain error types.

use rust_decimal::Decimal;

/// Top-level error type for stockbot.
#[derive(Debug, thiserror::Error)]
pub enum StockbotError {
    #[error("no {key} data for {symbol}: {reason}")]
    DataUnavailable {
        symbol: String,
        key: String,
        reason: String,
    },

    #[error("channel {key} for {symbol} has {actual} values, expected {expected}")]
    ShapeMismatch {
        symbol: String,
        key: String,
        expected: usize,
        actual: usize,
    },

    #[error("predictor {model} failed: {reason}")]
    PredictorFailure { model: String, reason: String },

    #[error("insufficient funds for {symbol}: requested {requested}, available {available}")]
    InsufficientFunds {
        symbol: String,
        requested: Decimal,
        available: Decimal,
    },

    #[error("corrupt cache record for {symbol}: {reason}")]
    CacheCorruption { symbol: String, reason: String },

    #[error("capital conservation violated: {detail}")]
    ResourceInvariantViolation { detail: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("storage error: {reason}")]
    Storage { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StockbotError {
    pub fn data_unavailable(symbol: &str, key: impl ToString, reason: impl ToString) -> Self {
        StockbotError::DataUnavailable {
            symbol: symbol.to_string(),
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Only a broken capital ledger stops the run; everything else is per-symbol.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StockbotError::ResourceInvariantViolation { .. })
    }
}

impl From<&StockbotError> for std::process::ExitCode {
    fn from(err: &StockbotError) -> Self {
        let code: u8 = match err {
            StockbotError::Io(_) => 1,
            StockbotError::ConfigParse { .. }
            | StockbotError::ConfigMissing { .. }
            | StockbotError::ConfigInvalid { .. } => 2,
            StockbotError::Storage { .. } | StockbotError::CacheCorruption { .. } => 3,
            StockbotError::PredictorFailure { .. } => 4,
            StockbotError::DataUnavailable { .. }
            | StockbotError::ShapeMismatch { .. }
            | StockbotError::InsufficientFunds { .. } => 5,
            StockbotError::ResourceInvariantViolation { .. } => 6,
        };
        std::process::ExitCode::from(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_invariant_violation_is_fatal() {
        let fatal = StockbotError::ResourceInvariantViolation {
            detail: "drift".into(),
        };
        assert!(fatal.is_fatal());

        let isolated = StockbotError::data_unavailable("AAPL", "close", "provider down");
        assert!(!isolated.is_fatal());
    }

    #[test]
    fn display_includes_context() {
        let err = StockbotError::ShapeMismatch {
            symbol: "AAPL".into(),
            key: "rsi".into(),
            expected: 60,
            actual: 59,
        };
        assert_eq!(
            err.to_string(),
            "channel rsi for AAPL has 59 values, expected 60"
        );
    }
}

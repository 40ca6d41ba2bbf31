//! Predictor capability port.
//!
//! A predictor maps one feature window to a predicted ratio of future
//! price to current price. Concrete models are opaque to the engine and
//! are constructed through a caller-supplied builder.

use std::path::Path;

use crate::domain::error::StockbotError;
use crate::domain::features::FeatureWindow;
use crate::domain::indicator::IndicatorKey;
use crate::domain::model::ModelKind;

/// Rows x channels of the windows a model is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureShape {
    pub rows: usize,
    pub channels: usize,
}

pub trait Predictor: Send + Sync {
    /// Identifier used as the vote key, unique within an ensemble.
    fn id(&self) -> &str;

    fn kind(&self) -> ModelKind;

    fn required_keys(&self) -> &[IndicatorKey] {
        self.kind().required_keys()
    }

    fn predict(&self, window: &FeatureWindow) -> Result<f64, StockbotError>;

    /// Fit on windows paired with realised ratios.
    fn train(&mut self, windows: &[FeatureWindow], labels: &[f64]) -> Result<(), StockbotError>;

    fn save(&self, path: &Path) -> Result<(), StockbotError>;

    fn load(&mut self, path: &Path) -> Result<(), StockbotError>;
}

/// Builds an untrained predictor for a kind and input shape.
pub type PredictorBuilder = dyn Fn(ModelKind, FeatureShape) -> Box<dyn Predictor> + Send + Sync;

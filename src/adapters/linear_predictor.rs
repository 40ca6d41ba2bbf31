//! Linear ratio model.
//!
//! Features are the window's last row, with price-like channels expressed
//! relative to the last close, plus the return over the whole window. Each
//! feature is standardised with statistics captured at training time and
//! the model predicts `1 + bias + w · z`. An untrained model predicts 1.0.

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::adapters::json_store::write_atomic;
use crate::domain::error::StockbotError;
use crate::domain::features::FeatureWindow;
use crate::domain::indicator::IndicatorKey;
use crate::domain::model::ModelKind;
use crate::ports::predictor_port::{FeatureShape, Predictor};

const LEARNING_RATE: f64 = 0.05;
const EPOCHS: usize = 500;
const L2: f64 = 1e-4;
/// Features with a smaller spread are left unscaled.
const MIN_SCALE: f64 = 1e-6;

/// Where a trained `kind` lives inside `dir`.
pub fn model_path(dir: &Path, kind: ModelKind) -> PathBuf {
    dir.join(format!("{}.json", kind.as_str()))
}

/// `PredictorBuilder` for linear models.
pub fn linear_builder(kind: ModelKind, shape: FeatureShape) -> Box<dyn Predictor> {
    Box::new(LinearPredictor::new(kind, shape))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LinearState {
    kind: ModelKind,
    rows: usize,
    keys: Vec<IndicatorKey>,
    weights: Array1<f64>,
    bias: f64,
    means: Array1<f64>,
    scales: Array1<f64>,
}

impl LinearState {
    fn width(&self) -> usize {
        self.weights.len()
    }

    fn standardise(&self, raw: &Array1<f64>) -> Array1<f64> {
        (raw - &self.means) / &self.scales
    }

    fn score(&self, z: &Array1<f64>) -> f64 {
        self.bias + z.dot(&self.weights)
    }
}

#[derive(Debug, Clone)]
pub struct LinearPredictor {
    id: String,
    state: LinearState,
}

impl LinearPredictor {
    pub fn new(kind: ModelKind, shape: FeatureShape) -> Self {
        let keys = kind.required_keys().to_vec();
        let n = keys.len() + 1;
        Self {
            id: kind.as_str().to_string(),
            state: LinearState {
                kind,
                rows: shape.rows,
                keys,
                weights: Array1::zeros(n),
                bias: 0.0,
                means: Array1::zeros(n),
                scales: Array1::ones(n),
            },
        }
    }

    fn failure(&self, reason: impl Into<String>) -> StockbotError {
        StockbotError::PredictorFailure {
            model: self.id.clone(),
            reason: reason.into(),
        }
    }

    fn check_shape(&self, window: &FeatureWindow) -> Result<(), StockbotError> {
        if window.len() != self.state.rows {
            return Err(StockbotError::ShapeMismatch {
                symbol: window.symbol.clone(),
                key: self.id.clone(),
                expected: self.state.rows,
                actual: window.len(),
            });
        }
        if window.keys != self.state.keys {
            return Err(StockbotError::ShapeMismatch {
                symbol: window.symbol.clone(),
                key: self.id.clone(),
                expected: self.state.keys.len(),
                actual: window.width(),
            });
        }
        Ok(())
    }

    fn features(&self, window: &FeatureWindow) -> Result<Array1<f64>, StockbotError> {
        let failure =
            |reason: &str| self.failure(format!("{} on {}: {reason}", window.symbol, window.as_of));
        let close = window
            .last_close()
            .filter(|c| *c > 0.0)
            .ok_or_else(|| failure("no positive close"))?;
        let first_close = window
            .channel(IndicatorKey::Close)
            .and_then(|c| c.first().copied())
            .filter(|c| *c > 0.0)
            .ok_or_else(|| failure("no positive close"))?;

        let features: Array1<f64> = window
            .keys
            .iter()
            .zip(window.last_row())
            .map(|(key, value)| if is_price_like(*key) { value / close - 1.0 } else { value })
            .chain(std::iter::once(close / first_close - 1.0))
            .collect();

        if features.iter().any(|v| !v.is_finite()) {
            return Err(failure("non-finite feature"));
        }
        Ok(features)
    }

    /// Stack usable examples into a design matrix and centred targets.
    fn design(
        &self,
        windows: &[FeatureWindow],
        labels: &[f64],
    ) -> Result<(Array2<f64>, Array1<f64>), StockbotError> {
        let width = self.state.width();
        let mut flat = Vec::with_capacity(windows.len() * width);
        let mut ys = Vec::with_capacity(labels.len());
        for (window, label) in windows.iter().zip(labels) {
            self.check_shape(window)?;
            if !label.is_finite() {
                continue;
            }
            if let Ok(x) = self.features(window) {
                flat.extend(x.iter());
                ys.push(label - 1.0);
            }
        }
        if ys.is_empty() {
            return Err(self.failure("no usable training examples"));
        }
        let x = Array2::from_shape_vec((ys.len(), width), flat)
            .map_err(|e| self.failure(format!("bad design matrix: {e}")))?;
        Ok((x, Array1::from(ys)))
    }
}

fn is_price_like(key: IndicatorKey) -> bool {
    matches!(
        key,
        IndicatorKey::Close
            | IndicatorKey::Ema12
            | IndicatorKey::Ema26
            | IndicatorKey::Ema200
            | IndicatorKey::Trama
            | IndicatorKey::BollingerMiddle
    )
}

impl Predictor for LinearPredictor {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ModelKind {
        self.state.kind
    }

    fn predict(&self, window: &FeatureWindow) -> Result<f64, StockbotError> {
        self.check_shape(window)?;
        let z = self.state.standardise(&self.features(window)?);
        Ok(1.0 + self.state.score(&z))
    }

    fn train(&mut self, windows: &[FeatureWindow], labels: &[f64]) -> Result<(), StockbotError> {
        if windows.len() != labels.len() || windows.is_empty() {
            return Err(self.failure(format!(
                "{} windows for {} labels",
                windows.len(),
                labels.len()
            )));
        }
        let (x, y) = self.design(windows, labels)?;
        let n = y.len() as f64;

        let means = x
            .mean_axis(Axis(0))
            .ok_or_else(|| self.failure("empty design matrix"))?;
        let scales = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > MIN_SCALE { s } else { 1.0 });
        let z = (&x - &means) / &scales;

        let mut weights = Array1::<f64>::zeros(self.state.width());
        let mut bias = y.mean().unwrap_or(0.0);
        for _ in 0..EPOCHS {
            let errors = z.dot(&weights) + bias - &y;
            let dw = z.t().dot(&errors) / n + &weights * L2;
            let db = errors.sum() / n;
            weights = &weights - &(dw * LEARNING_RATE);
            bias -= LEARNING_RATE * db;
        }

        self.state.means = means;
        self.state.scales = scales;
        self.state.weights = weights;
        self.state.bias = bias;
        debug!(model = %self.id, examples = y.len(), bias, "linear model fitted");
        Ok(())
    }

    fn save(&self, path: &Path) -> Result<(), StockbotError> {
        let bytes = serde_json::to_vec_pretty(&self.state).map_err(|e| StockbotError::Storage {
            reason: format!("failed to encode model {}: {e}", self.id),
        })?;
        write_atomic(path, &bytes)
    }

    fn load(&mut self, path: &Path) -> Result<(), StockbotError> {
        let bytes = fs::read(path)
            .map_err(|e| self.failure(format!("failed to read {}: {e}", path.display())))?;
        let state: LinearState = serde_json::from_slice(&bytes)
            .map_err(|e| self.failure(format!("failed to decode {}: {e}", path.display())))?;
        if state.kind != self.state.kind
            || state.keys != self.state.keys
            || state.rows != self.state.rows
            || state.width() != self.state.width()
            || state.means.len() != state.width()
            || state.scales.len() != state.width()
        {
            return Err(self.failure(format!(
                "{} was saved for a different shape",
                path.display()
            )));
        }
        self.state = state;
        Ok(())
    }
}

use anyhow::Result;
use std::collections::HashMap;

use crate::types::{Bar, IndicatorRow, Regime};

/// Turns raw bars into indicator rows. Deterministic and total: valid bars
/// in, one row per usable bar out, never dropping the symbol entirely.
pub trait FeatureBuilder: Send + Sync {
    fn build(&self, bars: &[Bar]) -> Vec<IndicatorRow>;
}

/// Directional probability model. `predict_probability` returns the
/// confidence that price rises next period, in [0, 1]; the engine substitutes
/// a neutral 0.5 when prediction fails.
pub trait ProbabilityModel: Send + Sync {
    /// Fit on feature rows and next-period up/down labels. Returns the
    /// number of samples fitted; refuses to fit on too few.
    fn train(&mut self, rows: &[IndicatorRow], labels: &[bool]) -> Result<usize>;

    fn predict_probability(&self, row: &IndicatorRow) -> Result<f64>;
}

/// Labels a window of recent indicator rows with a market regime.
pub trait RegimeClassifier: Send + Sync {
    fn classify(&self, window: &[IndicatorRow]) -> Regime;
}

/// Cross-asset weight allocation from per-symbol return series. Weights are
/// in [0, 1] and sum to at most 1; the engine falls back to equal weight for
/// symbols the optimizer leaves out.
pub trait WeightOptimizer: Send + Sync {
    fn weights(&self, returns: &HashMap<String, Vec<f64>>) -> HashMap<String, f64>;
}

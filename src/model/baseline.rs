// src/model/baseline.rs
//! In-crate collaborator baselines: a standardized-momentum probability
//! model, a percentile regime classifier, and inverse-volatility weights.
//! Each stands behind the corresponding trait so an external service can
//! replace it without touching the engine.

use anyhow::{bail, Result};
use std::collections::HashMap;

use crate::model::traits::{ProbabilityModel, RegimeClassifier, WeightOptimizer};
use crate::types::{IndicatorRow, Regime};

const FEATURE_COUNT: usize = 5;

/// Fixed direction weights over standardized features: trend distance,
/// MACD histogram, and 1/5/20-period returns.
const FEATURE_WEIGHTS: [f64; FEATURE_COUNT] = [0.8, 0.6, 0.3, 0.4, 0.3];

fn feature_vector(row: &IndicatorRow) -> [f64; FEATURE_COUNT] {
    [
        row.price_ema_ratio,
        row.macd_hist,
        row.ret_1,
        row.ret_5,
        row.ret_20,
    ]
}

/// Logistic squash of standardized momentum features. `train` estimates the
/// per-feature mean/scale and an intercept matching the label base rate;
/// `predict_probability` scores a single row.
pub struct MomentumProbabilityModel {
    min_train_samples: usize,
    fitted: Option<Fitted>,
}

struct Fitted {
    means: [f64; FEATURE_COUNT],
    stds: [f64; FEATURE_COUNT],
    intercept: f64,
}

impl MomentumProbabilityModel {
    pub fn new(min_train_samples: usize) -> Self {
        Self {
            min_train_samples,
            fitted: None,
        }
    }
}

impl ProbabilityModel for MomentumProbabilityModel {
    fn train(&mut self, rows: &[IndicatorRow], labels: &[bool]) -> Result<usize> {
        let n = rows.len().min(labels.len());
        if n < self.min_train_samples {
            bail!(
                "insufficient training samples: {} < {}",
                n,
                self.min_train_samples
            );
        }

        let mut means = [0.0; FEATURE_COUNT];
        for row in &rows[..n] {
            let x = feature_vector(row);
            for (m, v) in means.iter_mut().zip(x) {
                *m += v;
            }
        }
        for m in &mut means {
            *m /= n as f64;
        }

        let mut stds = [0.0; FEATURE_COUNT];
        for row in &rows[..n] {
            let x = feature_vector(row);
            for ((s, v), m) in stds.iter_mut().zip(x).zip(means) {
                *s += (v - m) * (v - m);
            }
        }
        for s in &mut stds {
            *s = (*s / n as f64).sqrt();
        }

        // Intercept from the label base rate, clamped away from 0/1 so the
        // logit stays finite even on degenerate label sets.
        let ups = labels[..n].iter().filter(|&&l| l).count() as f64;
        let base_rate = (ups / n as f64).clamp(0.02, 0.98);
        let intercept = (base_rate / (1.0 - base_rate)).ln();

        self.fitted = Some(Fitted {
            means,
            stds,
            intercept,
        });
        Ok(n)
    }

    fn predict_probability(&self, row: &IndicatorRow) -> Result<f64> {
        let fitted = match &self.fitted {
            Some(f) => f,
            None => bail!("model has not been trained"),
        };

        let x = feature_vector(row);
        if x.iter().any(|v| !v.is_finite()) {
            bail!("malformed feature row");
        }

        let mut score = fitted.intercept;
        for ((v, m), (s, w)) in x
            .iter()
            .zip(fitted.means)
            .zip(fitted.stds.iter().zip(FEATURE_WEIGHTS))
        {
            let z = if *s > 0.0 { (v - m) / s } else { 0.0 };
            score += w * z;
        }

        Ok((1.0 / (1.0 + (-score).exp())).clamp(0.0, 1.0))
    }
}

/// Regime from trend strength vs. volatility, each ranked against its own
/// recent history: strong trend wins over chop, and chop splits on the
/// volatility percentile.
pub struct PercentileRegimeClassifier {
    vol_lookback: usize,
    trend_lookback: usize,
    vol_percentile_high: f64,
    trend_percentile_strong: f64,
}

impl PercentileRegimeClassifier {
    pub fn new(cfg: &crate::config::RegimeConfig) -> Self {
        Self {
            vol_lookback: cfg.vol_lookback,
            trend_lookback: cfg.trend_lookback,
            vol_percentile_high: cfg.vol_percentile_high,
            trend_percentile_strong: cfg.trend_percentile_strong,
        }
    }
}

/// Fraction of `series` values at or below the last value.
fn percentile_rank(series: &[f64]) -> f64 {
    let last = match series.last() {
        Some(v) => *v,
        None => return 0.0,
    };
    let below = series.iter().filter(|&&v| v <= last).count() as f64;
    below / series.len() as f64
}

impl RegimeClassifier for PercentileRegimeClassifier {
    fn classify(&self, window: &[IndicatorRow]) -> Regime {
        if window.len() < 2 {
            return Regime::ChoppyLowVol;
        }

        let trend_window = window.len().min(self.trend_lookback);
        let trends: Vec<f64> = window[window.len() - trend_window..]
            .iter()
            .map(|r| r.price_ema_ratio.abs())
            .collect();
        let vol_window = window.len().min(self.vol_lookback);
        let vols: Vec<f64> = window[window.len() - vol_window..]
            .iter()
            .map(|r| r.atr_norm)
            .collect();

        let last = &window[window.len() - 1];
        if percentile_rank(&trends) >= self.trend_percentile_strong
            && last.price_ema_ratio.abs() > 0.0
        {
            if last.ema_fast >= last.ema_slow {
                return Regime::TrendingUp;
            }
            return Regime::TrendingDown;
        }

        if percentile_rank(&vols) >= self.vol_percentile_high {
            Regime::ChoppyHighVol
        } else {
            Regime::ChoppyLowVol
        }
    }
}

/// Weights proportional to inverse return volatility, clamped per asset and
/// normalized so the total never exceeds 1.
pub struct InverseVolatilityWeights {
    min_weight: f64,
    max_weight: f64,
}

impl InverseVolatilityWeights {
    pub fn new(min_weight: f64, max_weight: f64) -> Self {
        Self {
            min_weight,
            max_weight,
        }
    }
}

impl Default for InverseVolatilityWeights {
    fn default() -> Self {
        Self::new(0.0, 0.5)
    }
}

fn std_dev(series: &[f64]) -> f64 {
    if series.len() < 2 {
        return 0.0;
    }
    let mean = series.iter().sum::<f64>() / series.len() as f64;
    let var = series.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / series.len() as f64;
    var.sqrt()
}

impl WeightOptimizer for InverseVolatilityWeights {
    fn weights(&self, returns: &HashMap<String, Vec<f64>>) -> HashMap<String, f64> {
        let mut inverse: HashMap<String, f64> = HashMap::new();
        for (symbol, series) in returns {
            let sigma = std_dev(series);
            if sigma > 0.0 {
                inverse.insert(symbol.clone(), 1.0 / sigma);
            }
        }

        if inverse.is_empty() {
            // Degenerate inputs: fall back to equal weights.
            let n = returns.len().max(1) as f64;
            return returns.keys().map(|s| (s.clone(), 1.0 / n)).collect();
        }

        let total: f64 = inverse.values().sum();
        let mut weights: HashMap<String, f64> = inverse
            .into_iter()
            .map(|(s, inv)| (s, (inv / total).clamp(self.min_weight, self.max_weight)))
            .collect();

        // Clamping can push the sum above 1; renormalize downward only.
        let sum: f64 = weights.values().sum();
        if sum > 1.0 {
            for w in weights.values_mut() {
                *w /= sum;
            }
        }
        weights
    }
}

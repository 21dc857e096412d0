// src/config.rs

use config::{Config, ConfigError, Environment, File};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StrategyConfig {
    /// Minimum model probability for an entry. Shorts use the complement.
    pub prob_threshold: f64,
    /// Stop distance in ATR multiples. Also the per-unit risk multiple in sizing.
    pub stop_loss_atr: f64,
    /// Take-profit distance in ATR multiples.
    pub take_profit_atr: f64,
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub atr_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    /// Allow entries while the regime is choppy.
    pub trade_in_choppy: bool,
    /// Scale entries down while the regime is high-volatility.
    pub reduce_size_high_vol: bool,
    pub high_vol_size_factor: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RegimeConfig {
    pub vol_lookback: usize,
    pub trend_lookback: usize,
    pub vol_percentile_high: f64,
    pub trend_percentile_strong: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AlertConfig {
    pub drawdown: f64,
    pub drawdown_critical: f64,
    /// Warn when capital falls below this fraction of starting capital.
    pub capital_low: f64,
    pub capital_critical: f64,
    /// Warn when open notional exceeds this multiple of capital.
    pub exposure_high: f64,
    pub exposure_critical: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub symbols: Vec<String>,
    pub start_capital: f64,
    /// Fraction of capital risked per trade.
    pub risk_per_trade: f64,
    /// Target portfolio volatility; caps per-position volatility exposure.
    pub vol_target: f64,
    pub max_positions: usize,
    /// Hard cap on any single position's notional as a fraction of capital.
    pub max_position_frac: f64,
    pub update_interval_secs: u64,
    /// Retrain cadence measured in elapsed wall-clock time since the last
    /// successful or attempted retrain.
    pub retrain_interval_secs: u64,
    pub train_window_days: i64,
    /// Days of history fetched each cycle for indicator warm-up.
    pub history_days: i64,
    /// Return observations fed to the weight optimizer.
    pub lookback_correlation: usize,
    pub min_train_samples: usize,
    /// Minimum indicator rows before a symbol is evaluated at all.
    pub min_history: usize,
    pub live_trading: bool,
    pub state_file: String,
    pub strategy: StrategyConfig,
    pub regime: RegimeConfig,
    pub alerts: AlertConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            symbols: vec![
                "AAPL".into(),
                "MSFT".into(),
                "GOOGL".into(),
                "AMZN".into(),
                "TSLA".into(),
            ],
            start_capital: 100_000.0,
            risk_per_trade: 0.01,
            vol_target: 0.10,
            max_positions: 10,
            max_position_frac: 0.20,
            update_interval_secs: 60,
            retrain_interval_secs: 86_400,
            train_window_days: 252,
            history_days: 100,
            lookback_correlation: 60,
            min_train_samples: 50,
            min_history: 50,
            live_trading: false,
            state_file: "helmsman_state.json".to_string(),
            strategy: StrategyConfig {
                prob_threshold: 0.6,
                stop_loss_atr: 2.0,
                take_profit_atr: 4.0,
                ema_fast: 50,
                ema_slow: 200,
                atr_period: 14,
                macd_fast: 12,
                macd_slow: 26,
                macd_signal: 9,
                trade_in_choppy: false,
                reduce_size_high_vol: true,
                high_vol_size_factor: 0.5,
            },
            regime: RegimeConfig {
                vol_lookback: 20,
                trend_lookback: 50,
                vol_percentile_high: 0.7,
                trend_percentile_strong: 0.6,
            },
            alerts: AlertConfig {
                drawdown: 0.05,
                drawdown_critical: 0.10,
                capital_low: 0.80,
                capital_critical: 0.70,
                exposure_high: 1.5,
                exposure_critical: 2.0,
            },
        }
    }
}

impl AppConfig {
    /// Layered load: compiled defaults, then `Settings.toml` if present,
    /// then `APP_*` environment overrides (`APP_STRATEGY__PROB_THRESHOLD=0.65`).
    pub fn load() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(File::with_name("Settings").required(false))
            .add_source(Environment::with_prefix("APP").separator("__"));

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn fail(msg: impl Into<String>) -> Result<(), ConfigError> {
            Err(ConfigError::Message(msg.into()))
        }

        if self.symbols.is_empty() || self.symbols.iter().any(|s| s.trim().is_empty()) {
            return fail("symbols must be a non-empty list of non-empty tickers");
        }
        if self.start_capital <= 0.0 {
            return fail("start_capital must be positive");
        }
        if !(0.0 < self.risk_per_trade && self.risk_per_trade <= 1.0) {
            return fail("risk_per_trade must be in (0, 1]");
        }
        if !(0.0 < self.vol_target && self.vol_target <= 1.0) {
            return fail("vol_target must be in (0, 1]");
        }
        if self.max_positions == 0 {
            return fail("max_positions must be at least 1");
        }
        if !(0.0 < self.max_position_frac && self.max_position_frac <= 1.0) {
            return fail("max_position_frac must be in (0, 1]");
        }
        if self.update_interval_secs == 0 || self.retrain_interval_secs == 0 {
            return fail("update and retrain intervals must be non-zero");
        }
        if self.train_window_days <= 0 || self.history_days <= 0 {
            return fail("train_window_days and history_days must be positive");
        }
        if self.min_train_samples == 0 {
            return fail("min_train_samples must be at least 1");
        }
        let s = &self.strategy;
        if !(0.5 <= s.prob_threshold && s.prob_threshold <= 1.0) {
            return fail("strategy.prob_threshold must be in [0.5, 1]");
        }
        if s.stop_loss_atr <= 0.0 || s.take_profit_atr <= 0.0 {
            return fail("strategy stop/target ATR multiples must be positive");
        }
        if s.ema_fast == 0
            || s.ema_slow == 0
            || s.atr_period == 0
            || s.macd_fast == 0
            || s.macd_slow == 0
            || s.macd_signal == 0
        {
            return fail("strategy indicator periods must be non-zero");
        }
        if s.ema_fast >= s.ema_slow {
            return fail("strategy.ema_fast must be shorter than ema_slow");
        }
        if !(0.0 < s.high_vol_size_factor && s.high_vol_size_factor <= 1.0) {
            return fail("strategy.high_vol_size_factor must be in (0, 1]");
        }
        let r = &self.regime;
        if r.vol_lookback == 0 || r.trend_lookback == 0 {
            return fail("regime lookbacks must be non-zero");
        }
        Ok(())
    }

    pub fn start_capital_dec(&self) -> Decimal {
        Decimal::from_f64(self.start_capital).unwrap_or_default()
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }

    pub fn retrain_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.retrain_interval_secs as i64)
    }

    /// Fallback weight when the optimizer has no opinion on a symbol.
    pub fn equal_weight(&self) -> f64 {
        1.0 / self.symbols.len().max(1) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_zero_risk() {
        let mut cfg = AppConfig::default();
        cfg.risk_per_trade = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_empty_symbols() {
        let mut cfg = AppConfig::default();
        cfg.symbols.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_inverted_emas() {
        let mut cfg = AppConfig::default();
        cfg.strategy.ema_fast = 200;
        cfg.strategy.ema_slow = 50;
        assert!(cfg.validate().is_err());
    }
}
